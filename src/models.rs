use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::IngestPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProductionRecord {
    pub date: NaiveDate,
    pub value: f64,
}

/// Severity recorded by the latest upload of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityContext {
    pub session_id: String,
    pub severity: i32,
}

impl SeverityContext {
    pub const DEFAULT_SEVERITY: i32 = 1;

    pub fn new(session_id: impl Into<String>, severity: Option<i32>) -> Self {
        Self {
            session_id: session_id.into(),
            severity: severity.unwrap_or(Self::DEFAULT_SEVERITY),
        }
    }

    pub fn label(&self) -> &'static str {
        severity_label(self.severity)
    }
}

/// Two-decimal rounding applied to stored values and presented percentages.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn severity_label(severity: i32) -> &'static str {
    match severity {
        1..=3 => "Low",
        4..=6 => "Moderate",
        7..=10 => "Severe",
        _ => "Mixed",
    }
}

#[derive(Debug, Clone)]
pub struct ForecastResult {
    pub dates: Vec<NaiveDate>,
    pub point_forecast: Vec<f64>,
    /// One-step-ahead fitted values, aligned with the historical dates.
    pub fitted_values: Vec<f64>,
}

impl ForecastResult {
    pub fn date_labels(&self) -> Vec<String> {
        self.dates
            .iter()
            .map(|date| date.format("%Y-%m-%d").to_string())
            .collect()
    }

    /// Mean absolute error of the fitted values against the history they were fitted on.
    pub fn in_sample_mae(&self, history: &[ProductionRecord]) -> f64 {
        let n = history.len().min(self.fitted_values.len());
        if n == 0 {
            return 0.0;
        }
        history
            .iter()
            .zip(&self.fitted_values)
            .map(|(record, fitted)| (record.value - fitted).abs())
            .sum::<f64>()
            / n as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    #[serde(rename = "MAE")]
    pub mae: f64,
    #[serde(rename = "MSE")]
    pub mse: f64,
    #[serde(rename = "RMSE")]
    pub rmse: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub policy: IngestPolicy,
    pub rows_read: usize,
    pub rows_applied: usize,
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    pub severity: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiseaseCounts {
    pub total_diseases_detected: i64,
    pub disease_counts: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlyProduction {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Production")]
    pub production: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductionListing {
    pub production: Vec<ProductionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastLossesResponse {
    pub forecast_dates: Vec<String>,
    pub next_8_quarters_forecast: Vec<f64>,
    pub adjusted_production: Vec<f64>,
    pub actual_losses: Vec<f64>,
    pub evaluation_metrics: EvaluationMetrics,
    pub severity_range: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlatForecastResponse {
    pub forecast_dates: Vec<String>,
    pub expected_production: Vec<f64>,
    pub adjusted_production: Vec<f64>,
    pub loss_production_impact: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductionLossesResponse {
    pub dates: Vec<String>,
    pub production_raw: Vec<f64>,
    pub adjusted_production: Vec<f64>,
    pub loss_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub date: String,
    pub value: f64,
    pub adjusted_production: f64,
    pub loss: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportData {
    pub severity_label: String,
    pub severity_value: i32,
    pub loss_percentage: f64,
    pub data: Vec<ReportRow>,
    pub forecast_dates: Vec<String>,
    pub next_8_quarters_forecast: Vec<f64>,
    pub adjusted_production: Vec<f64>,
    pub actual_losses: Vec<f64>,
}
