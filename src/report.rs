use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::Datelike;

use crate::error::{ForecastError, Result};
use crate::loss;
use crate::models::{
    round2, EvaluationMetrics, FlatForecastResponse, ForecastLossesResponse, ForecastResult,
    ProductionLossesResponse, ProductionRecord, ReportData, ReportRow, SeverityContext,
    YearlyProduction,
};

pub fn forecast_losses(
    forecast: &ForecastResult,
    metrics: EvaluationMetrics,
    loss_fraction: f64,
    severity: &SeverityContext,
) -> ForecastLossesResponse {
    let adjusted = loss::adjust_series(&forecast.point_forecast, loss_fraction);
    ForecastLossesResponse {
        forecast_dates: forecast.date_labels(),
        next_8_quarters_forecast: forecast.point_forecast.clone(),
        adjusted_production: adjusted.adjusted,
        actual_losses: adjusted.losses,
        evaluation_metrics: metrics,
        severity_range: vec![format!("{}%", severity.severity)],
    }
}

pub fn flat_forecast(forecast: &ForecastResult, loss_fraction: f64) -> FlatForecastResponse {
    let adjusted = loss::adjust_series(&forecast.point_forecast, loss_fraction);
    FlatForecastResponse {
        forecast_dates: forecast.date_labels(),
        expected_production: forecast.point_forecast.clone(),
        adjusted_production: adjusted.adjusted,
        loss_production_impact: adjusted.losses,
    }
}

/// Historical series with the current loss fraction applied to each record.
pub fn production_losses(
    series: &[ProductionRecord],
    loss_fraction: f64,
) -> Result<ProductionLossesResponse> {
    if series.is_empty() {
        return Err(ForecastError::NoData);
    }

    Ok(ProductionLossesResponse {
        dates: series.iter().map(|r| r.date.to_string()).collect(),
        production_raw: series.iter().map(|r| r.value).collect(),
        adjusted_production: series
            .iter()
            .map(|r| round2(loss::apply(r.value, loss_fraction).adjusted))
            .collect(),
        loss_percentage: round2(loss_fraction * 100.0),
    })
}

pub fn assemble_report(
    severity: &SeverityContext,
    loss_fraction: f64,
    series: &[ProductionRecord],
    forecast: &ForecastResult,
) -> Result<ReportData> {
    if series.is_empty() {
        return Err(ForecastError::NoData);
    }

    let data = series
        .iter()
        .map(|record| {
            let split = loss::apply(record.value, loss_fraction);
            ReportRow {
                date: record.date.to_string(),
                value: record.value,
                adjusted_production: split.adjusted,
                loss: split.loss,
            }
        })
        .collect();
    let adjusted = loss::adjust_series(&forecast.point_forecast, loss_fraction);

    Ok(ReportData {
        severity_label: severity.label().to_string(),
        severity_value: severity.severity,
        loss_percentage: round2(loss_fraction * 100.0),
        data,
        forecast_dates: forecast.date_labels(),
        next_8_quarters_forecast: forecast.point_forecast.clone(),
        adjusted_production: adjusted.adjusted,
        actual_losses: adjusted.losses,
    })
}

pub fn yearly_totals(series: &[ProductionRecord]) -> Vec<YearlyProduction> {
    let mut totals: BTreeMap<i32, f64> = BTreeMap::new();
    for record in series {
        *totals.entry(record.date.year()).or_insert(0.0) += record.value;
    }

    totals
        .into_iter()
        .map(|(year, production)| YearlyProduction { year, production })
        .collect()
}

pub fn render_markdown(
    report: &ReportData,
    metrics: Option<&EvaluationMetrics>,
    in_sample_mae: Option<f64>,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Cacao Production Forecast Report");
    let _ = writeln!(
        output,
        "Disease severity {} ({}), assumed loss {:.2}%",
        report.severity_value, report.severity_label, report.loss_percentage
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Historical Production");

    if report.data.is_empty() {
        let _ = writeln!(output, "No production records uploaded.");
    } else {
        let total: f64 = report.data.iter().map(|row| row.value).sum();
        let lost: f64 = report.data.iter().map(|row| row.loss).sum();
        let _ = writeln!(
            output,
            "{} quarters from {} to {}, total {:.2} (estimated loss {:.2})",
            report.data.len(),
            report.data[0].date,
            report.data[report.data.len() - 1].date,
            total,
            lost
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Forecast");
    let _ = writeln!(output, "| Quarter | Forecast | Adjusted | Loss |");
    let _ = writeln!(output, "|---|---|---|---|");
    for (i, date) in report.forecast_dates.iter().enumerate() {
        let _ = writeln!(
            output,
            "| {} | {:.2} | {:.2} | {:.2} |",
            date,
            report.next_8_quarters_forecast[i],
            report.adjusted_production[i],
            report.actual_losses[i]
        );
    }

    if metrics.is_some() || in_sample_mae.is_some() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Model Accuracy");
        if let Some(mae) = in_sample_mae {
            let _ = writeln!(output, "- In-sample MAE: {mae:.2}");
        }
        if let Some(metrics) = metrics {
            let _ = writeln!(
                output,
                "- Cross-validated MAE {:.2}, MSE {:.2}, RMSE {:.2}",
                metrics.mae, metrics.mse, metrics.rmse
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(y: i32, m: u32, value: f64) -> ProductionRecord {
        ProductionRecord {
            date: NaiveDate::from_ymd_opt(y, m, 1).unwrap(),
            value,
        }
    }

    fn forecast() -> ForecastResult {
        ForecastResult {
            dates: vec![
                NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            ],
            point_forecast: vec![200.0, 100.0],
            fitted_values: vec![],
        }
    }

    #[test]
    fn report_aligns_adjustments_with_forecast() {
        let ctx = SeverityContext::new("s1", Some(10));
        let series = vec![record(2023, 1, 50.0), record(2023, 4, 80.0)];
        let report = assemble_report(&ctx, 0.10, &series, &forecast()).unwrap();

        assert_eq!(report.severity_label, "Severe");
        assert_eq!(report.severity_value, 10);
        assert_eq!(report.loss_percentage, 10.0);
        assert_eq!(report.data.len(), 2);
        assert!((report.data[0].loss - 5.0).abs() < 1e-9);
        assert_eq!(report.forecast_dates, vec!["2024-04-01", "2024-07-01"]);
        assert!((report.adjusted_production[0] - 180.0).abs() < 1e-9);
        assert!((report.actual_losses[1] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_store_is_no_data() {
        let ctx = SeverityContext::new("s1", None);
        assert!(matches!(
            assemble_report(&ctx, 0.01, &[], &forecast()),
            Err(ForecastError::NoData)
        ));
        assert!(matches!(
            production_losses(&[], 0.01),
            Err(ForecastError::NoData)
        ));
    }

    #[test]
    fn production_losses_rounds_adjusted_values() {
        let series = vec![record(2023, 1, 33.33)];
        let response = production_losses(&series, 0.07).unwrap();
        assert_eq!(response.dates, vec!["2023-01-01"]);
        assert_eq!(response.adjusted_production, vec![31.0]);
        assert_eq!(response.loss_percentage, 7.0);
    }

    #[test]
    fn forecast_response_reports_severity_range() {
        let ctx = SeverityContext::new("s1", Some(3));
        let metrics = EvaluationMetrics {
            mae: 1.0,
            mse: 1.0,
            rmse: 1.0,
        };
        let response = forecast_losses(&forecast(), metrics, 0.03, &ctx);
        assert_eq!(response.severity_range, vec!["3%"]);
        assert!((response.actual_losses[0] - 6.0).abs() < 1e-9);
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("next_8_quarters_forecast").is_some());
        assert!(json["evaluation_metrics"].get("RMSE").is_some());
    }

    #[test]
    fn yearly_totals_sum_by_calendar_year() {
        let series = vec![
            record(2022, 1, 10.0),
            record(2022, 7, 15.0),
            record(2023, 1, 7.5),
        ];
        let totals = yearly_totals(&series);
        assert_eq!(
            totals,
            vec![
                YearlyProduction {
                    year: 2022,
                    production: 25.0
                },
                YearlyProduction {
                    year: 2023,
                    production: 7.5
                },
            ]
        );
    }

    #[test]
    fn markdown_lists_each_forecast_quarter() {
        let ctx = SeverityContext::new("s1", Some(5));
        let series = vec![record(2023, 1, 50.0)];
        let report = assemble_report(&ctx, 0.05, &series, &forecast()).unwrap();
        let markdown = render_markdown(&report, None, Some(1.25));
        assert!(markdown.contains("Disease severity 5 (Moderate)"));
        assert!(markdown.contains("| 2024-04-01 | 200.00 | 190.00 | 10.00 |"));
        assert!(markdown.contains("In-sample MAE: 1.25"));
        assert!(!markdown.contains("Cross-validated"));
    }
}
