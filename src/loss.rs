use std::collections::HashMap;

use tracing::debug;

use crate::config::LossMode;
use crate::error::{ForecastError, Result};
use crate::models::DiseaseCounts;

/// Labels the classifier emits that are not diseases.
pub const NON_DISEASE_LABELS: [&str; 3] = ["Branch Healthy", "Cacao Healthy", "Invalid Image"];

pub const DETECTIONS_PER_BLOCK: i64 = 10;
pub const LEAF_BLOCK_LOSS: f64 = 0.03;
pub const BRANCH_BLOCK_LOSS: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiseaseCategory {
    Leaf,
    Branch,
}

pub fn categorize(label: &str) -> Option<DiseaseCategory> {
    match label {
        "Vascular Streak Dieback (VSD)" => Some(DiseaseCategory::Branch),
        "Cacao Early Blight" | "Cacao Late Blight" | "Cacao Leaf Spot" => {
            Some(DiseaseCategory::Leaf)
        }
        _ => None,
    }
}

/// What a loss fraction was derived from.
#[derive(Debug, Clone)]
pub enum LossSource<'a> {
    Severity(i32),
    Incidence(&'a DiseaseCounts),
}

impl<'a> LossSource<'a> {
    pub fn for_mode(mode: LossMode, severity: i32, counts: &'a DiseaseCounts) -> Self {
        match mode {
            LossMode::Severity => LossSource::Severity(severity),
            LossMode::Incidence => LossSource::Incidence(counts),
        }
    }

    pub fn fraction(&self) -> Result<f64> {
        match self {
            LossSource::Severity(severity) => severity_loss_fraction(*severity),
            LossSource::Incidence(counts) => {
                check_fraction(incidence_loss(counts).total_loss_fraction)
            }
        }
    }
}

/// Severity 1..=10 maps to 1%..10%.
pub fn severity_loss_fraction(severity: i32) -> Result<f64> {
    check_fraction(f64::from(severity) / 100.0)
}

pub fn check_fraction(fraction: f64) -> Result<f64> {
    if fraction.is_finite() && (0.0..=1.0).contains(&fraction) {
        Ok(fraction)
    } else {
        Err(ForecastError::InvalidLossFraction(fraction))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IncidenceLoss {
    pub leaf_detections: i64,
    pub branch_detections: i64,
    pub leaf_loss: f64,
    pub branch_loss: f64,
    pub total_loss_fraction: f64,
}

pub fn incidence_loss(counts: &DiseaseCounts) -> IncidenceLoss {
    let mut totals: HashMap<DiseaseCategory, i64> = HashMap::new();
    for (label, count) in &counts.disease_counts {
        if let Some(category) = categorize(label) {
            *totals.entry(category).or_insert(0) += count;
        }
    }

    incidence_from_totals(
        totals.get(&DiseaseCategory::Leaf).copied().unwrap_or(0),
        totals.get(&DiseaseCategory::Branch).copied().unwrap_or(0),
    )
}

/// Only complete blocks of ten detections contribute.
pub fn incidence_from_totals(leaf_detections: i64, branch_detections: i64) -> IncidenceLoss {
    let leaf_loss = (leaf_detections.max(0) / DETECTIONS_PER_BLOCK) as f64 * LEAF_BLOCK_LOSS;
    let branch_loss =
        (branch_detections.max(0) / DETECTIONS_PER_BLOCK) as f64 * BRANCH_BLOCK_LOSS;
    let loss = IncidenceLoss {
        leaf_detections,
        branch_detections,
        leaf_loss,
        branch_loss,
        total_loss_fraction: leaf_loss + branch_loss,
    };
    debug!(
        leaf = loss.leaf_detections,
        branch = loss.branch_detections,
        leaf_loss = loss.leaf_loss,
        branch_loss = loss.branch_loss,
        total = loss.total_loss_fraction,
        "incidence loss computed"
    );
    loss
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossSplit {
    pub adjusted: f64,
    pub loss: f64,
}

pub fn apply(value: f64, fraction: f64) -> LossSplit {
    LossSplit {
        adjusted: value * (1.0 - fraction),
        loss: value * fraction,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdjustedSeries {
    pub adjusted: Vec<f64>,
    pub losses: Vec<f64>,
}

pub fn adjust_series(values: &[f64], fraction: f64) -> AdjustedSeries {
    values
        .iter()
        .map(|&value| apply(value, fraction))
        .fold(AdjustedSeries::default(), |mut series, split| {
            series.adjusted.push(split.adjusted);
            series.losses.push(split.loss);
            series
        })
}
