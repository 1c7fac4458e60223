use std::time::Duration;

use thiserror::Error;

/// Everything that can fail between a raw upload and a released forecast.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("invalid CSV format: {0}")]
    Schema(String),

    #[error("invalid value in row {row}: {message}")]
    RowValidation { row: usize, message: String },

    #[error("severity value is required")]
    MissingSeverity,

    #[error("no production data available, upload data first")]
    NoData,

    #[error("insufficient data: need at least {needed} periods, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("model fit failed: {0}")]
    ForecastFit(String),

    #[error("cross-validation fold {fold} failed: {message}")]
    FoldFit { fold: usize, message: String },

    #[error("loss fraction {0} is outside [0, 1]")]
    InvalidLossFraction(f64),

    #[error("model fit exceeded {0:?}")]
    FitTimeout(Duration),

    #[error("unreadable CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ForecastError {
    /// Stable tag callers can branch on without matching message text.
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::Schema(_) => "schema_error",
            ForecastError::RowValidation { .. } => "row_validation_error",
            ForecastError::MissingSeverity => "missing_severity_error",
            ForecastError::NoData => "no_data_error",
            ForecastError::InsufficientData { .. } => "insufficient_data_error",
            ForecastError::ForecastFit(_) => "forecast_fit_error",
            ForecastError::FoldFit { .. } => "fold_fit_error",
            ForecastError::InvalidLossFraction(_) => "invalid_loss_fraction_error",
            ForecastError::FitTimeout(_) => "fit_timeout_error",
            ForecastError::Csv(_) => "schema_error",
            ForecastError::Database(_) => "database_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
