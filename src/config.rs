use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::Serialize;

/// How an upload is applied to the existing production series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestPolicy {
    /// Delete every stored record, then insert the upload.
    Replace,
    /// Insert new dates and overwrite values for dates already stored.
    Merge,
}

/// Where the loss fraction applied to forecasts comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LossMode {
    /// Session severity / 100.
    Severity,
    /// Blocks of ten recorded leaf or branch disease detections.
    Incidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ForecastStrategy {
    /// Fit once and forecast the whole horizon.
    SingleShot,
    /// Forecast one period, feed the loss-adjusted value back, refit.
    Rolled,
}

/// Tunables shared by the CLI commands and the HTTP server.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Number of quarters to forecast
    #[arg(long, global = true, env = "CACAO_HORIZON", default_value_t = 8)]
    pub horizon: usize,
    /// Fold count used for cross-validation
    #[arg(long, global = true, env = "CACAO_FOLDS", default_value_t = 10)]
    pub folds: usize,
    #[arg(
        long,
        global = true,
        env = "CACAO_INGEST_POLICY",
        value_enum,
        default_value_t = IngestPolicy::Replace
    )]
    pub ingest_policy: IngestPolicy,
    #[arg(
        long,
        global = true,
        env = "CACAO_LOSS_MODE",
        value_enum,
        default_value_t = LossMode::Severity
    )]
    pub loss_mode: LossMode,
    #[arg(
        long,
        global = true,
        env = "CACAO_STRATEGY",
        value_enum,
        default_value_t = ForecastStrategy::Rolled
    )]
    pub strategy: ForecastStrategy,
    /// Reject uploads that carry no severity value
    #[arg(
        long,
        global = true,
        env = "CACAO_REQUIRE_SEVERITY",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub require_severity: bool,
    /// Seconds a single model fit may run before the request fails
    #[arg(
        long,
        global = true,
        env = "CACAO_FIT_TIMEOUT_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub fit_timeout_secs: u64,
}

impl Settings {
    pub fn fit_timeout(&self) -> Duration {
        Duration::from_secs(self.fit_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            horizon: 8,
            folds: 10,
            ingest_policy: IngestPolicy::Replace,
            loss_mode: LossMode::Severity,
            strategy: ForecastStrategy::Rolled,
            require_severity: true,
            fit_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        settings: Settings,
        #[command(subcommand)]
        command: Option<Step>,
    }

    #[derive(clap::Subcommand)]
    enum Step {
        Run,
    }

    #[test]
    fn defaults_match_quarterly_two_year_horizon() {
        let harness = Harness::parse_from(["cacao-forecast"]);
        assert_eq!(harness.settings.horizon, 8);
        assert_eq!(harness.settings.folds, 10);
        assert_eq!(harness.settings.ingest_policy, IngestPolicy::Replace);
        assert_eq!(harness.settings.strategy, ForecastStrategy::Rolled);
        assert!(harness.settings.require_severity);
    }

    #[test]
    fn policies_parse_from_flags() {
        let harness = Harness::parse_from([
            "cacao-forecast",
            "--ingest-policy",
            "merge",
            "--loss-mode",
            "incidence",
            "--strategy",
            "single-shot",
            "--require-severity",
            "false",
            "run",
        ]);
        assert!(matches!(harness.command, Some(Step::Run)));
        assert_eq!(harness.settings.ingest_policy, IngestPolicy::Merge);
        assert_eq!(harness.settings.loss_mode, LossMode::Incidence);
        assert_eq!(harness.settings.strategy, ForecastStrategy::SingleShot);
        assert!(!harness.settings.require_severity);
    }

    #[test]
    fn zero_fit_timeout_is_rejected() {
        let parsed = Harness::try_parse_from(["cacao-forecast", "--fit-timeout-secs", "0"]);
        assert!(parsed.is_err());

        let harness = Harness::parse_from(["cacao-forecast", "--fit-timeout-secs", "5"]);
        assert_eq!(harness.settings.fit_timeout(), Duration::from_secs(5));
    }
}
