//! Request-level operations shared by the CLI and the HTTP server.
//!
//! Every call reads the store afresh and refits from scratch; model fitting
//! runs on the blocking pool under the configured timeout.

use std::io::Read;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ForecastStrategy, LossMode, Settings};
use crate::error::{ForecastError, Result};
use crate::holt_winters;
use crate::ingest;
use crate::loss::LossSource;
use crate::models::{
    DiseaseCounts, EvaluationMetrics, FlatForecastResponse, ForecastLossesResponse,
    ForecastResult, ProductionListing, ProductionLossesResponse, ProductionRecord, ReportData,
    SeverityContext, UploadSummary, YearlyProduction,
};
use crate::report;
use crate::store::ProductionStore;
use crate::validation;

/// Assembled report plus the in-sample fit error used by the markdown rendition.
#[derive(Debug, Clone)]
pub struct ReportBundle {
    pub data: ReportData,
    pub in_sample_mae: f64,
}

pub async fn upload<S, R>(
    store: &S,
    settings: &Settings,
    session_id: &str,
    csv: R,
    severity: Option<i32>,
) -> Result<UploadSummary>
where
    S: ProductionStore + ?Sized,
    R: Read,
{
    if severity.is_none() && settings.require_severity {
        return Err(ForecastError::MissingSeverity);
    }

    let parsed = ingest::parse_production_csv(csv)?;
    let ctx = SeverityContext::new(session_id, severity);
    let applied = store
        .apply_upload(settings.ingest_policy, &parsed.records, &ctx)
        .await?;

    info!(
        session_id,
        policy = ?settings.ingest_policy,
        rows = parsed.rows_read,
        severity,
        "upload applied"
    );

    Ok(UploadSummary {
        policy: settings.ingest_policy,
        rows_read: parsed.rows_read,
        rows_applied: parsed.records.len(),
        inserted: applied.inserted,
        updated: applied.updated,
        removed: applied.removed,
        severity,
    })
}

pub async fn severity_context<S>(store: &S, session_id: &str) -> Result<SeverityContext>
where
    S: ProductionStore + ?Sized,
{
    let severity = store.session_severity(session_id).await?;
    Ok(SeverityContext::new(session_id, severity))
}

async fn loss_fraction<S>(store: &S, settings: &Settings, ctx: &SeverityContext) -> Result<f64>
where
    S: ProductionStore + ?Sized,
{
    let counts = match settings.loss_mode {
        LossMode::Incidence => store.disease_counts().await?,
        LossMode::Severity => DiseaseCounts::default(),
    };
    LossSource::for_mode(settings.loss_mode, ctx.severity, &counts).fraction()
}

async fn non_empty_series<S>(store: &S) -> Result<Vec<ProductionRecord>>
where
    S: ProductionStore + ?Sized,
{
    let series = store.fetch_series().await?;
    if series.is_empty() {
        return Err(ForecastError::NoData);
    }
    Ok(series)
}

/// Runs a CPU-bound fit off the async workers, bounded by the fit timeout.
async fn run_fit<T, F>(settings: &Settings, fit: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let limit = settings.fit_timeout();
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(fit)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ForecastError::ForecastFit(join.to_string())),
        Err(_) => {
            warn!(?limit, "model fit timed out");
            Err(ForecastError::FitTimeout(limit))
        }
    }
}

async fn forecast_series(
    settings: &Settings,
    strategy: ForecastStrategy,
    series: Vec<ProductionRecord>,
    loss_fraction: f64,
) -> Result<ForecastResult> {
    let horizon = settings.horizon;
    run_fit(settings, move || {
        holt_winters::forecast_with(strategy, &series, horizon, loss_fraction)
    })
    .await
}

async fn evaluate_series(
    settings: &Settings,
    series: Vec<ProductionRecord>,
    folds: usize,
) -> Result<EvaluationMetrics> {
    run_fit(settings, move || validation::evaluate(&series, folds)).await
}

pub async fn forecast_losses<S>(
    store: &S,
    settings: &Settings,
    session_id: &str,
) -> Result<ForecastLossesResponse>
where
    S: ProductionStore + ?Sized,
{
    let series = non_empty_series(store).await?;
    let ctx = severity_context(store, session_id).await?;
    let fraction = loss_fraction(store, settings, &ctx).await?;

    let (forecast, metrics) = tokio::join!(
        forecast_series(settings, settings.strategy, series.clone(), fraction),
        evaluate_series(settings, series, settings.folds),
    );
    let forecast = forecast?;
    let metrics = metrics?;

    info!(
        session_id,
        severity = ctx.severity,
        loss_fraction = fraction,
        strategy = ?settings.strategy,
        "forecast released"
    );
    Ok(report::forecast_losses(&forecast, metrics, fraction, &ctx))
}

/// Single-shot forecast with the loss fraction applied uniformly.
pub async fn flat_forecast<S>(
    store: &S,
    settings: &Settings,
    session_id: &str,
) -> Result<FlatForecastResponse>
where
    S: ProductionStore + ?Sized,
{
    let series = non_empty_series(store).await?;
    let ctx = severity_context(store, session_id).await?;
    let fraction = loss_fraction(store, settings, &ctx).await?;
    let forecast = forecast_series(settings, ForecastStrategy::SingleShot, series, fraction).await?;
    Ok(report::flat_forecast(&forecast, fraction))
}

pub async fn production_losses<S>(
    store: &S,
    settings: &Settings,
    session_id: &str,
) -> Result<ProductionLossesResponse>
where
    S: ProductionStore + ?Sized,
{
    let series = store.fetch_series().await?;
    let ctx = severity_context(store, session_id).await?;
    let fraction = loss_fraction(store, settings, &ctx).await?;
    report::production_losses(&series, fraction)
}

pub async fn evaluate<S>(store: &S, settings: &Settings, folds: usize) -> Result<EvaluationMetrics>
where
    S: ProductionStore + ?Sized,
{
    let series = non_empty_series(store).await?;
    evaluate_series(settings, series, folds).await
}

/// Report over the current store. Cross-validation is left to callers that need it.
pub async fn report<S>(store: &S, settings: &Settings, session_id: &str) -> Result<ReportBundle>
where
    S: ProductionStore + ?Sized,
{
    let series = non_empty_series(store).await?;
    let ctx = severity_context(store, session_id).await?;
    let fraction = loss_fraction(store, settings, &ctx).await?;

    let forecast = forecast_series(settings, settings.strategy, series.clone(), fraction).await?;
    let data = report::assemble_report(&ctx, fraction, &series, &forecast)?;
    Ok(ReportBundle {
        in_sample_mae: forecast.in_sample_mae(&series),
        data,
    })
}

pub async fn production_listing<S>(store: &S) -> Result<ProductionListing>
where
    S: ProductionStore + ?Sized,
{
    Ok(ProductionListing {
        production: store.fetch_series().await?,
    })
}

pub async fn yearly_production<S>(store: &S) -> Result<Vec<YearlyProduction>>
where
    S: ProductionStore + ?Sized,
{
    Ok(report::yearly_totals(&store.fetch_series().await?))
}

pub async fn record_scan<S>(store: &S, disease: &str, confidence: f64) -> Result<Uuid>
where
    S: ProductionStore + ?Sized,
{
    let id = store.record_scan(disease, confidence).await?;
    info!(%id, disease, confidence, "scan recorded");
    Ok(id)
}

pub async fn disease_counts<S>(store: &S) -> Result<DiseaseCounts>
where
    S: ProductionStore + ?Sized,
{
    store.disease_counts().await
}
