use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::ForecastError;
use crate::pipeline;
use crate::store::ProductionStore;

pub const SESSION_HEADER: &str = "x-session-id";
const DEFAULT_SESSION: &str = "default";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProductionStore>,
    pub settings: Arc<Settings>,
}

pub enum ApiError {
    Forecast(ForecastError),
    BadRequest(String),
}

impl From<ForecastError> for ApiError {
    fn from(err: ForecastError) -> Self {
        ApiError::Forecast(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Forecast(err) => {
                let status = match &err {
                    ForecastError::ForecastFit(_) | ForecastError::FoldFit { .. } => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    ForecastError::FitTimeout(_) | ForecastError::Database(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    _ => StatusCode::BAD_REQUEST,
                };
                warn!(kind = err.kind(), error = %err, "request failed");
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/upload_csv", post(upload_csv))
        .route("/api/get_production_data", get(production_data))
        .route("/api/production_by_year", get(production_by_year))
        .route("/api/forecast-losses", get(forecast_losses))
        .route("/api/bar-forecast-losses", get(bar_forecast_losses))
        .route("/api/production-losses", get(production_losses))
        .route("/api/report_data", get(report_data))
        .route("/api/evaluation", get(evaluation))
        .route("/api/scan_records", post(record_scan))
        .route("/api/get_disease_counts", get(disease_counts))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn check_csv_filename(file_name: Option<&str>) -> Result<(), ApiError> {
    match file_name.map(str::trim) {
        None | Some("") => Err(ApiError::BadRequest("no selected file".to_string())),
        Some(name) if name.ends_with(".csv") => Ok(()),
        Some(name) => Err(ApiError::BadRequest(format!(
            "{name:?} is not a CSV file, upload a .csv export"
        ))),
    }
}

async fn upload_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<crate::models::UploadSummary> {
    let mut file = None;
    let mut severity = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                check_csv_filename(field.file_name())?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::BadRequest(err.to_string()))?;
                file = Some(bytes);
            }
            Some("severity") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ApiError::BadRequest(err.to_string()))?;
                let text = text.trim();
                if !text.is_empty() {
                    let value = text.parse::<i32>().map_err(|_| {
                        ApiError::BadRequest(
                            "invalid severity value, it should be an integer".to_string(),
                        )
                    })?;
                    severity = Some(value);
                }
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::BadRequest("no file part".to_string()))?;
    let summary = pipeline::upload(
        state.store.as_ref(),
        &state.settings,
        &session_id(&headers),
        &file[..],
        severity,
    )
    .await?;
    Ok(Json(summary))
}

async fn production_data(
    State(state): State<AppState>,
) -> ApiResult<crate::models::ProductionListing> {
    Ok(Json(pipeline::production_listing(state.store.as_ref()).await?))
}

async fn production_by_year(
    State(state): State<AppState>,
) -> ApiResult<Vec<crate::models::YearlyProduction>> {
    Ok(Json(pipeline::yearly_production(state.store.as_ref()).await?))
}

async fn forecast_losses(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<crate::models::ForecastLossesResponse> {
    let response =
        pipeline::forecast_losses(state.store.as_ref(), &state.settings, &session_id(&headers))
            .await?;
    Ok(Json(response))
}

async fn bar_forecast_losses(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<crate::models::FlatForecastResponse> {
    let response =
        pipeline::flat_forecast(state.store.as_ref(), &state.settings, &session_id(&headers))
            .await?;
    Ok(Json(response))
}

async fn production_losses(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<crate::models::ProductionLossesResponse> {
    let response =
        pipeline::production_losses(state.store.as_ref(), &state.settings, &session_id(&headers))
            .await?;
    Ok(Json(response))
}

async fn report_data(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<crate::models::ReportData> {
    let bundle =
        pipeline::report(state.store.as_ref(), &state.settings, &session_id(&headers)).await?;
    Ok(Json(bundle.data))
}

#[derive(Deserialize)]
struct EvaluationQuery {
    folds: Option<usize>,
}

async fn evaluation(
    State(state): State<AppState>,
    Query(query): Query<EvaluationQuery>,
) -> ApiResult<crate::models::EvaluationMetrics> {
    let folds = query.folds.unwrap_or(state.settings.folds);
    Ok(Json(
        pipeline::evaluate(state.store.as_ref(), &state.settings, folds).await?,
    ))
}

#[derive(Deserialize)]
struct ScanPayload {
    disease: String,
    confidence: f64,
}

async fn record_scan(
    State(state): State<AppState>,
    Json(payload): Json<ScanPayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let id =
        pipeline::record_scan(state.store.as_ref(), &payload.disease, payload.confidence).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn disease_counts(
    State(state): State<AppState>,
) -> ApiResult<crate::models::DiseaseCounts> {
    Ok(Json(pipeline::disease_counts(state.store.as_ref()).await?))
}
