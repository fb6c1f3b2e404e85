// GET/POST handlers: version, snapshot, slots, refresh, auto-update

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::aggregator::AggregatorError;
use crate::models::{AggregatorSnapshot, ApiEnvelope, SlotSnapshot};
use crate::scheduler::SchedulerState;
use crate::version::{NAME, VERSION};

/// Failure rendered as the standard `{ success: false, error }` envelope.
pub(super) struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ApiEnvelope::<()>::failure(self.1))).into_response()
    }
}

impl From<AggregatorError> for ApiError {
    fn from(e: AggregatorError) -> Self {
        let status = match e {
            AggregatorError::UnknownCategory(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AutoUpdateStatus {
    enabled: bool,
    interval_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AutoUpdateRequest {
    enabled: Option<bool>,
    interval_ms: Option<u64>,
}

/// GET /version: service name and version from Cargo.toml.
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/snapshot
pub(super) async fn snapshot_handler(
    State(state): State<AppState>,
) -> Json<ApiEnvelope<AggregatorSnapshot>> {
    Json(ApiEnvelope::ok(state.aggregator.snapshot().await))
}

/// GET /api/slots/{name}
pub(super) async fn slot_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiEnvelope<SlotSnapshot>>, ApiError> {
    let slot = state.aggregator.slot(&name).await?;
    Ok(Json(ApiEnvelope::ok(slot)))
}

/// POST /api/refresh: waits for every category to settle.
pub(super) async fn refresh_all_handler(
    State(state): State<AppState>,
) -> Json<ApiEnvelope<AggregatorSnapshot>> {
    Json(ApiEnvelope::ok(state.aggregator.refresh_all().await))
}

/// POST /api/refresh/{name}
pub(super) async fn refresh_one_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiEnvelope<SlotSnapshot>>, ApiError> {
    let slot = state.aggregator.refresh_one(&name).await?;
    Ok(Json(ApiEnvelope::ok(slot)))
}

/// GET /api/auto-update
pub(super) async fn auto_update_status_handler(
    State(state): State<AppState>,
) -> Json<ApiEnvelope<AutoUpdateStatus>> {
    let scheduler = state.scheduler.lock().await;
    Json(ApiEnvelope::ok(AutoUpdateStatus {
        enabled: scheduler.state() == SchedulerState::Running,
        interval_ms: scheduler.interval().as_millis() as u64,
    }))
}

/// POST /api/auto-update with `{ enabled?, intervalMs? }`. The interval applies before start/stop.
pub(super) async fn auto_update_handler(
    State(state): State<AppState>,
    Json(request): Json<AutoUpdateRequest>,
) -> Result<Json<ApiEnvelope<AutoUpdateStatus>>, ApiError> {
    if request.interval_ms == Some(0) {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "intervalMs must be > 0".into(),
        ));
    }

    let mut scheduler = state.scheduler.lock().await;
    if let Some(ms) = request.interval_ms {
        scheduler.set_interval(Duration::from_millis(ms)).await;
    }
    match request.enabled {
        Some(true) => {
            scheduler.start();
        }
        Some(false) => {
            scheduler.stop().await;
        }
        None => {}
    }
    tracing::info!(
        enabled = scheduler.state() == SchedulerState::Running,
        interval_ms = scheduler.interval().as_millis() as u64,
        "auto-update settings changed"
    );
    Ok(Json(ApiEnvelope::ok(AutoUpdateStatus {
        enabled: scheduler.state() == SchedulerState::Running,
        interval_ms: scheduler.interval().as_millis() as u64,
    })))
}
