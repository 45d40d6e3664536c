use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use capture::{SourceDescriptor, SourceKind};
use controller::{LoopState, MetricsSnapshot};
use inference::ModelDescriptor;
use serde::{Deserialize, Serialize};

// ========== Models ==========

pub async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelDescriptor>> {
    Json(state.models.list_models().to_vec())
}

pub async fn current_model(State(state): State<AppState>) -> Json<Option<ModelDescriptor>> {
    Json(state.models.current_model())
}

pub async fn load_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ModelDescriptor>> {
    Ok(Json(state.models.load_model(&id).await?))
}

// ========== Sources ==========

#[derive(Debug, Deserialize)]
pub struct RegisterSource {
    pub kind: SourceKind,
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceDescriptor>> {
    Json(state.sources.list_sources())
}

pub async fn active_source(State(state): State<AppState>) -> Json<Option<SourceDescriptor>> {
    Json(state.sources.active_source())
}

pub async fn register_source(
    State(state): State<AppState>,
    Json(body): Json<RegisterSource>,
) -> ApiResult<(StatusCode, Json<SourceDescriptor>)> {
    let descriptor = state
        .sources
        .register_remote_source(body.kind, &body.url, body.name)?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

pub async fn discover_sources(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<SourceDescriptor>>> {
    Ok(Json(state.sources.discover_local_sources().await?))
}

pub async fn activate_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SourceDescriptor>> {
    Ok(Json(state.sources.activate_id(&id).await?))
}

pub async fn next_source(State(state): State<AppState>) -> ApiResult<Json<SourceDescriptor>> {
    Ok(Json(state.sources.switch_to_next().await?))
}

// ========== Detection loop ==========

#[derive(Debug, Serialize)]
pub struct LoopStatus {
    pub state: LoopState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn status(state: &AppState) -> Json<LoopStatus> {
    let detection_loop = state.detection_loop();
    Json(LoopStatus {
        state: detection_loop.state(),
        last_error: detection_loop.last_error().map(|e| e.to_string()),
    })
}

pub async fn loop_status(State(state): State<AppState>) -> Json<LoopStatus> {
    status(&state)
}

pub async fn start_loop(State(state): State<AppState>) -> ApiResult<Json<LoopStatus>> {
    state.startable_loop().start()?;
    Ok(status(&state))
}

pub async fn pause_loop(State(state): State<AppState>) -> ApiResult<Json<LoopStatus>> {
    state.detection_loop().pause()?;
    Ok(status(&state))
}

pub async fn resume_loop(State(state): State<AppState>) -> ApiResult<Json<LoopStatus>> {
    state.detection_loop().resume()?;
    Ok(status(&state))
}

pub async fn stop_loop(State(state): State<AppState>) -> Json<LoopStatus> {
    state.detection_loop().stop().await;
    status(&state)
}

// ========== Metrics ==========

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.current())
}
