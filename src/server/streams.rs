//! Stream registry endpoints

use super::AppState;
use crate::registry::schema::{ConfigFile, StreamDescriptor, StreamUpdate};
use crate::utils::error::AppResult;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddStreamRequest {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn get_config(State(state): State<AppState>) -> Json<ConfigFile> {
    Json(state.registry.snapshot().await)
}

pub async fn add_stream(
    State(state): State<AppState>,
    Json(request): Json<AddStreamRequest>,
) -> AppResult<(StatusCode, Json<StreamDescriptor>)> {
    let stream = state.registry.add(request.url, request.name).await?;
    Ok((StatusCode::CREATED, Json(stream)))
}

pub async fn update_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<StreamUpdate>,
) -> AppResult<Json<StreamDescriptor>> {
    Ok(Json(state.registry.update(&id, update).await?))
}

pub async fn remove_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    state.sessions.remove_stream(&id).await?;
    Ok(Json(json!({ "success": true })))
}
