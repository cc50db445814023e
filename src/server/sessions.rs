//! Recording session endpoints

use super::AppState;
use crate::recorder::{SessionSnapshot, StopOutcome};
use crate::utils::error::AppResult;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub stream_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub session_id: String,
    pub stream_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub session_id: String,
}

pub async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> AppResult<(StatusCode, Json<StartResponse>)> {
    let session_id = state.sessions.start(&request.stream_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            session_id,
            stream_id: request.stream_id,
        }),
    ))
}

pub async fn stop(
    State(state): State<AppState>,
    Json(request): Json<StopRequest>,
) -> AppResult<Json<StopOutcome>> {
    Ok(Json(state.sessions.stop(&request.session_id).await?))
}

pub async fn status(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> AppResult<Json<SessionSnapshot>> {
    Ok(Json(state.sessions.status(&stream_id).await?))
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.sessions.list_active().await)
}

pub async fn get(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Json<SessionSnapshot>> {
    Ok(Json(state.sessions.session_status(&session_id).await?))
}
