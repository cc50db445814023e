//! Recordings library and conversion endpoints

use super::AppState;
use crate::convert::{ConversionError, ConversionState, EnqueueOutcome};
use crate::convert::ffmpeg::TARGET_EXTENSION;
use crate::library::{recording_url, LibraryError, RecordingEntry};
use crate::utils::error::{AppError, AppResult};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path as FsPath;

/// Conversion state of one recording as seen by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionView {
    pub name: String,
    /// `None` when no conversion is queued, running or finished
    pub state: Option<ConversionState>,
    pub progress: u8,
    pub target_url: Option<String>,
}

fn url_of(path: &FsPath) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(recording_url)
}

pub async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<RecordingEntry>>> {
    let active = state.sessions.active_output_paths();
    let entries = state
        .library
        .list(&active, Some(state.conversions.as_ref()))
        .await?;
    Ok(Json(entries))
}

pub async fn update_metadata(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(fields): Json<Map<String, Value>>,
) -> AppResult<Json<Value>> {
    let metadata = state.library.update_metadata(&name, fields).await?;
    Ok(Json(json!({ "success": true, "metadata": metadata })))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    let path = state.library.path_of(&name)?;
    if state.conversions.job(&path).is_some() {
        return Err(ConversionError::AlreadyConverting(path).into());
    }
    state
        .library
        .delete(&name, &state.sessions.active_output_paths())
        .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn convert(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<(StatusCode, Json<ConversionView>)> {
    let source = state.library.resolve(&name).await?;
    let already_target = source
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(TARGET_EXTENSION));
    if already_target {
        return Err(AppError::BadRequest(format!("{} is already converted", name)));
    }
    if state
        .sessions
        .active_output_paths()
        .iter()
        .any(|p| p.file_name() == source.file_name())
    {
        return Err(LibraryError::RecordingActive(name).into());
    }

    match state.conversions.enqueue(&source).await? {
        EnqueueOutcome::Queued(ticket) => Ok((
            StatusCode::ACCEPTED,
            Json(ConversionView {
                name,
                state: Some(ConversionState::Queued),
                progress: 0,
                target_url: url_of(&ticket.target_path),
            }),
        )),
        EnqueueOutcome::AlreadyConverted { target_path } => Ok((
            StatusCode::OK,
            Json(ConversionView {
                name,
                state: Some(ConversionState::Completed),
                progress: 100,
                target_url: url_of(&target_path),
            }),
        )),
    }
}

pub async fn conversion_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<ConversionView>> {
    let source = state.library.path_of(&name)?;

    if let Some(status) = state.conversions.status(&source).await {
        return Ok(Json(ConversionView {
            name,
            state: Some(status.state),
            progress: status.progress,
            target_url: url_of(&status.target_path),
        }));
    }

    let target = state.conversions.target_path(&source);
    if target != source && tokio::fs::try_exists(&target).await.unwrap_or(false) {
        return Ok(Json(ConversionView {
            name,
            state: Some(ConversionState::Completed),
            progress: 100,
            target_url: url_of(&target),
        }));
    }

    if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
        return Err(LibraryError::NotFound(name).into());
    }
    Ok(Json(ConversionView {
        name,
        state: None,
        progress: 0,
        target_url: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::test_state;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_convert_then_poll() {
        let dir = tempdir().unwrap();
        let (state, _) = test_state(&dir).await;
        let source = state.library.dir().join("show.webm");
        std::fs::write(&source, b"media").unwrap();

        let (code, Json(view)) = convert(State(state.clone()), Path("show.webm".to_string()))
            .await
            .unwrap();
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(view.target_url.as_deref(), Some("/recordings/show.mp4"));

        tokio::time::timeout(Duration::from_secs(5), async {
            while state.conversions.job(&source).is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("conversion never finished");

        let Json(view) = conversion_status(State(state.clone()), Path("show.webm".to_string()))
            .await
            .unwrap();
        assert_eq!(view.state, Some(ConversionState::Completed));
        assert_eq!(view.progress, 100);
        assert!(!source.exists());

        // converting again reports the existing target
        std::fs::write(&source, b"media").unwrap();
        let (code, Json(view)) = convert(State(state.clone()), Path("show.webm".to_string()))
            .await
            .unwrap();
        assert_eq!(code, StatusCode::OK);
        assert_eq!(view.state, Some(ConversionState::Completed));

        let err = convert(State(state), Path("show.mp4".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_of_unknown_recording() {
        let dir = tempdir().unwrap();
        let (state, _) = test_state(&dir).await;

        let err = conversion_status(State(state.clone()), Path("nope.webm".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = conversion_status(State(state), Path("../etc.webm".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_live_recording_is_protected() {
        let dir = tempdir().unwrap();
        let (state, _) = test_state(&dir).await;
        let stream = state
            .registry
            .add("https://example.test/live".to_string(), Some("Live".to_string()))
            .await
            .unwrap();
        let session_id = state.sessions.start(&stream.id).await.unwrap();

        let Json(entries) = list(State(state.clone())).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_active);
        let name = entries[0].name.clone();

        let err = delete(State(state.clone()), Path(name.clone())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let err = convert(State(state.clone()), Path(name.clone())).await.unwrap_err();
        assert_eq!(err.code(), "RECORDING_ACTIVE");

        state.sessions.stop(&session_id).await.unwrap();

        let Json(updated) = update_metadata(
            State(state.clone()),
            Path(name.clone()),
            Json(json!({"title": "Finale"}).as_object().unwrap().clone()),
        )
        .await
        .unwrap();
        assert_eq!(updated["metadata"]["title"], "Finale");

        delete(State(state.clone()), Path(name)).await.unwrap();
        let Json(entries) = list(State(state)).await.unwrap();
        assert!(entries.is_empty());
    }
}
