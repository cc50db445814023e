//! HTTP API
//!
//! JSON endpoints over the registry, session manager, conversions and the
//! recordings library, plus static serving of the recordings directory.

pub mod auth;
pub mod recordings;
pub mod sessions;
pub mod streams;

use crate::convert::ConversionCoordinator;
use crate::library::RecordingsLibrary;
use crate::recorder::SessionManager;
use crate::registry::StreamRegistry;
use axum::routing::{get, get_service, post, put};
use axum::{middleware, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared handles every handler can reach
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StreamRegistry>,
    pub sessions: Arc<SessionManager>,
    pub conversions: Arc<ConversionCoordinator>,
    pub library: Arc<RecordingsLibrary>,
    /// Bearer token; `None` leaves the API open
    pub api_token: Option<Arc<str>>,
}

/// Build the full application router
pub fn router(state: AppState) -> Router {
    let files = ServeDir::new(state.library.dir());

    let recordings = Router::new()
        .route("/", get(recordings::list))
        .route(
            "/{name}",
            get_service(files).delete(recordings::delete),
        )
        .route("/{name}/metadata", post(recordings::update_metadata))
        .route(
            "/{name}/convert",
            post(recordings::convert).get(recordings::conversion_status),
        );

    let api = Router::new()
        .route("/config", get(streams::get_config))
        .route("/config/streams", post(streams::add_stream))
        .route(
            "/config/streams/{id}",
            put(streams::update_stream).delete(streams::remove_stream),
        )
        .route("/start", post(sessions::start))
        .route("/stop", post(sessions::stop))
        .route("/status/{stream_id}", get(sessions::status))
        .route("/sessions", get(sessions::list))
        .route("/sessions/{session_id}", get(sessions::get))
        .nest("/recordings", recordings)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
