//! HTTP gateway (Axum) for suggestions, model reloads and semantic search.
//!
//! This module is primarily used by the `shopmind-server` binary.

pub mod error;
pub mod handler;
pub mod state;

#[cfg(test)]
mod handler_tests;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

pub use error::GatewayError;
pub use handler::{TOKEN_HEADER, reload_handler, search_handler, suggest_handler};
pub use state::{CheckpointLoader, EngineLoader, HandlerState, SearchEngine};

use shopmind::generation::NextTokenLogits;

/// Response header summarising how a request was served.
pub const SHOPMIND_STATUS_HEADER: &str = "x-shopmind-status";
pub const SHOPMIND_STATUS_READY: &str = "ready";
pub const SHOPMIND_STATUS_NOT_READY: &str = "not_ready";

pub fn create_router_with_state<M>(state: HandlerState<M>) -> Router
where
    M: NextTokenLogits + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_handler::<M>))
        .route("/suggest", get(suggest_handler::<M>))
        .route("/reload", post(reload_handler::<M>))
        .route("/search", get(search_handler::<M>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `true` once the language model is loaded.
    pub ok: bool,
    pub device: String,
    pub model_path: String,
}

#[tracing::instrument(skip(state))]
pub async fn health_handler<M>(State(state): State<HandlerState<M>>) -> Response
where
    M: NextTokenLogits + Send + Sync + 'static,
{
    let ok = state.is_ready();
    let mut headers = HeaderMap::new();
    headers.insert(
        SHOPMIND_STATUS_HEADER,
        HeaderValue::from_static(if ok {
            SHOPMIND_STATUS_READY
        } else {
            SHOPMIND_STATUS_NOT_READY
        }),
    );

    (
        StatusCode::OK,
        headers,
        Json(HealthResponse {
            ok,
            device: state.device.to_string(),
            model_path: state.model_path.display().to_string(),
        }),
    )
        .into_response()
}
