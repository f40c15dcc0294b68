use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use shopmind::search::SearchError;
use shopmind::suggest::SuggestError;

use super::SHOPMIND_STATUS_HEADER;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing or invalid token")]
    Unauthorized,

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("{0} not loaded")]
    NotReady(&'static str),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("search failed: {0}")]
    SearchFailed(String),

    #[error("reload failed: {0}")]
    ReloadFailed(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<SuggestError> for GatewayError {
    fn from(err: SuggestError) -> Self {
        match err {
            SuggestError::InvalidParam { .. } => GatewayError::InvalidParam(err.to_string()),
            SuggestError::WordNotInVocab { .. } => GatewayError::InvalidRequest(err.to_string()),
            SuggestError::Model(_) => GatewayError::GenerationFailed(err.to_string()),
        }
    }
}

impl From<SearchError> for GatewayError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::IndexNotReady => GatewayError::NotReady("search index"),
            other => GatewayError::SearchFailed(other.to_string()),
        }
    }
}

#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, shopmind_status) = match &self {
            GatewayError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            GatewayError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            GatewayError::InvalidParam(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_param"),
            GatewayError::NotReady(_) => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            GatewayError::GenerationFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "generation_error")
            }
            GatewayError::SearchFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "search_error"),
            GatewayError::ReloadFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "reload_error"),
            GatewayError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            SHOPMIND_STATUS_HEADER,
            HeaderValue::from_static(shopmind_status),
        );

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
        });

        (status, headers, body).into_response()
    }
}
