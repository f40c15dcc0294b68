use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use shopmind::constants::{DEFAULT_SEARCH_K, DEFAULT_SEARCH_THRESHOLD};
use shopmind::generation::NextTokenLogits;
use shopmind::index::SearchHit;
use shopmind::suggest::SuggestParams;

use crate::gateway::error::GatewayError;
use crate::gateway::state::HandlerState;

/// Request header carrying the shared API token.
pub const TOKEN_HEADER: &str = "token";

pub const MAX_SEARCH_K: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct SuggestQuery {
    pub q: Option<String>,
    pub n: Option<usize>,
    pub max_new_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub top_k: Option<usize>,
}

impl SuggestQuery {
    /// Given values over the defaults. Range checks happen in [`SuggestParams::validate`].
    pub fn params(&self) -> SuggestParams {
        let defaults = SuggestParams::default();
        SuggestParams {
            n: self.n.unwrap_or(defaults.n),
            max_new_tokens: self.max_new_tokens.unwrap_or(defaults.max_new_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_k: self.top_k.unwrap_or(defaults.top_k),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestResponse {
    pub query: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub k: Option<usize>,
    pub threshold: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub ok: bool,
    pub msg: String,
}

/// Passes when no token is configured or the `token` header matches it.
pub(crate) fn authorize<M>(state: &HandlerState<M>, headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(());
    };

    match headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        Some(given) if given == expected => Ok(()),
        _ => {
            debug!("Rejected request with missing or wrong token");
            Err(GatewayError::Unauthorized)
        }
    }
}

fn join_error(err: tokio::task::JoinError) -> GatewayError {
    GatewayError::InternalError(format!("worker task failed: {err}"))
}

#[instrument(skip(state, headers, query), fields(cached = tracing::field::Empty))]
pub async fn suggest_handler<M>(
    State(state): State<HandlerState<M>>,
    headers: HeaderMap,
    query: Result<Query<SuggestQuery>, QueryRejection>,
) -> Result<Json<SuggestResponse>, GatewayError>
where
    M: NextTokenLogits + Send + Sync + 'static,
{
    authorize(&state, &headers)?;
    let Query(query) = query.map_err(|e| GatewayError::InvalidParam(e.body_text()))?;
    let q = query
        .q
        .clone()
        .ok_or_else(|| GatewayError::InvalidRequest("missing query parameter 'q'".to_string()))?;
    let params = query.params();
    params.validate()?;

    let engine = state.engine().ok_or(GatewayError::NotReady("model"))?;

    if let Some(hit) = state.cache.get(&q, &params) {
        tracing::Span::current().record("cached", true);
        return Ok(Json(SuggestResponse {
            query: q,
            suggestions: hit.as_ref().clone(),
        }));
    }
    tracing::Span::current().record("cached", false);

    let mut rng = state.request_rng();
    let served_by = Arc::clone(&engine);
    let (q, result) = tokio::task::spawn_blocking(move || {
        let result = engine.suggest(&q, &params, &mut rng);
        (q, result)
    })
    .await
    .map_err(join_error)?;

    let suggestions = Arc::new(result?);
    if !state.cache_if_current(&served_by, &q, &params, Arc::clone(&suggestions)) {
        debug!("Engine reloaded mid-request, response not cached");
    }

    Ok(Json(SuggestResponse {
        query: q,
        suggestions: suggestions.as_ref().clone(),
    }))
}

#[instrument(skip(state, headers))]
pub async fn reload_handler<M>(
    State(state): State<HandlerState<M>>,
    headers: HeaderMap,
) -> Result<Json<ReloadResponse>, GatewayError>
where
    M: NextTokenLogits + Send + Sync + 'static,
{
    authorize(&state, &headers)?;

    let worker = state.clone();
    tokio::task::spawn_blocking(move || worker.reload())
        .await
        .map_err(join_error)?
        .map_err(|e| {
            warn!(path = %state.model_path.display(), error = %e, "Model reload failed");
            GatewayError::ReloadFailed(e.to_string())
        })?;

    info!(path = %state.model_path.display(), "Model reloaded");
    Ok(Json(ReloadResponse {
        ok: true,
        msg: format!("model reloaded from {}", state.model_path.display()),
    }))
}

#[instrument(skip(state, headers, query))]
pub async fn search_handler<M>(
    State(state): State<HandlerState<M>>,
    headers: HeaderMap,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<SearchResponse>, GatewayError>
where
    M: NextTokenLogits + Send + Sync + 'static,
{
    authorize(&state, &headers)?;
    let Query(query) = query.map_err(|e| GatewayError::InvalidParam(e.body_text()))?;
    let q = query
        .q
        .ok_or_else(|| GatewayError::InvalidRequest("missing query parameter 'q'".to_string()))?;
    let k = query.k.unwrap_or(DEFAULT_SEARCH_K);
    if !(1..=MAX_SEARCH_K).contains(&k) {
        return Err(GatewayError::InvalidParam(format!(
            "k must be within 1..={MAX_SEARCH_K}, got {k}"
        )));
    }
    let threshold = query.threshold.unwrap_or(DEFAULT_SEARCH_THRESHOLD);
    if !(-1.0..=1.0).contains(&threshold) {
        return Err(GatewayError::InvalidParam(format!(
            "threshold must be within -1..=1, got {threshold}"
        )));
    }

    let search = state
        .search
        .clone()
        .ok_or(GatewayError::NotReady("search engine"))?;

    let (q, result) = tokio::task::spawn_blocking(move || {
        let result = search.search(&q, k, threshold);
        (q, result)
    })
    .await
    .map_err(join_error)?;

    Ok(Json(SearchResponse {
        query: q,
        results: result?,
    }))
}
