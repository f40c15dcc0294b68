//! Router-level tests for the gateway handlers, driven with `tower::ServiceExt::oneshot`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, body::Body, http::Request, http::StatusCode, response::Response};
use candle_core::Device;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use shopmind::constants::{EOS_ID, SEP_ID};
use shopmind::generation::ScriptedLogits;
use shopmind::model::ModelError;
use shopmind::search::{SemanticSearchEngine, StubEmbedder, TextEmbedder};
use shopmind::suggest::{SuggestCache, SuggestError, SuggestionEngine};
use shopmind::text::TextTokenizer;
use shopmind::index::IndexKind;

use crate::gateway::handler::{ReloadResponse, SearchResponse, SuggestResponse};
use crate::gateway::{
    EngineLoader, HandlerState, HealthResponse, SHOPMIND_STATUS_HEADER, SearchEngine,
    create_router_with_state,
};

const TEST_TOKEN: &str = "letmein";

/// After `<SEP>` always emits `case`, then `<EOS>`.
fn phone_engine() -> SuggestionEngine<ScriptedLogits> {
    let mut tokenizer = TextTokenizer::new(100);
    tokenizer.build_vocab(["phone case"]);
    let vocab = tokenizer.len();
    let case = tokenizer.token_id("case").expect("case in vocab");
    let model = ScriptedLogits::new(vocab, 16, move |window| {
        let mut logits = vec![0.0; vocab];
        let next = if window.last() == Some(&SEP_ID) {
            case
        } else {
            EOS_ID
        };
        logits[next as usize] = 10.0;
        logits
    });
    SuggestionEngine::new(model, tokenizer)
}

/// Succeeds only when the checkpoint path exists.
struct ScriptedLoader;

impl EngineLoader<ScriptedLogits> for ScriptedLoader {
    fn load(&self, path: &Path) -> Result<SuggestionEngine<ScriptedLogits>, SuggestError> {
        if !path.exists() {
            return Err(ModelError::CheckpointNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        Ok(phone_engine())
    }
}

fn empty_state(model_path: &Path) -> HandlerState<ScriptedLogits> {
    HandlerState::new(
        Arc::new(ScriptedLoader),
        model_path.to_path_buf(),
        &Device::Cpu,
        SuggestCache::new(100, Duration::from_secs(60)),
    )
    .with_seed(Some(7))
}

fn ready_state() -> HandlerState<ScriptedLogits> {
    empty_state(Path::new("/nonexistent/item_desc_model_final")).with_engine(phone_engine())
}

fn stub_search_engine() -> SearchEngine {
    let embedder: Box<dyn TextEmbedder> = Box::new(StubEmbedder::new(16));
    let mut engine = SemanticSearchEngine::new(embedder, IndexKind::Flat);
    let texts: Vec<String> = ["红色连衣裙", "蓝牙耳机", "运动跑鞋"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    engine
        .build_index_from_texts(&texts, None, 8)
        .expect("index builds");
    engine
}

async fn send(router: &Router, method: &str, uri: &str, token: Option<&str>) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("token", token);
    }
    let request = builder.body(Body::empty()).unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("valid json body")
}

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_not_ready_without_model() {
        let router = create_router_with_state(empty_state(Path::new("missing_model")));
        let response = send(&router, "GET", "/health", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(SHOPMIND_STATUS_HEADER).unwrap(),
            "not_ready"
        );
        let health: HealthResponse = body_json(response).await;
        assert!(!health.ok);
        assert_eq!(health.device, "cpu");
        assert_eq!(health.model_path, "missing_model");
    }

    #[tokio::test]
    async fn test_health_ready_with_model() {
        let router = create_router_with_state(ready_state());
        let response = send(&router, "GET", "/health", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = body_json(response).await;
        assert!(health.ok);
    }

    #[tokio::test]
    async fn test_health_needs_no_token() {
        let state = ready_state().with_api_token(Some(TEST_TOKEN.to_string()));
        let router = create_router_with_state(state);
        let response = send(&router, "GET", "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

mod suggest_tests {
    use super::*;

    #[tokio::test]
    async fn test_suggest_returns_associations() {
        let router = create_router_with_state(ready_state());
        let response = send(&router, "GET", "/suggest?q=phone&n=2&temperature=0.1", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: SuggestResponse = body_json(response).await;
        assert_eq!(body.query, "phone");
        assert_eq!(body.suggestions, vec!["case"]);
    }

    #[tokio::test]
    async fn test_suggest_blank_query_is_empty() {
        let router = create_router_with_state(ready_state());
        let response = send(&router, "GET", "/suggest?q=%20%20", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: SuggestResponse = body_json(response).await;
        assert!(body.suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_suggest_missing_query_is_bad_request() {
        let router = create_router_with_state(ready_state());
        let response = send(&router, "GET", "/suggest?n=3", None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(SHOPMIND_STATUS_HEADER).unwrap(),
            "invalid_request"
        );
    }

    #[tokio::test]
    async fn test_suggest_out_of_range_params_are_unprocessable() {
        let router = create_router_with_state(ready_state());

        for uri in [
            "/suggest?q=phone&n=0",
            "/suggest?q=phone&n=21",
            "/suggest?q=phone&max_new_tokens=1",
            "/suggest?q=phone&max_new_tokens=33",
            "/suggest?q=phone&temperature=0.05",
            "/suggest?q=phone&temperature=1.6",
            "/suggest?q=phone&top_k=201",
            "/suggest?q=phone&n=lots",
        ] {
            let response = send(&router, "GET", uri, None).await;
            assert_eq!(
                response.status(),
                StatusCode::UNPROCESSABLE_ENTITY,
                "expected 422 for {uri}"
            );
        }
    }

    #[tokio::test]
    async fn test_suggest_boundary_params_are_accepted() {
        let router = create_router_with_state(ready_state());
        let response = send(
            &router,
            "GET",
            "/suggest?q=phone&n=20&max_new_tokens=2&temperature=1.5&top_k=0",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_suggest_without_model_is_unavailable() {
        let router = create_router_with_state(empty_state(Path::new("missing_model")));
        let response = send(&router, "GET", "/suggest?q=phone", None).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = body_json(response).await;
        assert_eq!(body["code"], 503);
    }

    #[tokio::test]
    async fn test_suggest_populates_cache() {
        let state = ready_state();
        let router = create_router_with_state(state.clone());

        let first = send(&router, "GET", "/suggest?q=phone&temperature=0.1", None).await;
        assert_eq!(first.status(), StatusCode::OK);
        state.cache.run_pending_tasks();
        assert_eq!(state.cache.len(), 1);

        let second = send(&router, "GET", "/suggest?q=phone&temperature=0.1", None).await;
        let body: SuggestResponse = body_json(second).await;
        assert_eq!(body.suggestions, vec!["case"]);
        state.cache.run_pending_tasks();
        assert_eq!(state.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_suggest_requires_matching_token() {
        let state = ready_state().with_api_token(Some(TEST_TOKEN.to_string()));
        let router = create_router_with_state(state);

        let missing = send(&router, "GET", "/suggest?q=phone", None).await;
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = send(&router, "GET", "/suggest?q=phone", Some("nope")).await;
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let right = send(&router, "GET", "/suggest?q=phone", Some(TEST_TOKEN)).await;
        assert_eq!(right.status(), StatusCode::OK);
    }
}

mod reload_tests {
    use super::*;

    #[tokio::test]
    async fn test_reload_failure_keeps_service_not_ready() {
        let state = empty_state(Path::new("/nonexistent/item_desc_model_final"));
        let router = create_router_with_state(state.clone());

        let response = send(&router, "POST", "/reload", None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(SHOPMIND_STATUS_HEADER).unwrap(),
            "reload_error"
        );
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_reload_recovers_and_clears_cache() {
        let dir = TempDir::new().unwrap();
        let state = empty_state(dir.path());
        let router = create_router_with_state(state.clone());

        let before = send(&router, "GET", "/suggest?q=phone", None).await;
        assert_eq!(before.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = send(&router, "POST", "/reload", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: ReloadResponse = body_json(response).await;
        assert!(body.ok);
        assert!(state.is_ready());

        let after = send(&router, "GET", "/suggest?q=phone&temperature=0.1", None).await;
        assert_eq!(after.status(), StatusCode::OK);
        state.cache.run_pending_tasks();
        assert_eq!(state.cache.len(), 1);

        let response = send(&router, "POST", "/reload", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        state.cache.run_pending_tasks();
        assert!(state.cache.is_empty());
    }

    #[test]
    fn test_response_from_replaced_engine_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let state = empty_state(dir.path()).with_engine(phone_engine());
        let params = shopmind::suggest::SuggestParams::default();
        let served_by = state.engine().unwrap();

        state.reload().unwrap();
        let suggestions = Arc::new(vec!["case".to_string()]);
        let stored = state.cache_if_current(&served_by, "phone", &params, Arc::clone(&suggestions));
        assert!(!stored);
        assert!(state.cache.get("phone", &params).is_none());

        let current = state.engine().unwrap();
        assert!(state.cache_if_current(&current, "phone", &params, suggestions));
        assert!(state.cache.get("phone", &params).is_some());
    }

    #[tokio::test]
    async fn test_reload_requires_token() {
        let dir = TempDir::new().unwrap();
        let state = empty_state(dir.path()).with_api_token(Some(TEST_TOKEN.to_string()));
        let router = create_router_with_state(state.clone());

        let response = send(&router, "POST", "/reload", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!state.is_ready());

        let response = send(&router, "POST", "/reload", Some(TEST_TOKEN)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reload_rejects_get() {
        let router = create_router_with_state(ready_state());
        let response = send(&router, "GET", "/reload", None).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}

mod search_tests {
    use super::*;

    #[tokio::test]
    async fn test_search_without_engine_is_unavailable() {
        let router = create_router_with_state(ready_state());
        let response = send(&router, "GET", "/search?q=test", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_search_finds_exact_text() {
        let state = ready_state().with_search(stub_search_engine());
        let router = create_router_with_state(state);

        let uri = "/search?q=%E8%93%9D%E7%89%99%E8%80%B3%E6%9C%BA&k=2";
        let response = send(&router, "GET", uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: SearchResponse = body_json(response).await;
        assert_eq!(body.query, "蓝牙耳机");
        assert!(!body.results.is_empty());
        assert!(body.results.len() <= 2);
        assert_eq!(body.results[0].text, "蓝牙耳机");
        assert_eq!(body.results[0].index, 1);
        assert!((body.results[0].score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_search_param_validation() {
        let state = ready_state().with_search(stub_search_engine());
        let router = create_router_with_state(state);

        let missing = send(&router, "GET", "/search?k=3", None).await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let zero_k = send(&router, "GET", "/search?q=x&k=0", None).await;
        assert_eq!(zero_k.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let threshold = send(&router, "GET", "/search?q=x&threshold=2", None).await;
        assert_eq!(threshold.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_search_requires_token() {
        let state = ready_state()
            .with_search(stub_search_engine())
            .with_api_token(Some(TEST_TOKEN.to_string()));
        let router = create_router_with_state(state);

        let response = send(&router, "GET", "/search?q=x", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&router, "GET", "/search?q=x", Some(TEST_TOKEN)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

mod error_tests {
    use super::*;
    use crate::gateway::GatewayError;
    use axum::response::IntoResponse;

    #[test]
    fn test_suggest_error_mapping() {
        let err: GatewayError = SuggestError::InvalidParam {
            name: "n",
            reason: "out of range".to_string(),
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);

        let err: GatewayError = SuggestError::Model(ModelError::InferenceFailed {
            reason: "boom".to_string(),
        })
        .into();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_not_ready_message() {
        let err = GatewayError::NotReady("model");
        assert_eq!(err.to_string(), "model not loaded");
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
