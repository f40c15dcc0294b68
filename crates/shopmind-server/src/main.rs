//! ShopMind HTTP server entrypoint.

use std::sync::Arc;
use std::time::Duration;

use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tokio::signal;

use shopmind::config::ServiceConfig;
use shopmind::index::IndexKind;
use shopmind::search::{EncoderEmbedder, SemanticSearchEngine, TextEmbedder};
use shopmind::select_device;
use shopmind::suggest::SuggestCache;
use shopmind_server::gateway::{
    CheckpointLoader, HandlerState, SearchEngine, create_router_with_state,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "--health-check") {
        std::process::exit(run_health_check());
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServiceConfig::from_env()?;
    config.validate()?;
    let addr = config.socket_addr();

    tracing::info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        model_path = %config.model_path.display(),
        "ShopMind starting"
    );

    let device = select_device()?;
    let loader = CheckpointLoader::new(device.clone());
    let cache = SuggestCache::new(config.cache_capacity, config.cache_ttl());

    let mut state: HandlerState = HandlerState::new(Arc::new(loader), config.model_path.clone(), &device, cache)
        .with_api_token(config.api_token.clone())
        .with_seed(config.seed);

    if let Err(e) = state.reload() {
        tracing::warn!(error = %e, "Failed to load model. Starting not-ready; POST /reload to retry.");
    } else {
        tracing::info!("Model loaded.");
    }

    match load_search_engine(&config, &device) {
        Ok(Some(search)) => {
            tracing::info!(stats = ?search.stats(), "Semantic search enabled");
            state = state.with_search(search);
        }
        Ok(None) => tracing::info!("No encoder/index configured, /search disabled"),
        Err(e) => tracing::warn!(error = %e, "Failed to load search engine, /search disabled"),
    }

    let app = create_router_with_state(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("ShopMind shutdown complete");
    Ok(())
}

fn load_search_engine(
    config: &ServiceConfig,
    device: &candle_core::Device,
) -> anyhow::Result<Option<SearchEngine>> {
    let (Some(encoder_path), Some(index_path)) = (&config.encoder_path, &config.index_path) else {
        return Ok(None);
    };

    let embedder: Box<dyn TextEmbedder> = Box::new(EncoderEmbedder::load(encoder_path, device)?);
    let mut engine = SemanticSearchEngine::new(embedder, IndexKind::Flat);
    engine.load_index(index_path)?;
    Ok(Some(engine))
}

fn run_health_check() -> i32 {
    let port = std::env::var("SHOPMIND_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8000);

    let url = format!("http://127.0.0.1:{}/health", port);

    let Ok(rt) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return 1;
    };

    rt.block_on(async {
        let Ok(client) = reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
        else {
            return 1;
        };

        match client.get(&url).send().await {
            Ok(res) if res.status().is_success() => 0,
            _ => 1,
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
