//! Test server harness.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use candle_core::Device;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use shopmind::model::{ItemDescLm, LmConfig, StackConfig};
use shopmind::suggest::SuggestCache;
use shopmind::text::TextTokenizer;
use shopmind_server::gateway::{CheckpointLoader, HandlerState, create_router_with_state};

const STARTUP_WAIT_TIMEOUT_SECS: u64 = 5;
const STARTUP_POLL_INTERVAL_MS: u64 = 50;

pub const CHECKPOINT_DIR: &str = "item_desc_model_final";

#[derive(Debug, Clone, Default)]
pub struct TestServerConfig {
    /// Write a tiny random checkpoint before starting so the model loads at startup.
    pub with_checkpoint: bool,
    pub api_token: Option<String>,
    pub seed: Option<u64>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: HandlerState,
    _server_handle: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    temp_dir: TempDir,
}

impl TestServer {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn model_path(&self) -> PathBuf {
        self.temp_dir.path().join(CHECKPOINT_DIR)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerStartupError {
    #[error("Server failed to start within timeout")]
    Timeout,
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
    #[error("Server startup failed: {0}")]
    StartupFailed(String),
}

pub async fn wait_for_server_ready(
    addr: SocketAddr,
    timeout: Duration,
    interval: Duration,
) -> Result<(), ServerStartupError> {
    let start = std::time::Instant::now();

    loop {
        if start.elapsed() > timeout {
            return Err(ServerStartupError::Timeout);
        }

        match tokio::net::TcpStream::connect(addr).await {
            Ok(_) => return Ok(()),
            Err(_) => {
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Saves a randomly initialised two-layer LM with a small product vocabulary.
pub fn write_tiny_checkpoint(dir: &Path) -> Result<(), ServerStartupError> {
    let mut tokenizer = TextTokenizer::new(200);
    tokenizer.build_vocab([
        "智能手机 高清 屏幕 大 内存",
        "手机壳 防摔 硅胶 透明",
        "蓝牙耳机 降噪 长 续航",
    ]);

    let config = LmConfig::default()
        .with_vocab_size(tokenizer.len())
        .with_max_seq_length(32)
        .with_stack(StackConfig {
            d_model: 16,
            nhead: 2,
            num_layers: 1,
            dim_feedforward: 32,
            dropout: 0.0,
        });
    let (model, varmap) = ItemDescLm::init(config, &Device::Cpu)
        .map_err(|e| ServerStartupError::StartupFailed(e.to_string()))?;
    model
        .save(dir, &tokenizer, &varmap, None)
        .map_err(|e| ServerStartupError::StartupFailed(e.to_string()))
}

/// Spawns the real router with a checkpoint loader on an ephemeral port.
pub async fn spawn_test_server(config: TestServerConfig) -> Result<TestServer, ServerStartupError> {
    let temp_dir = TempDir::new()?;
    let model_path = temp_dir.path().join(CHECKPOINT_DIR);
    if config.with_checkpoint {
        write_tiny_checkpoint(&model_path)?;
    }

    let device = Device::Cpu;
    let state: HandlerState = HandlerState::new(
        Arc::new(CheckpointLoader::new(device.clone())),
        model_path,
        &device,
        SuggestCache::new(100, Duration::from_secs(60)),
    )
    .with_api_token(config.api_token)
    .with_seed(config.seed);

    if config.with_checkpoint {
        state
            .reload()
            .map_err(|e| ServerStartupError::StartupFailed(e.to_string()))?;
    }

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let local_addr = listener.local_addr()?;
    let app = create_router_with_state(state.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    wait_for_server_ready(
        local_addr,
        Duration::from_secs(STARTUP_WAIT_TIMEOUT_SECS),
        Duration::from_millis(STARTUP_POLL_INTERVAL_MS),
    )
    .await?;

    Ok(TestServer {
        addr: local_addr,
        state,
        _server_handle: server_handle,
        shutdown_tx: Some(shutdown_tx),
        temp_dir,
    })
}
