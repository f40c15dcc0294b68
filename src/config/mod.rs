//! Environment-backed service configuration.
//!
//! Every setting has a default. Override with `SHOPMIND_*` environment variables.

pub mod error;

#[cfg(test)]
mod tests;

pub use error::ConfigError;

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::suggest::cache::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
use crate::training::lm_trainer::FINAL_CHECKPOINT;

/// Suggestion service configuration loaded from environment variables.
///
/// Use [`ServiceConfig::from_env`] to read `SHOPMIND_*` overrides on top of defaults.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP server port. Default: `8000`.
    pub port: u16,

    /// IP address to bind to. Default: `127.0.0.1`.
    pub bind_addr: IpAddr,

    /// LM checkpoint directory. Default: `item_desc_model_final`.
    pub model_path: PathBuf,

    /// Sentence encoder checkpoint directory, enables `/search`.
    pub encoder_path: Option<PathBuf>,

    /// Vector index snapshot searched by `/search`.
    pub index_path: Option<PathBuf>,

    /// When set, protected routes require a matching `token` header.
    pub api_token: Option<String>,

    /// Max cached suggestion responses. Default: `10_000`.
    pub cache_capacity: u64,

    /// Seconds a cached response stays valid. Default: `60`.
    pub cache_ttl_secs: u64,

    /// Fixed sampling seed. Unseeded sampling when absent.
    pub seed: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_addr: IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
            model_path: PathBuf::from(FINAL_CHECKPOINT),
            encoder_path: None,
            index_path: None,
            api_token: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            seed: None,
        }
    }
}

impl ServiceConfig {
    const ENV_PORT: &'static str = "SHOPMIND_PORT";
    const ENV_BIND_ADDR: &'static str = "SHOPMIND_BIND_ADDR";
    const ENV_MODEL_PATH: &'static str = "SHOPMIND_MODEL_PATH";
    const ENV_ENCODER_PATH: &'static str = "SHOPMIND_ENCODER_PATH";
    const ENV_INDEX_PATH: &'static str = "SHOPMIND_INDEX_PATH";
    const ENV_API_TOKEN: &'static str = "SHOPMIND_API_TOKEN";
    const ENV_CACHE_CAPACITY: &'static str = "SHOPMIND_CACHE_CAPACITY";
    const ENV_CACHE_TTL_SECS: &'static str = "SHOPMIND_CACHE_TTL_SECS";
    const ENV_SEED: &'static str = "SHOPMIND_SEED";

    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = Self::parse_port_from_env(defaults.port)?;
        let bind_addr = Self::parse_bind_addr_from_env(defaults.bind_addr)?;
        let model_path = Self::parse_path_from_env(Self::ENV_MODEL_PATH, defaults.model_path);
        let encoder_path = Self::parse_optional_path_from_env(Self::ENV_ENCODER_PATH);
        let index_path = Self::parse_optional_path_from_env(Self::ENV_INDEX_PATH);
        let api_token = Self::parse_optional_string_from_env(Self::ENV_API_TOKEN);
        let cache_capacity =
            Self::parse_u64_from_env(Self::ENV_CACHE_CAPACITY, defaults.cache_capacity);
        let cache_ttl_secs =
            Self::parse_u64_from_env(Self::ENV_CACHE_TTL_SECS, defaults.cache_ttl_secs);
        let seed = Self::parse_optional_string_from_env(Self::ENV_SEED)
            .map(|value| {
                value
                    .parse()
                    .map_err(|e| ConfigError::InvalidNumber {
                        name: Self::ENV_SEED,
                        value,
                        source: e,
                    })
            })
            .transpose()?;

        Ok(Self {
            port,
            bind_addr,
            model_path,
            encoder_path,
            index_path,
            api_token,
            cache_capacity,
            cache_ttl_secs,
            seed,
        })
    }

    /// Checks the kinds of paths that exist. Missing paths are allowed so the
    /// service can start not-ready and recover through `/reload`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_path.exists() && !self.model_path.is_dir() {
            return Err(ConfigError::NotADirectory {
                path: self.model_path.clone(),
            });
        }

        if let Some(ref path) = self.encoder_path
            && path.exists()
            && !path.is_dir()
        {
            return Err(ConfigError::NotADirectory { path: path.clone() });
        }

        if let Some(ref path) = self.index_path
            && path.exists()
            && !path.is_file()
        {
            return Err(ConfigError::NotAFile { path: path.clone() });
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Search needs both an encoder and an index.
    pub fn search_enabled(&self) -> bool {
        self.encoder_path.is_some() && self.index_path.is_some()
    }

    fn parse_port_from_env(default: u16) -> Result<u16, ConfigError> {
        match env::var(Self::ENV_PORT) {
            Ok(value) => {
                let port: u16 = value.parse().map_err(|e| ConfigError::PortParseError {
                    value: value.clone(),
                    source: e,
                })?;

                if port == 0 {
                    return Err(ConfigError::InvalidPort { value });
                }

                Ok(port)
            }
            Err(_) => Ok(default),
        }
    }

    fn parse_bind_addr_from_env(default: IpAddr) -> Result<IpAddr, ConfigError> {
        match env::var(Self::ENV_BIND_ADDR) {
            Ok(value) => value
                .parse()
                .map_err(|e| ConfigError::InvalidBindAddr { value, source: e }),
            Err(_) => Ok(default),
        }
    }

    fn parse_path_from_env(var_name: &str, default: PathBuf) -> PathBuf {
        Self::parse_optional_path_from_env(var_name).unwrap_or(default)
    }

    fn parse_optional_path_from_env(var_name: &str) -> Option<PathBuf> {
        Self::parse_optional_string_from_env(var_name).map(PathBuf::from)
    }

    fn parse_optional_string_from_env(var_name: &str) -> Option<String> {
        env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_u64_from_env(var_name: &str, default: u64) -> u64 {
        env::var(var_name)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}
