use super::*;
use serial_test::serial;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    // SAFETY: Test code only, env mutation is serialised with #[serial].
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }

    let result = f();

    // SAFETY: Test code only, env mutation is serialised with #[serial].
    for (key, _) in vars {
        unsafe { env::remove_var(key) };
    }

    result
}

fn clear_shopmind_env() {
    // SAFETY: Test code only, env mutation is serialised with #[serial].
    unsafe {
        env::remove_var("SHOPMIND_PORT");
        env::remove_var("SHOPMIND_BIND_ADDR");
        env::remove_var("SHOPMIND_MODEL_PATH");
        env::remove_var("SHOPMIND_ENCODER_PATH");
        env::remove_var("SHOPMIND_INDEX_PATH");
        env::remove_var("SHOPMIND_API_TOKEN");
        env::remove_var("SHOPMIND_CACHE_CAPACITY");
        env::remove_var("SHOPMIND_CACHE_TTL_SECS");
        env::remove_var("SHOPMIND_SEED");
    }
}

#[test]
fn test_default_config() {
    let config = ServiceConfig::default();

    assert_eq!(config.port, 8000);
    assert_eq!(
        config.bind_addr,
        IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1))
    );
    assert_eq!(config.model_path, PathBuf::from("item_desc_model_final"));
    assert!(config.encoder_path.is_none());
    assert!(config.index_path.is_none());
    assert!(config.api_token.is_none());
    assert_eq!(config.cache_capacity, 10_000);
    assert_eq!(config.cache_ttl(), std::time::Duration::from_secs(60));
    assert!(config.seed.is_none());
    assert!(!config.search_enabled());
}

#[test]
fn test_socket_addr() {
    let config = ServiceConfig::default();
    assert_eq!(config.socket_addr().to_string(), "127.0.0.1:8000");

    let config = ServiceConfig {
        port: 3000,
        bind_addr: IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        ..Default::default()
    };
    assert_eq!(config.socket_addr().to_string(), "0.0.0.0:3000");
}

#[test]
#[serial]
fn test_from_env_with_defaults() {
    clear_shopmind_env();

    let config = ServiceConfig::from_env().expect("should parse with defaults");

    assert_eq!(config.port, 8000);
    assert_eq!(config.model_path, PathBuf::from("item_desc_model_final"));
    assert!(config.api_token.is_none());
}

#[test]
#[serial]
fn test_from_env_custom_port() {
    clear_shopmind_env();

    with_env_vars(&[("SHOPMIND_PORT", "3000")], || {
        let config = ServiceConfig::from_env().expect("should parse");
        assert_eq!(config.port, 3000);
    });
}

#[test]
#[serial]
fn test_from_env_ipv6_bind_addr() {
    clear_shopmind_env();

    with_env_vars(&[("SHOPMIND_BIND_ADDR", "::1")], || {
        let config = ServiceConfig::from_env().expect("should parse");
        assert_eq!(
            config.bind_addr,
            IpAddr::V6(std::net::Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1))
        );
        let addr = config.socket_addr();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 8000);
        assert_eq!(addr.to_string(), "[::1]:8000");
    });
}

#[test]
#[serial]
fn test_invalid_port_zero() {
    clear_shopmind_env();

    with_env_vars(&[("SHOPMIND_PORT", "0")], || {
        let err = ServiceConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { .. }));
        assert!(err.to_string().contains("invalid port"));
    });
}

#[test]
#[serial]
fn test_invalid_port_not_number() {
    clear_shopmind_env();

    with_env_vars(&[("SHOPMIND_PORT", "not_a_port")], || {
        let err = ServiceConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::PortParseError { .. }));
        assert!(err.to_string().contains("failed to parse port"));
    });
}

#[test]
#[serial]
fn test_invalid_port_too_large() {
    clear_shopmind_env();

    with_env_vars(&[("SHOPMIND_PORT", "99999")], || {
        let err = ServiceConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::PortParseError { .. }));
    });
}

#[test]
#[serial]
fn test_invalid_bind_addr() {
    clear_shopmind_env();

    with_env_vars(&[("SHOPMIND_BIND_ADDR", "not.an.ip.address")], || {
        let err = ServiceConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));
    });
}

#[test]
#[serial]
fn test_full_config_parse() {
    clear_shopmind_env();

    with_env_vars(
        &[
            ("SHOPMIND_PORT", "8080"),
            ("SHOPMIND_BIND_ADDR", "0.0.0.0"),
            ("SHOPMIND_MODEL_PATH", "/models/item_desc_model_epoch_3"),
            ("SHOPMIND_ENCODER_PATH", "/models/sentence_encoder_final"),
            ("SHOPMIND_INDEX_PATH", "/data/products.idx"),
            ("SHOPMIND_API_TOKEN", "s3cret"),
            ("SHOPMIND_CACHE_CAPACITY", "500"),
            ("SHOPMIND_CACHE_TTL_SECS", "5"),
            ("SHOPMIND_SEED", "7"),
        ],
        || {
            let config = ServiceConfig::from_env().expect("should parse full config");

            assert_eq!(config.socket_addr().to_string(), "0.0.0.0:8080");
            assert_eq!(
                config.model_path,
                PathBuf::from("/models/item_desc_model_epoch_3")
            );
            assert_eq!(
                config.encoder_path,
                Some(PathBuf::from("/models/sentence_encoder_final"))
            );
            assert_eq!(config.index_path, Some(PathBuf::from("/data/products.idx")));
            assert_eq!(config.api_token.as_deref(), Some("s3cret"));
            assert_eq!(config.cache_capacity, 500);
            assert_eq!(config.cache_ttl_secs, 5);
            assert_eq!(config.seed, Some(7));
            assert!(config.search_enabled());
        },
    );
}

#[test]
#[serial]
fn test_blank_optional_values_are_ignored() {
    clear_shopmind_env();

    with_env_vars(
        &[
            ("SHOPMIND_API_TOKEN", "   "),
            ("SHOPMIND_ENCODER_PATH", ""),
            ("SHOPMIND_MODEL_PATH", " "),
        ],
        || {
            let config = ServiceConfig::from_env().expect("should parse");
            assert!(config.api_token.is_none());
            assert!(config.encoder_path.is_none());
            assert_eq!(config.model_path, PathBuf::from("item_desc_model_final"));
        },
    );
}

#[test]
#[serial]
fn test_invalid_cache_capacity_uses_default() {
    clear_shopmind_env();

    with_env_vars(&[("SHOPMIND_CACHE_CAPACITY", "lots")], || {
        let config = ServiceConfig::from_env().expect("should parse with fallback");
        assert_eq!(config.cache_capacity, 10_000);
    });
}

#[test]
#[serial]
fn test_invalid_seed_is_rejected() {
    clear_shopmind_env();

    with_env_vars(&[("SHOPMIND_SEED", "-1")], || {
        let err = ServiceConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                name: "SHOPMIND_SEED",
                ..
            }
        ));
    });
}

#[test]
fn test_validate_missing_paths_are_allowed() {
    let config = ServiceConfig {
        model_path: PathBuf::from("/nonexistent/item_desc_model_final"),
        encoder_path: Some(PathBuf::from("/nonexistent/encoder")),
        index_path: Some(PathBuf::from("/nonexistent/products.idx")),
        ..Default::default()
    };

    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_model_path_is_file() {
    let config = ServiceConfig {
        model_path: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml"),
        ..Default::default()
    };

    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::NotADirectory { .. }));
}

#[test]
fn test_validate_encoder_path_is_file() {
    let config = ServiceConfig {
        model_path: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src"),
        encoder_path: Some(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml")),
        ..Default::default()
    };

    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::NotADirectory { .. }));
}

#[test]
fn test_validate_index_path_is_directory() {
    let config = ServiceConfig {
        index_path: Some(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src")),
        ..Default::default()
    };

    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::NotAFile { .. }));
}

#[test]
fn test_validate_success_with_valid_paths() {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

    let config = ServiceConfig {
        model_path: manifest_dir.join("src"),
        encoder_path: Some(manifest_dir.join("src")),
        index_path: Some(manifest_dir.join("Cargo.toml")),
        ..Default::default()
    };

    assert!(config.validate().is_ok());
}

#[test]
fn test_error_messages_are_descriptive() {
    let err = ConfigError::InvalidPort {
        value: "0".to_string(),
    };
    assert!(err.to_string().contains("1 and 65535"));

    let err = ConfigError::NotAFile {
        path: PathBuf::from("/some/path"),
    };
    assert!(err.to_string().contains("/some/path"));
}
