//! Integration test: VtestConfig loading
//!
//! Run with: cargo test -p vtest-core --test config_test -- --nocapture

use std::path::PathBuf;

use vtest_core::config::{RENDERER_NAME_ENV, SOCKET_NAME_ENV};
use vtest_core::{CoreError, VtestConfig};

fn write_config(tag: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("vtest-{}-{}.toml", tag, std::process::id()));
    std::fs::write(&path, content).expect("write config");
    path
}

#[test]
fn test_defaults() {
    let config = VtestConfig::default();
    assert_eq!(config.socket_path, "/tmp/.virgl_test");
    assert_eq!(config.renderer_name, None);
    assert_eq!(config.protocol_version, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_partial_file() {
    let path = write_config("partial", "renderer_name = \"vkcube\"\n");
    let config = VtestConfig::load(path.to_str().unwrap()).expect("load");
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.renderer_name.as_deref(), Some("vkcube"));
    assert_eq!(config.socket_path, "/tmp/.virgl_test");
    assert_eq!(config.resolved_renderer_name(), "vkcube");
}

#[test]
fn test_load_full_file() {
    let path = write_config(
        "full",
        r#"
socket_path = "/run/vtest/render.sock"
renderer_name = "smoke"
protocol_version = 4
"#,
    );
    let config = VtestConfig::load(path.to_str().unwrap()).expect("load");
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.socket_path, "/run/vtest/render.sock");
    assert_eq!(config.requested_protocol_version(), 4);
}

#[test]
fn test_protocol_version_never_below_minimum() {
    let config = VtestConfig {
        protocol_version: 1,
        ..Default::default()
    };
    assert_eq!(config.requested_protocol_version(), 3);
}

#[test]
fn test_rejects_bad_socket_paths() {
    let path = write_config("empty-socket", "socket_path = \"\"\n");
    let err = VtestConfig::load(path.to_str().unwrap()).unwrap_err();
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(err, CoreError::ConfigError(_)));

    let config = VtestConfig {
        socket_path: format!("/tmp/{}", "x".repeat(200)),
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(CoreError::ConfigError(_))));
}

#[test]
fn test_parse_error() {
    let path = write_config("garbage", "socket_path = [\n");
    let err = VtestConfig::load(path.to_str().unwrap()).unwrap_err();
    std::fs::remove_file(&path).unwrap();
    println!("parse error: {}", err);
    assert!(matches!(err, CoreError::Parse(_)));
}

#[test]
fn test_load_or_default_missing_file() {
    let config = VtestConfig::load_or_default("/nonexistent/vtest.toml");
    assert_eq!(config, VtestConfig::default());
}

#[test]
fn test_env_overrides() {
    // the only test touching these variables
    std::env::set_var(SOCKET_NAME_ENV, "/tmp/vtest-env.sock");
    std::env::set_var(RENDERER_NAME_ENV, "from-env");
    let config = VtestConfig::default().with_env_overrides();
    std::env::remove_var(SOCKET_NAME_ENV);
    std::env::remove_var(RENDERER_NAME_ENV);

    assert_eq!(config.socket_path, "/tmp/vtest-env.sock");
    assert_eq!(config.renderer_name.as_deref(), Some("from-env"));
}

#[test]
fn test_renderer_name_falls_back_to_process_name() {
    let config = VtestConfig::default();
    let name = config.resolved_renderer_name();
    println!("resolved renderer name: {}", name);
    assert!(!name.is_empty());
}
