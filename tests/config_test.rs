//! Tests for configuration loading
//!
//! Environment tests mutate process-wide state and run serially.

use std::io::Write;
use std::path::Path;

use memberwatch::action::InvalidUriPolicy;
use memberwatch::config::{Config, ConfigError};
use memberwatch::discovery::ResyncPolicy;
use serial_test::serial;
use tempfile::NamedTempFile;

const ENV_VARS: &[&str] = &[
    "MEMBERWATCH_CONNECTION_STRING",
    "MEMBERWATCH_MEMBER_PATH",
    "MEMBERWATCH_WAKE_TIMEOUT_SECS",
    "MEMBERWATCH_EVENT_CAPACITY",
    "MEMBERWATCH_RESYNC_POLICY",
    "MEMBERWATCH_CREATE_PATH",
    "MEMBERWATCH_URL_TEMPLATE",
    "MEMBERWATCH_INVALID_URI_POLICY",
    "MEMBERWATCH_BIND_ADDRESS",
    "MEMBERWATCH_PORT",
    "MEMBERWATCH_LOG_LEVEL",
    "MEMBERWATCH_LOG_FORMAT",
];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

fn write_toml(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

// ============================================================================
// File
// ============================================================================

#[test]
fn test_shipped_config_is_valid() {
    let config = Config::from_file(Path::new("config.toml")).expect("config.toml should parse");
    config.validate().expect("config.toml should validate");

    assert_eq!(config.discovery.member_path, "/discovery/stream");
    assert_eq!(config.mapping.url_template, "http://{HOSTNAME}/turbine.stream");
    assert_eq!(config.server.bind_address.port(), 8888);
}

#[test]
fn test_from_file_full() {
    let file = write_toml(
        r#"
[discovery]
connection_string = "file:///var/lib/memberwatch"
member_path = "/services/api"
wake_timeout_secs = 30
resync_policy = "reset_baseline"

[mapping]
url_template = "https://{HOSTNAME}/hystrix.stream"
invalid_uri_policy = "terminate"

[server]
bind_address = "127.0.0.1:9000"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.discovery.connection_string, "file:///var/lib/memberwatch");
    assert_eq!(config.discovery.wake_timeout_secs, 30);
    assert_eq!(config.discovery.resync_policy, ResyncPolicy::ResetBaseline);
    assert_eq!(config.mapping.invalid_uri_policy, InvalidUriPolicy::Terminate);
    assert_eq!(config.server.bind_address.to_string(), "127.0.0.1:9000");
    // untouched sections keep defaults
    assert_eq!(config.logging.format, "text");
    assert!(config.server.enable_cors);
}

#[test]
fn test_from_file_missing() {
    let result = Config::from_file(Path::new("/nonexistent/memberwatch.toml"));
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn test_from_file_malformed() {
    let file = write_toml("[discovery\nmember_path = ");
    let result = Config::from_file(file.path());
    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

#[test]
fn test_from_file_unknown_policy() {
    let file = write_toml(
        r#"
[discovery]
member_path = "/service"
resync_policy = "sometimes"
"#,
    );
    assert!(matches!(
        Config::from_file(file.path()),
        Err(ConfigError::Parse { .. })
    ));
}

// ============================================================================
// Environment
// ============================================================================

#[test]
#[serial]
fn test_from_env() {
    clear_env();
    std::env::set_var("MEMBERWATCH_MEMBER_PATH", "/services/stream");
    std::env::set_var("MEMBERWATCH_RESYNC_POLICY", "reset");
    std::env::set_var("MEMBERWATCH_INVALID_URI_POLICY", "fail");
    std::env::set_var("MEMBERWATCH_PORT", "9100");
    std::env::set_var("MEMBERWATCH_CREATE_PATH", "true");

    let config = Config::from_env().unwrap();
    clear_env();

    config.validate().unwrap();
    assert_eq!(config.discovery.member_path, "/services/stream");
    assert_eq!(config.discovery.resync_policy, ResyncPolicy::ResetBaseline);
    assert_eq!(config.mapping.invalid_uri_policy, InvalidUriPolicy::Terminate);
    assert_eq!(config.server.bind_address.port(), 9100);
    assert!(config.discovery.create_path);
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let file = write_toml(
        r#"
[discovery]
member_path = "/from/file"
"#,
    );
    std::env::set_var("MEMBERWATCH_MEMBER_PATH", "/from/env");

    let mut config = Config::from_file(file.path()).unwrap();
    config.apply_env().unwrap();
    clear_env();

    assert_eq!(config.discovery.member_path, "/from/env");
}

#[test]
#[serial]
fn test_env_invalid_number() {
    clear_env();
    std::env::set_var("MEMBERWATCH_WAKE_TIMEOUT_SECS", "soon");

    let result = Config::from_env();
    clear_env();

    match result {
        Err(ConfigError::InvalidValue { field, .. }) => {
            assert_eq!(field, "MEMBERWATCH_WAKE_TIMEOUT_SECS");
        }
        other => panic!("expected invalid value, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_empty_env_is_ignored() {
    clear_env();
    std::env::set_var("MEMBERWATCH_URL_TEMPLATE", "");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.mapping.url_template, "http://{HOSTNAME}/turbine.stream");
}

// ============================================================================
// Builder
// ============================================================================

#[test]
fn test_builder_over_base() {
    let mut base = Config::default();
    base.discovery.member_path = "/base".to_string();
    base.logging.level = "debug".to_string();

    let config = Config::builder()
        .base(base)
        .url_template("http://{HOSTNAME}:8080/hystrix.stream")
        .port(7000)
        .build()
        .unwrap();

    assert_eq!(config.discovery.member_path, "/base");
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.server.bind_address.port(), 7000);
    assert_eq!(
        config.mapping.template().unwrap().render("10.0.0.5").unwrap().as_str(),
        "http://10.0.0.5:8080/hystrix.stream"
    );
}

#[test]
fn test_builder_rejects_template_without_marker() {
    let result = Config::builder()
        .member_path("/service")
        .url_template("http://localhost/stream")
        .build();

    match result {
        Err(ConfigError::InvalidValue { field, reason }) => {
            assert_eq!(field, "mapping.url_template");
            assert!(reason.contains("{HOSTNAME}"));
        }
        other => panic!("expected invalid template, got {other:?}"),
    }
}

#[test]
fn test_builder_requires_member_path() {
    assert!(matches!(
        Config::builder().build(),
        Err(ConfigError::MissingField { .. })
    ));
    assert!(matches!(
        Config::builder().member_path("/a//b").build(),
        Err(ConfigError::InvalidValue { .. })
    ));
}
