//! Configuration management for memberwatch
//!
//! Configuration is layered: defaults, then a TOML file or `MEMBERWATCH_*`
//! environment variables, then command-line flags. Validation runs once the
//! layers are merged and any failure is fatal at startup.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::action::{InvalidUriPolicy, UrlTemplate, DEFAULT_URL_TEMPLATE, HOSTNAME_MARKER};
use crate::discovery::{
    validate_path, DiscoveryOptions, ResyncPolicy, DEFAULT_EVENT_CAPACITY, DEFAULT_WAKE_TIMEOUT,
};

/// Default coordination backend
pub const DEFAULT_CONNECTION_STRING: &str = "127.0.0.1:2181";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8888;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discovery: DiscoveryConfig,

    pub mapping: MappingConfig,

    pub server: ServerConfig,

    pub logging: LoggingConfig,
}

/// Coordination service and watched path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Backend connection string (`host:port[,host:port][/chroot]`, `memory://`, `file:///dir`)
    pub connection_string: String,

    /// Path whose children are the members
    pub member_path: String,

    /// Longest wait between fetches in seconds
    pub wake_timeout_secs: u64,

    /// Per-path event buffer
    pub event_capacity: usize,

    /// Baseline handling after a reconnect
    pub resync_policy: ResyncPolicy,

    /// Create the member path if it does not exist
    pub create_path: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            connection_string: DEFAULT_CONNECTION_STRING.to_string(),
            member_path: String::new(),
            wake_timeout_secs: DEFAULT_WAKE_TIMEOUT.as_secs(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            resync_policy: ResyncPolicy::default(),
            create_path: false,
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub fn wake_timeout(&self) -> Duration {
        Duration::from_secs(self.wake_timeout_secs)
    }

    pub fn options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            wake_timeout: self.wake_timeout(),
            event_capacity: self.event_capacity,
            resync_policy: self.resync_policy,
            create_path: self.create_path,
        }
    }
}

/// Instance-to-endpoint mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Endpoint URL template containing `{HOSTNAME}`
    pub url_template: String,

    pub invalid_uri_policy: InvalidUriPolicy,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            invalid_uri_policy: InvalidUriPolicy::default(),
        }
    }
}

impl MappingConfig {
    pub fn template(&self) -> Result<UrlTemplate, ConfigError> {
        UrlTemplate::new(self.url_template.as_str()).map_err(|e| ConfigError::InvalidValue {
            field: "mapping.url_template".to_string(),
            reason: e.to_string(),
        })
    }
}

/// HTTP server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_var(name) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            reason: format!("cannot parse '{raw}'"),
        }),
        None => Ok(None),
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `MEMBERWATCH_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_var("MEMBERWATCH_CONNECTION_STRING") {
            self.discovery.connection_string = v;
        }
        if let Some(v) = env_var("MEMBERWATCH_MEMBER_PATH") {
            self.discovery.member_path = v;
        }
        if let Some(v) = env_parse("MEMBERWATCH_WAKE_TIMEOUT_SECS")? {
            self.discovery.wake_timeout_secs = v;
        }
        if let Some(v) = env_parse("MEMBERWATCH_EVENT_CAPACITY")? {
            self.discovery.event_capacity = v;
        }
        if let Some(v) = env_parse("MEMBERWATCH_RESYNC_POLICY")? {
            self.discovery.resync_policy = v;
        }
        if let Some(v) = env_parse("MEMBERWATCH_CREATE_PATH")? {
            self.discovery.create_path = v;
        }
        if let Some(v) = env_var("MEMBERWATCH_URL_TEMPLATE") {
            self.mapping.url_template = v;
        }
        if let Some(v) = env_parse("MEMBERWATCH_INVALID_URI_POLICY")? {
            self.mapping.invalid_uri_policy = v;
        }
        if let Some(v) = env_parse("MEMBERWATCH_BIND_ADDRESS")? {
            self.server.bind_address = v;
        }
        if let Some(port) = env_parse("MEMBERWATCH_PORT")? {
            self.server.bind_address.set_port(port);
        }
        if let Some(v) = env_var("MEMBERWATCH_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_var("MEMBERWATCH_LOG_FORMAT") {
            self.logging.format = v;
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.member_path.is_empty() {
            return Err(ConfigError::MissingField {
                field: "discovery.member_path".to_string(),
            });
        }

        validate_path(&self.discovery.member_path).map_err(|e| ConfigError::InvalidValue {
            field: "discovery.member_path".to_string(),
            reason: e.to_string(),
        })?;

        if self.discovery.connection_string.is_empty() {
            return Err(ConfigError::MissingField {
                field: "discovery.connection_string".to_string(),
            });
        }

        if self.discovery.wake_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "discovery.wake_timeout_secs".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.discovery.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "discovery.event_capacity".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if !self.mapping.url_template.contains(HOSTNAME_MARKER) {
            return Err(ConfigError::InvalidValue {
                field: "mapping.url_template".to_string(),
                reason: format!(
                    "Must contain {HOSTNAME_MARKER} marker. Eg. http://{HOSTNAME_MARKER}/hystrix.stream"
                ),
            });
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(ConfigError::InvalidValue {
                field: "logging.format".to_string(),
                reason: format!("Unknown format '{}'", self.logging.format),
            });
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    base: Option<Config>,
    connection_string: Option<String>,
    member_path: Option<String>,
    url_template: Option<String>,
    port: Option<u16>,
    bind_address: Option<SocketAddr>,
    wake_timeout_secs: Option<u64>,
    resync_policy: Option<ResyncPolicy>,
    invalid_uri_policy: Option<InvalidUriPolicy>,
    create_path: Option<bool>,
    log_format: Option<String>,
}

impl ConfigBuilder {
    /// Start from an existing config instead of the defaults
    pub fn base(mut self, config: Config) -> Self {
        self.base = Some(config);
        self
    }

    pub fn connection_string(mut self, value: impl Into<String>) -> Self {
        self.connection_string = Some(value.into());
        self
    }

    pub fn member_path(mut self, path: impl Into<String>) -> Self {
        self.member_path = Some(path.into());
        self
    }

    pub fn url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = Some(template.into());
        self
    }

    /// Set the HTTP port, keeping the bind host
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    pub fn wake_timeout_secs(mut self, secs: u64) -> Self {
        self.wake_timeout_secs = Some(secs);
        self
    }

    pub fn resync_policy(mut self, policy: ResyncPolicy) -> Self {
        self.resync_policy = Some(policy);
        self
    }

    pub fn invalid_uri_policy(mut self, policy: InvalidUriPolicy) -> Self {
        self.invalid_uri_policy = Some(policy);
        self
    }

    pub fn create_path(mut self, create: bool) -> Self {
        self.create_path = Some(create);
        self
    }

    pub fn log_format(mut self, format: impl Into<String>) -> Self {
        self.log_format = Some(format.into());
        self
    }

    /// Build and validate the config
    pub fn build(self) -> Result<Config, ConfigError> {
        let mut config = self.base.unwrap_or_default();

        if let Some(v) = self.connection_string {
            config.discovery.connection_string = v;
        }
        if let Some(v) = self.member_path {
            config.discovery.member_path = v;
        }
        if let Some(v) = self.url_template {
            config.mapping.url_template = v;
        }
        if let Some(v) = self.bind_address {
            config.server.bind_address = v;
        }
        if let Some(port) = self.port {
            config.server.bind_address.set_port(port);
        }
        if let Some(v) = self.wake_timeout_secs {
            config.discovery.wake_timeout_secs = v;
        }
        if let Some(v) = self.resync_policy {
            config.discovery.resync_policy = v;
        }
        if let Some(v) = self.invalid_uri_policy {
            config.mapping.invalid_uri_policy = v;
        }
        if let Some(v) = self.create_path {
            config.discovery.create_path = v;
        }
        if let Some(v) = self.log_format {
            config.logging.format = v;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
    Io { path: String, reason: String },
    Parse { path: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {}", field)
            }
            Self::Io { path, reason } => {
                write!(f, "Failed to read config file {}: {}", path, reason)
            }
            Self::Parse { path, reason } => {
                write!(f, "Failed to parse TOML config file {}: {}", path, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_requires_member_path() {
        let config = Config::default();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingField {
                field: "discovery.member_path".to_string()
            })
        );
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .member_path("/services/api")
            .port(9000)
            .wake_timeout_secs(30)
            .resync_policy(ResyncPolicy::ResetBaseline)
            .build()
            .unwrap();

        assert_eq!(config.server.bind_address.port(), 9000);
        assert_eq!(config.discovery.wake_timeout(), Duration::from_secs(30));
        assert_eq!(config.discovery.options().resync_policy, ResyncPolicy::ResetBaseline);
        assert_eq!(config.mapping.url_template, DEFAULT_URL_TEMPLATE);
    }

    #[test]
    fn test_template_without_marker_fails() {
        let result = Config::builder()
            .member_path("/services/api")
            .url_template("http://localhost/stream")
            .build();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "mapping.url_template"
        ));
    }

    #[test]
    fn test_relative_path_fails() {
        let result = Config::builder().member_path("services").build();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_zero_timeout_fails() {
        let result = Config::builder()
            .member_path("/s")
            .wake_timeout_secs(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_log_format_fails() {
        let result = Config::builder()
            .member_path("/s")
            .log_format("xml")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [discovery]
            member_path = "/services/api"
            resync_policy = "reset_baseline"

            [mapping]
            invalid_uri_policy = "terminate"
            "#,
        )
        .unwrap();

        assert_eq!(config.discovery.member_path, "/services/api");
        assert_eq!(config.discovery.resync_policy, ResyncPolicy::ResetBaseline);
        assert_eq!(config.discovery.connection_string, DEFAULT_CONNECTION_STRING);
        assert_eq!(config.mapping.invalid_uri_policy, InvalidUriPolicy::Terminate);
        assert_eq!(config.server.bind_address.port(), DEFAULT_PORT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mapping_template() {
        let mapping = MappingConfig::default();
        assert_eq!(mapping.template().unwrap().as_str(), DEFAULT_URL_TEMPLATE);
    }
}
