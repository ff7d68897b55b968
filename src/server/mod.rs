//! HTTP surface
//!
//! Serves the reconciled view of one member path: health, current members,
//! monitored stream endpoints, a live action feed over server-sent events and
//! the Prometheus registry.

pub mod api;
pub mod health;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::action::EndpointRegistry;
use crate::config::ServerConfig;
use crate::discovery::DiscoveryManager;

pub use api::create_router;
pub use health::{HealthResponse, HealthStatus};

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Watches over the coordination service
    pub manager: Arc<DiscoveryManager>,

    /// Stream endpoints fed by the action stream
    pub registry: EndpointRegistry,

    /// Path whose members are served
    pub member_path: String,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub config: ServerConfig,

    /// Set once the server starts draining; ends open action streams
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// Resolves once shutdown has been requested
    pub fn stopped(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut shutdown = self.shutdown.subscribe();
        async move {
            loop {
                if *shutdown.borrow_and_update() {
                    return;
                }
                if shutdown.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}

// ============================================================================
// Server
// ============================================================================

pub struct MemberwatchServer {
    config: ServerConfig,
    state: AppState,
}

impl MemberwatchServer {
    pub fn new(
        config: ServerConfig,
        manager: Arc<DiscoveryManager>,
        registry: EndpointRegistry,
        member_path: impl Into<String>,
    ) -> Self {
        let state = AppState {
            manager,
            registry,
            member_path: member_path.into(),
            start_time: Instant::now(),
            config: config.clone(),
            shutdown: Arc::new(watch::channel(false).0),
        };

        Self { config, state }
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown_signal` resolves
    ///
    /// Open `/stream` responses are ended when the signal fires so the
    /// graceful drain does not wait on them.
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("{addr}: {e}")))?;

        tracing::info!(address = %addr, path = %self.state.member_path, "HTTP server listening");

        let shutdown = self.state.shutdown.clone();
        let signal = async move {
            shutdown_signal.await;
            shutdown.send_replace(true);
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        tracing::info!("HTTP server shutdown complete");
        Ok(())
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            member_path: self.state.member_path.clone(),
            backend: self.state.manager.client().name().to_string(),
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub member_path: String,
    pub backend: String,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Memberwatch Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Member Path: {}\n\
             Backend: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.member_path,
            self.backend,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryCoordinator;
    use crate::discovery::DiscoveryOptions;

    fn server(config: ServerConfig) -> MemberwatchServer {
        let manager = DiscoveryManager::new(
            Arc::new(MemoryCoordinator::new()),
            DiscoveryOptions::default(),
        );
        MemberwatchServer::new(config, Arc::new(manager), EndpointRegistry::new(), "/service")
    }

    #[test]
    fn test_server_info() {
        let info = server(ServerConfig::default()).info();

        assert_eq!(info.member_path, "/service");
        assert_eq!(info.backend, "memory");
        assert_eq!(info.bind_address.port(), crate::config::DEFAULT_PORT);
        assert!(info.display().contains("Member Path: /service"));
    }

    #[test]
    fn test_server_info_flags() {
        let config = ServerConfig {
            enable_cors: false,
            ..Default::default()
        };
        let info = server(config).info();
        assert!(!info.cors_enabled);
        assert!(info.display().contains("CORS: disabled"));
    }

    #[tokio::test]
    async fn test_bind_error() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig {
            bind_address: blocker.local_addr().unwrap(),
            ..Default::default()
        };

        let result = server(config).start_with_shutdown(async {}).await;
        assert!(matches!(result, Err(ServerError::BindError(_))));
    }
}
