//! Unified error handling for the memberwatch crate
//!
//! Every module keeps its own error type. [`Error`] wraps them so errors can
//! cross module boundaries, and [`MemberwatchErrorTrait`] gives a common way
//! to classify them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use memberwatch::error::{Error, MemberwatchErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying ({:?}): {}", err.category(), err);
//!     } else {
//!         eprintln!("Fatal error: {}", err);
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::action::{ActionError, MappingError};
pub use crate::config::ConfigError;
pub use crate::coordination::CoordinationError;
pub use crate::discovery::DiscoveryError;
pub use crate::server::ServerError;

/// Common trait for all memberwatch error types
pub trait MemberwatchErrorTrait: std::error::Error {
    /// Check if this error is recoverable (retrying may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Coordination service connectivity and node errors
    Coordination,
    /// Watch lifecycle and event stream errors
    Discovery,
    /// URL template and URI construction errors
    Mapping,
    /// Configuration and validation errors
    Config,
    /// HTTP server errors
    Server,
    /// Local I/O errors
    Io,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordination => "coordination",
            Self::Discovery => "discovery",
            Self::Mapping => "mapping",
            Self::Config => "config",
            Self::Server => "server",
            Self::Io => "io",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the memberwatch crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl MemberwatchErrorTrait for CoordinationError {
    fn is_recoverable(&self) -> bool {
        self.is_transient()
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Coordination
    }
}

impl MemberwatchErrorTrait for DiscoveryError {
    fn is_recoverable(&self) -> bool {
        match self {
            // a new watch can be started after these
            Self::Fetch { .. } | Self::Lagged { .. } => true,
            Self::Prepare { source, .. } => source.is_transient(),
            Self::InvalidPath(_) | Self::NotWatching(_) | Self::ShutDown => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch { .. } | Self::Prepare { .. } => ErrorCategory::Coordination,
            _ => ErrorCategory::Discovery,
        }
    }
}

impl MemberwatchErrorTrait for MappingError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Mapping
    }
}

impl MemberwatchErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Coordination(e) => e.is_recoverable(),
            Self::Discovery(e) => e.is_recoverable(),
            Self::Mapping(e) => e.is_recoverable(),
            Self::Config(_) => false,
            Self::Server(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Coordination(e) => e.category(),
            Self::Discovery(e) => e.category(),
            Self::Mapping(e) => e.category(),
            Self::Config(_) => ErrorCategory::Config,
            Self::Server(_) => ErrorCategory::Server,
            Self::Io(_) => ErrorCategory::Io,
            Self::Json(_) | Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl From<ActionError> for Error {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::Discovery(e) => Self::Discovery(e),
            ActionError::Mapping(e) => Self::Mapping(e),
        }
    }
}

impl Error {
    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let err: Error = CoordinationError::ConnectionLoss.into();
        assert_eq!(err.category(), ErrorCategory::Coordination);

        let err: Error = DiscoveryError::ShutDown.into();
        assert_eq!(err.category(), ErrorCategory::Discovery);

        let err: Error = MappingError::MissingMarker("x".to_string()).into();
        assert_eq!(err.category(), ErrorCategory::Mapping);
    }

    #[test]
    fn test_fetch_failure_is_coordination() {
        let err = DiscoveryError::Fetch {
            path: "/service".to_string(),
            source: CoordinationError::SessionExpired,
        };
        assert_eq!(err.category(), ErrorCategory::Coordination);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_is_recoverable() {
        let err: Error = CoordinationError::ConnectionLoss.into();
        assert!(err.is_recoverable());

        let err: Error = CoordinationError::NoNode("/x".to_string()).into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_action_error_conversion() {
        let err: Error = ActionError::Mapping(MappingError::MissingMarker("x".to_string())).into();
        assert!(matches!(err, Error::Mapping(_)));
    }

    #[test]
    fn test_config_error() {
        let err: Error = ConfigError::MissingField {
            field: "discovery.member_path".to_string(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("discovery.member_path"));
    }

    #[test]
    fn test_error_with_source() {
        let err = Error::with_source(
            "Failed to connect to '127.0.0.1:2181'",
            CoordinationError::ConnectionLoss,
        );
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "Failed to connect to '127.0.0.1:2181'");
        assert_eq!(
            std::error::Error::source(&err).map(|source| source.to_string()),
            Some("Connection lost".to_string())
        );
    }
}
