//! memberwatch - coordination-service membership watcher
//!
//! Services announce themselves by creating a child node named after their
//! address under a well-known path. memberwatch watches that path and turns
//! child-set changes into an ordered stream of UP/DOWN instance events, then
//! maps each instance onto a stream URL as ADD/REMOVE actions.
//!
//! # Architecture
//!
//! - [`coordination`] - client boundary for the coordination service plus
//!   in-memory and directory-backed implementations
//! - [`discovery`] - child watcher, wake coalescer, reconciliation loop and
//!   per-path event streams
//! - [`action`] - instance to stream-URL mapping and the endpoint registry
//! - [`server`] - HTTP API over the reconciled view
//! - [`config`] - configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`models`] - core data structures and types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use memberwatch::action::{ActionStream, InvalidUriPolicy, UrlTemplate};
//! use memberwatch::coordination;
//! use memberwatch::discovery::{DiscoveryManager, DiscoveryOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = coordination::connect("127.0.0.1:2181").await?;
//!     let manager = DiscoveryManager::new(client, DiscoveryOptions::default());
//!
//!     let events = manager.start("/discovery/stream").await?;
//!     let template = Arc::new(UrlTemplate::new("http://{HOSTNAME}/turbine.stream")?);
//!     let mut actions = ActionStream::new(events, template, InvalidUriPolicy::Skip);
//!
//!     while let Some(action) = actions.next().await {
//!         println!("{}", action?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod config;
pub mod coordination;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod models;
pub mod server;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::action::{ActionStream, EndpointRegistry, InvalidUriPolicy, UrlTemplate};
    pub use crate::config::Config;
    pub use crate::coordination::{CoordinationClient, SharedClient};
    pub use crate::discovery::{DiscoveryManager, DiscoveryOptions, InstanceEvents, ResyncPolicy};
    pub use crate::error::{Error, ErrorCategory, MemberwatchErrorTrait, Result};
    pub use crate::models::{ActionType, Instance, InstanceStatus, StreamAction};
}

// Direct re-exports for convenience
pub use models::{ActionType, Instance, InstanceStatus, StreamAction};
