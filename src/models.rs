//! Core data structures shared across memberwatch
//!
//! - [`Instance`] - one member address with its availability status
//! - [`ConnectionState`] - coordination-service session transitions
//! - [`ChildEvent`] - raw child notification delivered by a coordination client
//! - [`StreamAction`] - outward ADD/REMOVE action against a stream endpoint

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

// ============================================================================
// Instance
// ============================================================================

/// Availability of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    /// Instance is present under the watched path
    Up,
    /// Instance has left the watched path
    Down,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One member of a watched path
///
/// Identity is the address alone: two instances with the same address compare
/// equal and hash identically whatever their status. Snapshot diffing relies on
/// this to detect presence and absence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    status: InstanceStatus,
    address: String,
}

impl Instance {
    /// Create an instance with an explicit status
    pub fn new(status: InstanceStatus, address: impl Into<String>) -> Self {
        Self {
            status,
            address: address.into(),
        }
    }

    /// Create an available instance
    pub fn up(address: impl Into<String>) -> Self {
        Self::new(InstanceStatus::Up, address)
    }

    /// Create an unavailable instance
    pub fn down(address: impl Into<String>) -> Self {
        Self::new(InstanceStatus::Down, address)
    }

    /// Wake-up sentinel: `DOWN` with an empty address. Never delivered as an event.
    pub fn null() -> Self {
        Self::new(InstanceStatus::Down, String::new())
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_up(&self) -> bool {
        self.status == InstanceStatus::Up
    }

    /// Check whether this is the wake-up sentinel
    pub fn is_null(&self) -> bool {
        self.address.is_empty()
    }

    /// Same address with status forced to `DOWN`
    pub fn to_down(&self) -> Self {
        Self::down(self.address.clone())
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Instance {}

impl Hash for Instance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.address)
    }
}

// ============================================================================
// Connection State
// ============================================================================

/// Session state reported by a coordination client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    /// First successful connection
    Connected,
    /// Connection re-established after suspension or loss
    Reconnected,
    /// Connection interrupted, session may still be alive
    Suspended,
    /// Session lost
    Lost,
}

impl ConnectionState {
    /// Whether watches must be (re)established on entering this state
    pub fn requires_resubscribe(&self) -> bool {
        matches!(self, Self::Connected | Self::Reconnected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "CONNECTED",
            Self::Reconnected => "RECONNECTED",
            Self::Suspended => "SUSPENDED",
            Self::Lost => "LOST",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Child Events
// ============================================================================

/// Kind of a raw child notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEventKind {
    Added,
    Removed,
    /// Child data changed; structure is unchanged
    Updated,
}

/// Raw child notification for a watched path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEvent {
    pub kind: ChildEventKind,
    /// Full path of the child node
    pub path: String,
}

impl ChildEvent {
    pub fn new(kind: ChildEventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Last segment of the child path
    pub fn child_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Advisory hint for the reconciliation loop, `None` for non-structural events
    pub fn hint(&self) -> Option<Instance> {
        match self.kind {
            ChildEventKind::Added => Some(Instance::up(self.child_name())),
            ChildEventKind::Removed => Some(Instance::down(self.child_name())),
            ChildEventKind::Updated => None,
        }
    }
}

// ============================================================================
// Stream Actions
// ============================================================================

/// Action to take on a monitored stream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Add,
    Remove,
}

impl From<InstanceStatus> for ActionType {
    fn from(status: InstanceStatus) -> Self {
        match status {
            InstanceStatus::Up => Self::Add,
            InstanceStatus::Down => Self::Remove,
        }
    }
}

/// Outward action consumed by the stream-serving side
///
/// `uri` is the rendered template text as-is, never normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub uri: String,
}

impl StreamAction {
    pub fn new(action_type: ActionType, uri: impl Into<String>) -> Self {
        Self {
            action_type,
            uri: uri.into(),
        }
    }
}

impl fmt::Display for StreamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.action_type {
            ActionType::Add => "ADD",
            ActionType::Remove => "REMOVE",
        };
        write!(f, "{kind} {}", self.uri)
    }
}

// ============================================================================
// Tests
// ============================================================================
