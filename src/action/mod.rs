//! Instance-to-action mapping
//!
//! Each instance event becomes an ADD or REMOVE action against the stream
//! endpoint obtained by substituting the instance address into a URL
//! template.

pub mod registry;
pub mod stream;

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::models::{ActionType, Instance, StreamAction};

pub use registry::{EndpointEntry, EndpointRegistry};
pub use stream::{ActionError, ActionStream};

/// Placeholder replaced by the instance address
pub const HOSTNAME_MARKER: &str = "{HOSTNAME}";

/// Template used when none is configured
pub const DEFAULT_URL_TEMPLATE: &str = "http://{HOSTNAME}/turbine.stream";

/// Mapping errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("URL template must contain {{HOSTNAME}}: '{0}'")]
    MissingMarker(String),

    #[error("Invalid URI '{uri}' for instance {address}: {reason}")]
    InvalidUri {
        address: String,
        uri: String,
        reason: String,
    },
}

/// What to do with an event whose URI cannot be built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidUriPolicy {
    /// Log a warning and drop the event
    #[default]
    Skip,
    /// End the action stream with the error
    Terminate,
}

impl std::str::FromStr for InvalidUriPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "terminate" | "fail" => Ok(Self::Terminate),
            other => Err(format!("unknown invalid-URI policy '{other}'")),
        }
    }
}

/// Validated URL template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
}

impl UrlTemplate {
    /// Accept `template` only if it contains [`HOSTNAME_MARKER`]
    pub fn new(template: impl Into<String>) -> Result<Self, MappingError> {
        let template = template.into();
        if !template.contains(HOSTNAME_MARKER) {
            return Err(MappingError::MissingMarker(template));
        }
        Ok(Self { template })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute `address` into every marker
    ///
    /// The result must parse as a URL but is returned verbatim: host case,
    /// default ports and path segments are left exactly as substituted.
    pub fn render(&self, address: &str) -> Result<String, MappingError> {
        let uri = self.template.replace(HOSTNAME_MARKER, address);
        match Url::parse(&uri) {
            Ok(_) => Ok(uri),
            Err(e) => Err(MappingError::InvalidUri {
                address: address.to_string(),
                uri,
                reason: e.to_string(),
            }),
        }
    }

    /// UP becomes ADD, DOWN becomes REMOVE
    pub fn map(&self, instance: &Instance) -> Result<StreamAction, MappingError> {
        let uri = self.render(instance.address())?;
        Ok(StreamAction::new(ActionType::from(instance.status()), uri))
    }
}

impl Default for UrlTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_URL_TEMPLATE.to_string(),
        }
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

impl std::str::FromStr for UrlTemplate {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_up_to_add() {
        let template = UrlTemplate::new("http://{HOSTNAME}/stream").unwrap();
        let action = template.map(&Instance::up("10.0.0.5:9000")).unwrap();

        assert_eq!(action.action_type, ActionType::Add);
        assert_eq!(action.uri.as_str(), "http://10.0.0.5:9000/stream");
    }

    #[test]
    fn test_map_down_to_remove() {
        let template = UrlTemplate::default();
        let action = template.map(&Instance::down("host1:8080")).unwrap();

        assert_eq!(action.to_string(), "REMOVE http://host1:8080/turbine.stream");
    }

    #[test]
    fn test_every_marker_is_replaced() {
        let template = UrlTemplate::new("http://{HOSTNAME}/proxy?target={HOSTNAME}").unwrap();
        assert_eq!(template.render("a:1").unwrap(), "http://a:1/proxy?target=a:1");
    }

    #[test]
    fn test_render_keeps_substituted_text() {
        let template = UrlTemplate::new("http://{HOSTNAME}/stream").unwrap();
        assert_eq!(template.render("Host1:80").unwrap(), "http://Host1:80/stream");

        let bare = UrlTemplate::new("http://{HOSTNAME}").unwrap();
        assert_eq!(bare.render("10.0.0.5:9000").unwrap(), "http://10.0.0.5:9000");

        let dotted = UrlTemplate::new("http://{HOSTNAME}/a/../stream").unwrap();
        assert_eq!(dotted.render("a:1").unwrap(), "http://a:1/a/../stream");
    }

    #[test]
    fn test_template_without_marker_rejected() {
        assert_eq!(
            UrlTemplate::new("http://localhost/stream"),
            Err(MappingError::MissingMarker("http://localhost/stream".to_string()))
        );
        assert!("http://{HOSTNAME}/x".parse::<UrlTemplate>().is_ok());
    }

    #[test]
    fn test_invalid_uri() {
        let template = UrlTemplate::new("http://{HOSTNAME}/stream").unwrap();
        let result = template.map(&Instance::up("bad host:port"));
        assert!(matches!(result, Err(MappingError::InvalidUri { .. })));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("skip".parse::<InvalidUriPolicy>(), Ok(InvalidUriPolicy::Skip));
        assert_eq!("TERMINATE".parse::<InvalidUriPolicy>(), Ok(InvalidUriPolicy::Terminate));
        assert!("ignore".parse::<InvalidUriPolicy>().is_err());
    }
}
