//! Action stream: instance events mapped through a URL template

use futures::stream::{self, Stream};
use std::sync::Arc;

use crate::discovery::{DiscoveryError, InstanceEvents};
use crate::metrics;
use crate::models::StreamAction;

use super::{InvalidUriPolicy, MappingError, UrlTemplate};

/// Errors ending an action stream
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// Stream of ADD/REMOVE actions for one watched path
#[derive(Debug)]
pub struct ActionStream {
    events: InstanceEvents,
    template: Arc<UrlTemplate>,
    policy: InvalidUriPolicy,
    finished: bool,
}

impl ActionStream {
    pub fn new(events: InstanceEvents, template: Arc<UrlTemplate>, policy: InvalidUriPolicy) -> Self {
        Self {
            events,
            template,
            policy,
            finished: false,
        }
    }

    /// Next action, `None` once the underlying event stream has ended
    pub async fn next(&mut self) -> Option<Result<StreamAction, ActionError>> {
        if self.finished {
            return None;
        }

        loop {
            let instance = match self.events.next().await {
                Some(Ok(instance)) => instance,
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            };

            match self.template.map(&instance) {
                Ok(action) => return Some(Ok(action)),
                Err(e) => {
                    metrics::record_mapping_failure(self.events.path());
                    match self.policy {
                        InvalidUriPolicy::Skip => {
                            tracing::warn!(path = %self.events.path(), instance = %instance, error = %e, "Skipping instance with invalid URI");
                        }
                        InvalidUriPolicy::Terminate => {
                            tracing::error!(path = %self.events.path(), instance = %instance, error = %e, "Invalid URI, ending action stream");
                            self.finished = true;
                            return Some(Err(e.into()));
                        }
                    }
                }
            }
        }
    }

    /// Adapt into a [`Stream`]
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamAction, ActionError>> + Send {
        stream::unfold(self, |mut actions| async move {
            actions.next().await.map(|item| (item, actions))
        })
    }
}
