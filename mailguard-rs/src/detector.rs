//! Email change detection
//!
//! Every trigger source (DOM mutations, the poll timer, clicks, navigation)
//! publishes an [`Observation`] of the identifier it currently sees. The
//! [`Detector`] is the only consumer and turns those into at most one
//! [`DispatchRequest`] per distinct identifier.

use tracing::debug;

use crate::models::EmailIdentifier;

/// What caused an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Page first seen
    Startup,
    /// Document content changed
    Mutation,
    /// Periodic poll fallback
    Poll,
    /// Click inside the message container
    Click,
    /// In-app navigation (URL fragment change)
    HashChange,
    /// The message container was replaced
    ContainerReplaced,
    /// Backend became reachable again
    Reconnected,
    /// Explicit user request
    Manual,
}

impl Trigger {
    /// Forgets the last identifier so the current one is evaluated again
    pub fn resets_guard(self) -> bool {
        matches!(
            self,
            Trigger::HashChange | Trigger::ContainerReplaced | Trigger::Reconnected | Trigger::Manual
        )
    }

    /// Dispatches even when no identifier is visible
    pub fn dispatches_without_identifier(self) -> bool {
        matches!(self, Trigger::Startup | Trigger::Manual)
    }

    /// Waits for the page to settle before dispatching
    pub fn needs_settle_delay(self) -> bool {
        !matches!(self, Trigger::Poll | Trigger::Reconnected | Trigger::Manual)
    }

    pub fn is_automatic(self) -> bool {
        self != Trigger::Manual
    }
}

/// An identifier seen by a trigger source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub trigger: Trigger,
    pub identifier: Option<EmailIdentifier>,
}

impl Observation {
    pub fn new(trigger: Trigger, identifier: Option<EmailIdentifier>) -> Self {
        Self {
            trigger,
            identifier,
        }
    }
}

/// Request to analyze the email currently displayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub trigger: Trigger,
    pub identifier: Option<EmailIdentifier>,
}

/// De-duplication guard over observations
#[derive(Debug, Clone)]
pub struct Detector {
    /// Last identifier a dispatch was issued for; `None` is the unknown sentinel
    last: Option<EmailIdentifier>,
    auto_analyze: bool,
}

impl Detector {
    pub fn new(auto_analyze: bool) -> Self {
        Self {
            last: None,
            auto_analyze,
        }
    }

    pub fn last_identifier(&self) -> Option<&EmailIdentifier> {
        self.last.as_ref()
    }

    pub fn auto_analyze(&self) -> bool {
        self.auto_analyze
    }

    pub fn set_auto_analyze(&mut self, enabled: bool) {
        self.auto_analyze = enabled;
    }

    /// Force the next observation to be evaluated as new
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Apply the guard; the last identifier is updated before returning so a
    /// repeated observation arriving while the dispatch runs is dropped
    pub fn observe(&mut self, observation: Observation) -> Option<DispatchRequest> {
        let Observation {
            trigger,
            identifier,
        } = observation;

        if trigger.is_automatic() && !self.auto_analyze {
            debug!("Ignoring {:?}: automatic analysis disabled", trigger);
            return None;
        }

        if trigger.resets_guard() {
            self.reset();
        }

        match identifier {
            Some(id) if self.last.as_ref() != Some(&id) => {
                debug!("{:?}: new email {}", trigger, id);
                self.last = Some(id.clone());
                Some(DispatchRequest {
                    trigger,
                    identifier: Some(id),
                })
            }
            Some(_) => None,
            None if trigger.dispatches_without_identifier() => {
                debug!("{:?}: dispatching without identifier", trigger);
                Some(DispatchRequest {
                    trigger,
                    identifier: None,
                })
            }
            None => None,
        }
    }
}
