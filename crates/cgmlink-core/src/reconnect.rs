//! Bounded keep-alive policy for radio-level link loss.
//!
//! The vendor handshake can usually pick a session back up after the radio
//! drops the link, so a few consecutive drops are absorbed silently. The
//! attempt counter stays within `0..=max_attempts`.
//!
//! A drop with a transport error counts as a failure: the drop that brings
//! the counter to `max_attempts` is escalated. A clean drop is a silent
//! resume; only a clean drop that arrives once the budget is spent escalates.

use crate::error::{Error, Result};

/// Default reconnect budget for dropped links.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What to do about a radio-level disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Stay in the current state and ask the handshake to resume.
    Resume { attempt: u32 },
    /// Count the drop but do not resume.
    ///
    /// Returned for a clean drop when the handshake has cleared its own
    /// keep-alive flag, e.g. a [`Handshake`](crate::Handshake) that is
    /// winding the session down after the transmitter asked to end it.
    Hold { attempt: u32 },
    /// Give up: publish `reason` as a terminal error and disable keep-alive.
    Escalate { reason: String },
}

/// Options for the keep-alive policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect budget. A transport error escalates on the drop that
    /// reaches it; clean drops escalate once it is spent.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Set the reconnect budget.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Decide how to handle a disconnect.
    ///
    /// `attempts` is the session's counter before this drop,
    /// `transport_error` the platform's description when the link failed
    /// rather than closed, and `stay_connected` the handshake's keep-alive
    /// flag.
    pub fn on_disconnect(
        &self,
        attempts: u32,
        transport_error: Option<&str>,
        stay_connected: bool,
    ) -> ReconnectDecision {
        if let Some(err) = transport_error {
            let attempt = attempts.saturating_add(1);
            if attempt >= self.max_attempts {
                return ReconnectDecision::Escalate {
                    reason: format!("disconnected: {}", err),
                };
            }
            return ReconnectDecision::Resume { attempt };
        }

        if attempts >= self.max_attempts {
            return ReconnectDecision::Escalate {
                reason: format!("lost connection after {} attempts", self.max_attempts),
            };
        }
        let attempt = attempts + 1;
        if stay_connected {
            ReconnectDecision::Resume { attempt }
        } else {
            ReconnectDecision::Hold { attempt }
        }
    }
}
