//! The application-visible connection state and its transitions.

use tokio::sync::watch;
use tracing::info;

use cgmlink_types::{ConnectionState, RADIO_UNAVAILABLE_REASON};

/// Something that may move the connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A scan was started with the radio powered on.
    ScanStarted,
    /// The radio is off, unauthorized, or unsupported.
    RadioUnavailable,
    /// A session was created and the radio connect issued.
    ConnectRequested,
    /// The vendor handshake for the selected device completed.
    HandshakeCompleted,
    /// The radio could not establish the link.
    ConnectFailed(String),
    /// The keep-alive budget ran out; the reason is already formatted.
    LinkLost(String),
    /// The user asked to disconnect.
    UserDisconnected,
}

/// Compute the state `transition` leads to from `current`.
///
/// Returns `None` when the transition does not change anything: the target
/// equals the current state, or a handshake completion arrives with no
/// session in flight.
pub fn next_state(current: &ConnectionState, transition: &Transition) -> Option<ConnectionState> {
    let next = match transition {
        Transition::ScanStarted => ConnectionState::Scanning,
        Transition::RadioUnavailable => ConnectionState::Error(RADIO_UNAVAILABLE_REASON.to_string()),
        Transition::ConnectRequested => ConnectionState::Connecting,
        Transition::HandshakeCompleted => {
            if *current == ConnectionState::Disconnected {
                return None;
            }
            ConnectionState::Connected
        }
        Transition::ConnectFailed(reason) => {
            ConnectionState::Error(format!("connection failed: {}", reason))
        }
        Transition::LinkLost(reason) => ConnectionState::Error(reason.clone()),
        Transition::UserDisconnected => ConnectionState::Disconnected,
    };

    (next != *current).then_some(next)
}

/// Owner of the current state, the last error detail, and the watch channel
/// observers read the state from.
#[derive(Debug)]
pub struct StateMachine {
    current: ConnectionState,
    last_error: Option<String>,
    tx: watch::Sender<ConnectionState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            current: ConnectionState::Disconnected,
            last_error: None,
            tx,
        }
    }

    pub fn current(&self) -> &ConnectionState {
        &self.current
    }

    /// User-facing detail about the most recent fault.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_last_error(&mut self, detail: impl Into<String>) {
        self.last_error = Some(detail.into());
    }

    pub fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    /// Observe the state. The receiver always sees the latest value.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Apply a transition. Returns the new state when it changed.
    pub fn apply(&mut self, transition: Transition) -> Option<ConnectionState> {
        let next = next_state(&self.current, &transition)?;
        info!("Connection state: {} -> {}", self.current, next);
        self.current = next.clone();
        self.tx.send_replace(next.clone());
        Some(next)
    }
}
