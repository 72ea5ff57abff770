//! Event plumbing in both directions.
//!
//! Outbound, the core publishes [`CgmEvent`]s on a broadcast channel so any
//! number of observers (UI, CLI, persistence of the pairing record) can follow
//! along. Inbound, radio and vendor callbacks are posted as [`Callback`]s into
//! the service inbox through a [`CallbackSender`]; they never touch state on
//! the thread that produced them.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use cgmlink_types::{ConnectionState, DeviceCandidate, PairingCredential, Reading};

use crate::radio::RadioEvent;
use crate::vendor::VendorEvent;

/// Events published by the connection core.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum CgmEvent {
    /// The connection state changed.
    StateChanged { state: ConnectionState },
    /// The candidate list changed (a new transmitter, or cleared for a scan).
    CandidatesUpdated { candidates: Vec<DeviceCandidate> },
    /// A reading entered the in-memory window.
    Reading { reading: Reading, backfill: bool },
    /// A handshake succeeded for this credential. Callers persist it so the
    /// next launch can reconnect without scanning.
    Paired { credential: PairingCredential },
}

/// Sender for core events.
pub type EventSender = broadcast::Sender<CgmEvent>;

/// Receiver for core events.
pub type EventReceiver = broadcast::Receiver<CgmEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: CgmEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

/// A callback waiting to be applied by the service actor.
#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
    Radio(RadioEvent),
    Vendor(VendorEvent),
}

/// Receiving half of the callback inbox, consumed by the service actor.
pub type CallbackReceiver = mpsc::UnboundedReceiver<Callback>;

/// Cloneable handle radio and vendor implementations use to post callbacks.
///
/// Posting never blocks, so it is safe from platform callback threads.
#[derive(Debug, Clone)]
pub struct CallbackSender {
    tx: mpsc::UnboundedSender<Callback>,
}

impl CallbackSender {
    /// Post a radio callback.
    pub fn radio(&self, event: RadioEvent) {
        self.post(Callback::Radio(event));
    }

    /// Post a vendor callback.
    pub fn vendor(&self, event: VendorEvent) {
        self.post(Callback::Vendor(event));
    }

    fn post(&self, callback: Callback) {
        if self.tx.send(callback).is_err() {
            debug!("Callback dropped: service inbox closed");
        }
    }

    /// Whether the service side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create the callback inbox.
pub fn callback_channel() -> (CallbackSender, CallbackReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CallbackSender { tx }, rx)
}
