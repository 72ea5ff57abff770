//! The single active link to a transmitter.

use std::fmt;

use tracing::debug;

use cgmlink_types::{DeviceId, PairingCredential};

use crate::vendor::Handshake;

/// One authenticated logical connection: who we are talking to, how much of
/// the reconnect budget we have spent, and the vendor handshake driving it.
pub struct LinkSession {
    credential: PairingCredential,
    attempts: u32,
    handshake: Box<dyn Handshake>,
}

impl fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSession")
            .field("device", self.credential.device_id())
            .field("attempts", &self.attempts)
            .field("stay_connected", &self.handshake.stay_connected())
            .finish()
    }
}

impl LinkSession {
    /// Bind a fresh handshake to `credential` with keep-alive enabled and no
    /// attempts spent.
    pub fn new(credential: PairingCredential, mut handshake: Box<dyn Handshake>) -> Self {
        handshake.set_stay_connected(true);
        Self {
            credential,
            attempts: 0,
            handshake,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        self.credential.device_id()
    }

    pub fn credential(&self) -> &PairingCredential {
        &self.credential
    }

    /// Whether a callback reporting `device` belongs to this session.
    pub fn matches(&self, device: &DeviceId) -> bool {
        self.credential.device_id() == device
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }

    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    pub fn stay_connected(&self) -> bool {
        self.handshake.stay_connected()
    }

    /// Stop the handshake from keeping the link alive on its own.
    pub fn disable_keep_alive(&mut self) {
        self.handshake.set_stay_connected(false);
    }

    /// Ask the handshake to find the transmitter and authenticate.
    pub fn resume(&mut self) {
        self.handshake.resume();
    }

    /// Stop the handshake and consume the session. Returns the device it was
    /// bound to so the caller can cancel the radio link.
    pub fn teardown(mut self) -> DeviceId {
        debug!("Tearing down session for {}", self.device_id());
        self.handshake.stop();
        self.credential.device_id().clone()
    }
}
