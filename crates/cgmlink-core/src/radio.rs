//! The radio layer seam.
//!
//! Every operation on [`Radio`] is a request: it returns immediately and the
//! outcome arrives later as a [`RadioEvent`] posted through a
//! [`CallbackSender`](crate::events::CallbackSender). Implementations never
//! touch connection state themselves.

use cgmlink_types::{DeviceId, RadioState};

/// One advertisement seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Radio-level identifier of the advertiser.
    pub id: DeviceId,
    /// Advertised local name, if the packet carried one.
    pub name: Option<String>,
    /// Received signal strength in dBm.
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Create an advertisement with a name and no signal information.
    pub fn named(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
            rssi: None,
        }
    }

    /// Attach a signal strength.
    #[must_use]
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// Callbacks produced by the radio layer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RadioEvent {
    /// The adapter power state changed.
    StateChanged(RadioState),
    /// A peripheral advertised while scanning.
    Advertisement(Advertisement),
    /// The radio-level link to a peripheral is up.
    Connected(DeviceId),
    /// A connect request failed before the link came up.
    ConnectFailed {
        device: DeviceId,
        reason: Option<String>,
    },
    /// The radio-level link went down. `error` is set when the platform
    /// reported a transport error rather than a clean close.
    Disconnected {
        device: DeviceId,
        error: Option<String>,
    },
    /// Answer to [`Radio::resolve`].
    Resolved { device: DeviceId, found: bool },
}

impl RadioEvent {
    /// The device this event concerns, if any.
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::StateChanged(_) => None,
            Self::Advertisement(adv) => Some(&adv.id),
            Self::Connected(device)
            | Self::ConnectFailed { device, .. }
            | Self::Disconnected { device, .. }
            | Self::Resolved { device, .. } => Some(device),
        }
    }
}

/// Fire-and-forget access to a BLE central.
///
/// Methods take `&mut self` because the connection core is the only owner;
/// no method may block.
pub trait Radio: Send + 'static {
    /// Current adapter power state.
    fn state(&self) -> RadioState;

    /// Begin delivering [`RadioEvent::Advertisement`]s.
    fn start_scan(&mut self);

    /// Stop scanning. Harmless when no scan is running.
    fn stop_scan(&mut self);

    /// Request a link to `device`. Answered by [`RadioEvent::Connected`] or
    /// [`RadioEvent::ConnectFailed`].
    fn connect(&mut self, device: &DeviceId);

    /// Drop the link to `device`, or abandon a pending connect.
    fn cancel_connection(&mut self, device: &DeviceId);

    /// Ask whether `device` is known to the platform without scanning.
    /// Answered by [`RadioEvent::Resolved`].
    fn resolve(&mut self, device: &DeviceId);
}

impl<R: Radio + ?Sized> Radio for Box<R> {
    fn state(&self) -> RadioState {
        (**self).state()
    }

    fn start_scan(&mut self) {
        (**self).start_scan()
    }

    fn stop_scan(&mut self) {
        (**self).stop_scan()
    }

    fn connect(&mut self, device: &DeviceId) {
        (**self).connect(device)
    }

    fn cancel_connection(&mut self, device: &DeviceId) {
        (**self).cancel_connection(device)
    }

    fn resolve(&mut self, device: &DeviceId) {
        (**self).resolve(device)
    }
}
