//! The vendor handshake seam.
//!
//! The transmitter's authentication protocol lives in a vendor SDK. The core
//! only drives it through [`Handshake`] and listens to the [`VendorEvent`]s it
//! posts back, each tagged with the device it was created for.

use bytes::Bytes;
use time::OffsetDateTime;

use cgmlink_types::{DeviceId, GlucoseUnit, PairingCredential, Reading};

/// A raw sample as the vendor SDK reports it.
///
/// Vendor fields are optional; a sample without a quantity is dropped by the
/// ingest path.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorSample {
    /// Glucose quantity in `unit`.
    pub quantity: Option<f64>,
    /// Unit of `quantity`.
    pub unit: GlucoseUnit,
    /// When the transmitter took the sample.
    pub read_at: OffsetDateTime,
    /// Signed trend rate, if the transmitter computed one.
    pub trend: Option<i8>,
}

impl VendorSample {
    /// A sample in mg/dL.
    pub fn mg_per_dl(value: f64, read_at: OffsetDateTime) -> Self {
        Self {
            quantity: Some(value),
            unit: GlucoseUnit::MgPerDl,
            read_at,
            trend: None,
        }
    }

    /// Attach a trend rate.
    #[must_use]
    pub fn with_trend(mut self, trend: i8) -> Self {
        self.trend = Some(trend);
        self
    }

    /// Convert to a canonical reading. `None` when the quantity is missing
    /// or not a finite number.
    pub fn to_reading(&self) -> Option<Reading> {
        let quantity = self.quantity.filter(|q| q.is_finite())?;
        Some(Reading::from_unit(
            quantity,
            self.unit,
            self.read_at,
            self.trend,
        ))
    }
}

/// What a handshake reported.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum VendorEventKind {
    /// Authentication completed; the transmitter is streaming.
    Connected,
    /// The handshake hit an error while negotiating. Informational only.
    Error(String),
    /// One new sample.
    Sample(VendorSample),
    /// Samples the transmitter buffered while the link was down, oldest first.
    Backfill(Vec<VendorSample>),
    /// A payload the SDK could not interpret.
    UnknownData(Bytes),
}

/// A callback from a vendor handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorEvent {
    /// The device the reporting handshake was created for.
    pub device: DeviceId,
    pub kind: VendorEventKind,
}

impl VendorEvent {
    pub fn new(device: DeviceId, kind: VendorEventKind) -> Self {
        Self { device, kind }
    }
}

/// One authenticated session with the vendor protocol.
pub trait Handshake: Send {
    /// The device this handshake is bound to.
    fn device_id(&self) -> &DeviceId;

    /// Look for the transmitter on the open link and (re)authenticate.
    fn resume(&mut self);

    /// Stop all protocol activity. Called exactly once before the handshake
    /// is dropped.
    fn stop(&mut self);

    /// Whether the handshake should keep the link alive on its own.
    fn stay_connected(&self) -> bool;

    fn set_stay_connected(&mut self, stay_connected: bool);
}

/// Builds handshakes for new sessions.
pub trait HandshakeFactory: Send + 'static {
    /// Create a handshake bound to `credential`. The handshake must not start
    /// any protocol work until [`Handshake::resume`] is called.
    fn create(&mut self, credential: &PairingCredential) -> Box<dyn Handshake>;
}
