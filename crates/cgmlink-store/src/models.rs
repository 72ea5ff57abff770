//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use cgmlink_types::{DeviceId, PairingCredential, Reading, Trend};

use crate::error::Result;

/// A glucose reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    /// User scope the reading belongs to.
    pub scope: String,
    /// When the transmitter took the sample.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    /// Glucose concentration in mg/dL.
    pub value: f64,
    /// Trend rate in tenths of mg/dL per minute.
    pub trend: Option<i8>,
}

impl StoredReading {
    /// Convert to a [`Reading`].
    pub fn to_reading(&self) -> Reading {
        Reading::new(self.value, self.captured_at, self.trend)
    }

    /// The classified trend, if a rate was stored.
    pub fn trend_arrow(&self) -> Option<Trend> {
        self.trend.map(Trend::from_rate)
    }
}

/// The paired transmitter record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPairing {
    /// Normalized transmitter serial.
    pub serial: String,
    /// Radio identifier the transmitter was paired on.
    pub device_id: String,
    /// When this transmitter was first paired.
    #[serde(with = "time::serde::rfc3339")]
    pub paired_at: OffsetDateTime,
    /// When the transmitter last completed its handshake.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_connected_at: Option<OffsetDateTime>,
}

impl StoredPairing {
    /// Rebuild the credential used for auto-reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPairing`](crate::Error::InvalidPairing) if the
    /// stored serial or identifier no longer validates.
    pub fn credential(&self) -> Result<PairingCredential> {
        let device = DeviceId::new(self.device_id.clone())?;
        Ok(PairingCredential::new(&self.serial, device)?)
    }
}

/// Summary statistics over a set of readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingStats {
    /// Number of readings.
    pub count: u64,
    /// Lowest value in mg/dL.
    pub min: Option<f64>,
    /// Highest value in mg/dL.
    pub max: Option<f64>,
    /// Mean value in mg/dL.
    pub mean: Option<f64>,
    /// Readings below the target range.
    pub below_range: u64,
    /// Readings inside the target range (inclusive).
    pub in_range: u64,
    /// Readings above the target range.
    pub above_range: u64,
}

impl ReadingStats {
    /// Lower bound of the target range in mg/dL.
    pub const RANGE_LOW: f64 = 70.0;
    /// Upper bound of the target range in mg/dL.
    pub const RANGE_HIGH: f64 = 180.0;

    /// Fraction of readings in range, or `None` when there are no readings.
    pub fn time_in_range(&self) -> Option<f64> {
        (self.count > 0).then(|| self.in_range as f64 / self.count as f64)
    }
}
