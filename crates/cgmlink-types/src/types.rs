//! Core types for CGM transmitter connections and glucose readings.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};

/// Reason string published when the radio is off, unauthorized, or unsupported.
///
/// The connection core only auto-resumes scanning when the current error
/// carries exactly this reason.
pub const RADIO_UNAVAILABLE_REASON: &str = "Bluetooth is not available";

/// Conversion factor from mmol/L to mg/dL for glucose (molar mass 180.156 g/mol).
pub const MG_PER_DL_PER_MMOL_PER_L: f64 = 18.015_588;

/// Opaque identifier of a transmitter as reported by the radio layer.
///
/// On macOS this is the CoreBluetooth peripheral UUID; on Linux and Windows
/// it is the Bluetooth MAC address. Comparison is exact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device identifier, rejecting blank input.
    pub fn new(id: impl Into<String>) -> ParseResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ParseError::InvalidDeviceId);
        }
        Ok(Self(id))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for DeviceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A transmitter seen advertising during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceCandidate {
    /// Radio-level identifier used to connect.
    pub id: DeviceId,
    /// Advertised local name (e.g. "Dexcom-ABC123").
    pub name: String,
    /// Signal strength of the first accepted advertisement, in dBm.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub rssi: Option<i16>,
}

impl DeviceCandidate {
    /// Create a candidate without signal information.
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            rssi: None,
        }
    }
}

/// The serial number and device pairing needed to authenticate a transmitter.
///
/// The serial is normalized on construction: surrounding whitespace is
/// trimmed and letters are upper-cased, so `"  ab12cd  "` becomes `"AB12CD"`.
///
/// ```
/// use cgmlink_types::{DeviceId, PairingCredential};
///
/// let id = DeviceId::new("AA:BB:CC:DD:EE:FF").unwrap();
/// let credential = PairingCredential::new("  ab12cd  ", id).unwrap();
/// assert_eq!(credential.serial(), "AB12CD");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PairingCredential {
    serial: String,
    device_id: DeviceId,
}

impl PairingCredential {
    /// Normalize `serial` and bind it to `device_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::EmptySerial`] if nothing is left after trimming,
    /// or [`ParseError::InvalidSerial`] if the serial contains anything other
    /// than ASCII letters and digits.
    pub fn new(serial: &str, device_id: DeviceId) -> ParseResult<Self> {
        let serial = normalize_serial(serial)?;
        Ok(Self { serial, device_id })
    }

    /// The normalized serial number.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// The device this credential was issued for.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }
}

/// Trim and upper-case a transmitter serial number.
pub fn normalize_serial(serial: &str) -> ParseResult<String> {
    let trimmed = serial.trim();
    if trimmed.is_empty() {
        return Err(ParseError::EmptySerial);
    }
    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ParseError::InvalidSerial(trimmed.to_string()));
    }
    Ok(trimmed.to_ascii_uppercase())
}

/// Power state reported by the radio layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RadioState {
    /// State not yet reported.
    #[default]
    Unknown,
    /// Radio is resetting.
    Resetting,
    /// The platform has no usable radio.
    Unsupported,
    /// The application is not allowed to use the radio.
    Unauthorized,
    /// Radio is switched off.
    PoweredOff,
    /// Radio is on and ready.
    PoweredOn,
}

impl RadioState {
    /// Whether scan and connect requests can be issued.
    pub fn is_powered_on(self) -> bool {
        self == RadioState::PoweredOn
    }

    /// Whether this state makes the radio unusable until the user intervenes.
    ///
    /// `Unknown` and `Resetting` are transitional and do not count.
    pub fn is_unavailable(self) -> bool {
        matches!(
            self,
            RadioState::PoweredOff | RadioState::Unauthorized | RadioState::Unsupported
        )
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioState::Unknown => write!(f, "unknown"),
            RadioState::Resetting => write!(f, "resetting"),
            RadioState::Unsupported => write!(f, "unsupported"),
            RadioState::Unauthorized => write!(f, "unauthorized"),
            RadioState::PoweredOff => write!(f, "powered off"),
            RadioState::PoweredOn => write!(f, "powered on"),
        }
    }
}

/// Application-visible state of the transmitter link.
///
/// This is the single value the rest of the application observes; every
/// fault ends up as [`ConnectionState::Error`] with a displayable reason.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "state", content = "reason", rename_all = "snake_case")
)]
pub enum ConnectionState {
    /// No session and no scan.
    #[default]
    Disconnected,
    /// Listening for transmitter advertisements.
    Scanning,
    /// Radio connect issued, waiting for the vendor handshake.
    Connecting,
    /// Handshake completed; readings may arrive.
    Connected,
    /// A fault the user has to act on.
    Error(String),
}

impl ConnectionState {
    /// Whether this is an error state.
    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error(_))
    }

    /// The error reason, if this is an error state.
    pub fn error_reason(&self) -> Option<&str> {
        match self {
            ConnectionState::Error(reason) => Some(reason),
            _ => None,
        }
    }

    /// Whether the error was caused by the radio being unavailable.
    pub fn is_radio_unavailable(&self) -> bool {
        self.error_reason() == Some(RADIO_UNAVAILABLE_REASON)
    }

    /// Short lowercase label, useful for logs and machine output.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error(_) => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Scanning => write!(f, "Scanning"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Unit a glucose concentration is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum GlucoseUnit {
    /// Milligrams per decilitre, the canonical unit for stored readings.
    #[default]
    MgPerDl,
    /// Millimoles per litre.
    MmolPerL,
}

impl GlucoseUnit {
    /// Convert `value` in this unit to mg/dL.
    pub fn to_mg_per_dl(self, value: f64) -> f64 {
        match self {
            GlucoseUnit::MgPerDl => value,
            GlucoseUnit::MmolPerL => value * MG_PER_DL_PER_MMOL_PER_L,
        }
    }

    /// Convert `value` in mg/dL to this unit.
    pub fn from_mg_per_dl(self, value: f64) -> f64 {
        match self {
            GlucoseUnit::MgPerDl => value,
            GlucoseUnit::MmolPerL => value / MG_PER_DL_PER_MMOL_PER_L,
        }
    }

    /// Unit symbol as printed next to values.
    pub fn symbol(self) -> &'static str {
        match self {
            GlucoseUnit::MgPerDl => "mg/dL",
            GlucoseUnit::MmolPerL => "mmol/L",
        }
    }
}

impl fmt::Display for GlucoseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl core::str::FromStr for GlucoseUnit {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mg/dl" | "mgdl" | "mg" => Ok(GlucoseUnit::MgPerDl),
            "mmol/l" | "mmol" => Ok(GlucoseUnit::MmolPerL),
            other => Err(ParseError::InvalidValue(format!("unknown glucose unit '{other}'"))),
        }
    }
}

/// Direction of glucose change, derived from the transmitter's trend rate.
///
/// The transmitter reports the rate in tenths of mg/dL per minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Trend {
    /// Rising faster than 3 mg/dL/min.
    DoubleUp,
    /// Rising 2 to 3 mg/dL/min.
    SingleUp,
    /// Rising 1 to 2 mg/dL/min.
    FortyFiveUp,
    /// Changing less than 1 mg/dL/min.
    Flat,
    /// Falling 1 to 2 mg/dL/min.
    FortyFiveDown,
    /// Falling 2 to 3 mg/dL/min.
    SingleDown,
    /// Falling faster than 3 mg/dL/min.
    DoubleDown,
}

impl Trend {
    /// Classify a trend rate given in tenths of mg/dL per minute.
    ///
    /// ```
    /// use cgmlink_types::Trend;
    ///
    /// assert_eq!(Trend::from_rate(0), Trend::Flat);
    /// assert_eq!(Trend::from_rate(15), Trend::FortyFiveUp);
    /// assert_eq!(Trend::from_rate(-35), Trend::DoubleDown);
    /// ```
    pub fn from_rate(tenths_per_minute: i8) -> Self {
        match tenths_per_minute {
            r if r >= 30 => Trend::DoubleUp,
            r if r >= 20 => Trend::SingleUp,
            r if r >= 10 => Trend::FortyFiveUp,
            r if r > -10 => Trend::Flat,
            r if r > -20 => Trend::FortyFiveDown,
            r if r > -30 => Trend::SingleDown,
            _ => Trend::DoubleDown,
        }
    }

    /// Arrow glyph for display.
    pub fn arrow(self) -> &'static str {
        match self {
            Trend::DoubleUp => "⇈",
            Trend::SingleUp => "↑",
            Trend::FortyFiveUp => "↗",
            Trend::Flat => "→",
            Trend::FortyFiveDown => "↘",
            Trend::SingleDown => "↓",
            Trend::DoubleDown => "⇊",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.arrow())
    }
}

/// A normalized glucose reading.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Glucose concentration in mg/dL.
    pub value: f64,
    /// When the transmitter took the sample.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Trend rate in tenths of mg/dL per minute, if the transmitter sent one.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub trend: Option<i8>,
}

impl Reading {
    /// Create a reading from a value already in mg/dL.
    pub fn new(value: f64, timestamp: OffsetDateTime, trend: Option<i8>) -> Self {
        Self {
            value,
            timestamp,
            trend,
        }
    }

    /// Create a reading from a value in any unit, converting to mg/dL.
    pub fn from_unit(
        value: f64,
        unit: GlucoseUnit,
        timestamp: OffsetDateTime,
        trend: Option<i8>,
    ) -> Self {
        Self::new(unit.to_mg_per_dl(value), timestamp, trend)
    }

    /// The value converted to `unit`.
    pub fn value_in(&self, unit: GlucoseUnit) -> f64 {
        unit.from_mg_per_dl(self.value)
    }

    /// The classified trend, if a rate is present.
    pub fn trend_arrow(&self) -> Option<Trend> {
        self.trend.map(Trend::from_rate)
    }
}
