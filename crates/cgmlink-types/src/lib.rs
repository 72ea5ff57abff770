//! Platform-agnostic types for CGM transmitter connections.
//!
//! This crate provides the data model shared by the connection core
//! (cgmlink-core), the local store (cgmlink-store), and the CLI.
//!
//! # Features
//!
//! - Device identity and scan candidates
//! - Normalized pairing credentials
//! - The application-visible [`ConnectionState`]
//! - Glucose [`Reading`]s in a canonical unit (mg/dL) with trend classification
//! - Error types for validation
//!
//! # Example
//!
//! ```
//! use cgmlink_types::{ConnectionState, GlucoseUnit, Reading};
//! use time::OffsetDateTime;
//!
//! let reading = Reading::from_unit(5.5, GlucoseUnit::MmolPerL, OffsetDateTime::now_utc(), None);
//! assert!((reading.value - 99.09).abs() < 0.01);
//! assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    ConnectionState, DeviceCandidate, DeviceId, GlucoseUnit, MG_PER_DL_PER_MMOL_PER_L,
    PairingCredential, RADIO_UNAVAILABLE_REASON, RadioState, Reading, Trend, normalize_serial,
};
