//! Error types for data validation in cgmlink-types.

use thiserror::Error;

/// Errors that can occur when building or validating CGM data types.
///
/// This error type is platform-agnostic and does not include
/// radio-specific errors (those belong in cgmlink-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The transmitter serial number was empty after trimming whitespace.
    #[error("Serial number is empty")]
    EmptySerial,

    /// The transmitter serial number contains characters that are not ASCII alphanumeric.
    #[error("Invalid serial number '{0}': only letters and digits are allowed")]
    InvalidSerial(String),

    /// The device identifier was empty.
    #[error("Device identifier is empty")]
    InvalidDeviceId,

    /// A value could not be interpreted.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using cgmlink-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
