//! Error types for cgmlink-core.
//!
//! Command-level errors only cover API misuse: a bad configuration, a
//! malformed pairing credential, or a service that has already shut down.
//! Runtime faults (radio off, failed connections, lost links) never surface
//! here. They end up in [`ConnectionState::Error`](cgmlink_types::ConnectionState)
//! and callers observe them through the state channel.
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::InvalidCredential`] | Ask the user for the serial again |
//! | [`Error::InvalidConfig`] | Fix configuration and restart |
//! | [`Error::Bluetooth`] / [`Error::NoAdapter`] | Radio layer could not be created |
//! | [`Error::ServiceShutdown`] | Service was stopped, build a new one |

use thiserror::Error;

use cgmlink_types::ParseError;

/// Errors returned by the connection core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the platform stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter was found on this machine.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// The radio is powered off, unauthorized, or unsupported.
    #[error("Bluetooth radio is unavailable")]
    RadioUnavailable,

    /// The pairing credential could not be normalized.
    #[error("Invalid pairing credential: {0}")]
    InvalidCredential(#[from] ParseError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The service actor has stopped and no longer accepts commands.
    #[error("Connection service has shut down")]
    ServiceShutdown,

    /// A reading could not be handed to the persistence collaborator.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a persistence error from any displayable failure.
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result type alias using cgmlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_credential_from_parse_error() {
        let err: Error = ParseError::EmptySerial.into();
        assert!(matches!(err, Error::InvalidCredential(ParseError::EmptySerial)));
        assert_eq!(
            err.to_string(),
            "Invalid pairing credential: Serial number is empty"
        );
    }

    #[test]
    fn test_invalid_config_display() {
        let err = Error::invalid_config("max_attempts must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: max_attempts must be at least 1"
        );
    }

    #[test]
    fn test_persistence_wraps_message() {
        let err = Error::persistence("disk full");
        assert_eq!(err.to_string(), "Persistence failed: disk full");
    }

    #[test]
    fn test_io_error_is_transparent() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "pipe closed");
        let err: Error = io.into();
        assert_eq!(err.to_string(), "pipe closed");
    }
}
