//! Error types shared by the session, resolver and codec.

use std::fmt;
use thiserror::Error;

/// Failures a peripheral session can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Bluetooth is powered off or unavailable
    #[error("Bluetooth is not powered on")]
    RadioUnavailable,
    #[error("No response from peripheral")]
    ConnectionTimedOut,
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),
    /// A write was attempted before the TX characteristic was resolved
    #[error("Unable to write data without a TX characteristic")]
    NotReady,
    #[error("TX characteristic has no usable write property")]
    Unwritable,
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Peripheral disconnected unexpectedly")]
    UnexpectedDisconnect,
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Firmata(#[from] FirmataError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RadioUnavailable => ErrorKind::RadioUnavailable,
            Self::ConnectionTimedOut => ErrorKind::ConnectionTimedOut,
            Self::DiscoveryFailed(_) => ErrorKind::DiscoveryFailed,
            Self::NotReady => ErrorKind::NotReady,
            Self::Unwritable => ErrorKind::Unwritable,
            Self::MalformedFrame(_) => ErrorKind::MalformedFrame,
            Self::UnexpectedDisconnect => ErrorKind::UnexpectedDisconnect,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Firmata(_) => ErrorKind::PinControl,
        }
    }
}

/// Flat error classification carried by consumer-facing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RadioUnavailable,
    ConnectionTimedOut,
    DiscoveryFailed,
    NotReady,
    Unwritable,
    MalformedFrame,
    UnexpectedDisconnect,
    Transport,
    PinControl,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RadioUnavailable => "radio unavailable",
            Self::ConnectionTimedOut => "connection timed out",
            Self::DiscoveryFailed => "discovery failed",
            Self::NotReady => "not ready",
            Self::Unwritable => "unwritable",
            Self::MalformedFrame => "malformed frame",
            Self::UnexpectedDisconnect => "unexpected disconnect",
            Self::Transport => "transport",
            Self::PinControl => "pin control",
        };
        f.write_str(name)
    }
}

/// A transport request could not be submitted to the BLE stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Rejected pin I/O commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FirmataError {
    #[error("Pin {0} is not part of the board layout")]
    UnknownPin(u8),
    #[error("Pin {pin} does not support mode {mode}")]
    UnsupportedMode { pin: u8, mode: String },
    #[error("Pin {0} is outside the reportable ports")]
    PortOutOfRange(u8),
    #[error("Pin {0} has no analog channel")]
    NoAnalogChannel(u8),
    #[error("Pin {0} cannot be addressed by a 3-byte command")]
    NotAddressable(u8),
    #[error("Value {value} is out of range for pin {pin}")]
    ValueOutOfRange { pin: u8, value: u16 },
    #[error("Pin layout is not known yet")]
    LayoutPending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(SessionError::NotReady.kind(), ErrorKind::NotReady);
        assert_eq!(
            SessionError::DiscoveryFailed("gone".into()).kind(),
            ErrorKind::DiscoveryFailed
        );
        let err: SessionError = TransportError::new("busy").into();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.to_string(), "Transport error: busy");
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            SessionError::ConnectionTimedOut.to_string(),
            "No response from peripheral"
        );
    }
}
