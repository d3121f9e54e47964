//! Error handling for polarprint
//!
//! Provides error types for every layer of the host:
//! - Connection errors (serial port, discovery, timeouts)
//! - Protocol errors (malformed inbound frames, unencodable values)
//! - Firmware errors (version mismatch, reprogramming)
//! - Motion errors (transaction misuse, geometry)
//!
//! Arc overlap, negative lengths and shadow/profile mismatches are defects
//! and are asserted where they can occur, not reported through these types.
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents failures talking to the device over the serial link.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// No candidate port was found
    #[error("No device port found")]
    NoPortFound,

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Discovery or handshake timed out
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Read from the port failed
    #[error("Read failed: {reason}")]
    ReadFailed {
        /// The reason the read failed.
        reason: String,
    },

    /// Write to the port failed
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// The transport was used after it was stopped or disabled
    #[error("Not connected")]
    NotConnected,

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Protocol error type
///
/// Raised by the frame parsers. The RX worker recovers from all of these
/// locally; they never leave the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Checksum byte does not match the payload sum
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the payload.
        expected: u8,
        /// Checksum carried in the frame.
        actual: u8,
    },

    /// Frame does not start with a known marker
    #[error("Unknown frame marker {marker:#04x}")]
    UnknownMarker {
        /// The offending first byte.
        marker: u8,
    },

    /// Fewer bytes than the frame length
    #[error("Short frame: need {needed} bytes, have {available}")]
    ShortFrame {
        /// Bytes required for the frame.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Opcode byte outside the command set
    #[error("Unknown opcode {byte:#04x}")]
    UnknownOpcode {
        /// The unrecognised byte.
        byte: u8,
    },
}

/// Firmware error type
///
/// Represents device/firmware mismatches found during discovery.
#[derive(Error, Debug, Clone)]
pub enum FirmwareError {
    /// Device reported an unexpected firmware version
    #[error("Firmware version mismatch: expected {expected}, device reports {actual}")]
    VersionMismatch {
        /// The version the host requires.
        expected: u16,
        /// The version the device reported.
        actual: u16,
    },

    /// Reprogramming did not produce the expected version
    #[error("Reprogramming failed after {attempts} attempts")]
    ReprogramExhausted {
        /// Number of programming attempts made.
        attempts: u32,
    },

    /// No programmer was supplied to recover a mismatch
    #[error("No firmware programmer available")]
    NoProgrammer,

    /// The programmer collaborator reported a failure
    #[error("Programmer error: {reason}")]
    Programmer {
        /// The programmer's failure description.
        reason: String,
    },
}

/// Motion error type
///
/// Misuse of the motion controller's public API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MotionError {
    /// `begin_motor_changes` called while a transaction is open
    #[error("Motor change transaction already open")]
    TransactionOpen,

    /// A change was queued or ended without an open transaction
    #[error("No motor change transaction open")]
    NoTransaction,

    /// The motor id does not exist on this machine
    #[error("Unknown motor {id}")]
    UnknownMotor {
        /// The offending motor id.
        id: u8,
    },

    /// Geometry parameters cannot describe a machine
    #[error("Invalid geometry: {reason}")]
    InvalidGeometry {
        /// The reason the geometry is invalid.
        reason: String,
    },

    /// The motor exists but has no extruder state
    #[error("Motor {id} is not an extruder")]
    NotAnExtruder {
        /// The offending motor id.
        id: u8,
    },

    /// An arc was queued before any extruder claimed it
    #[error("Arc [{start}, {end}) has no motor")]
    UnassignedArc {
        /// First step of the arc.
        start: i64,
        /// End step of the arc.
        end: i64,
    },

    /// Only heaters 0 and 1 exist
    #[error("Unknown heater {index}")]
    UnknownHeater {
        /// The offending heater index.
        index: usize,
    },

    /// The controller was disabled after a hard failure
    #[error("Motion controller disabled")]
    Disabled,
}

/// Main error type for polarprint
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Firmware error
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    /// Motion error
    #[error(transparent)]
    Motion(#[from] MotionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError::ConnectionTimeout { .. })
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a firmware error
    pub fn is_firmware_error(&self) -> bool {
        matches!(self, Error::Firmware(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 0x10,
            actual: 0x11,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected 0x10, got 0x11"
        );

        let err = FirmwareError::VersionMismatch {
            expected: 7,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "Firmware version mismatch: expected 7, device reports 5"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ConnectionError::ConnectionTimeout { timeout_ms: 500 }.into();
        assert!(err.is_timeout());
        assert!(err.is_connection_error());

        let err: Error = FirmwareError::NoProgrammer.into();
        assert!(err.is_firmware_error());
        assert!(!err.is_timeout());

        let err: Error = MotionError::NoTransaction.into();
        assert_eq!(err.to_string(), "No motor change transaction open");
    }
}
