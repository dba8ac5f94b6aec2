use crate::link::LinkRecord;
use std::io;
use thiserror::Error;

/// The primary error type for the `insteon-lib` library.
#[derive(Error, Debug)]
pub enum InsteonError {
    // --- format errors ---
    #[error("Buffer is too short: expected at least {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("address format is xx.xx.xx (digits in hex)")]
    AddressFormat,

    #[error("Expected to parse {expected} hex fields, got {actual}")]
    HexFields { expected: usize, actual: usize },

    #[error("Expected {expected} fields got {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("Expected 2 characters got {0}")]
    FlagsLength(usize),

    #[error("Invalid value for Available flag")]
    AvailableFlag,

    #[error("Invalid value for Controller flag")]
    ControllerFlag,

    #[error("invalid number format")]
    InvalidNumber,

    #[error("valid groups are between 1 and 255 (inclusive)")]
    GroupRange,

    #[error("Unknown PLM command byte 0x{0:02x}")]
    UnknownPlmCommand(u8),

    // --- replies from the remote end ---
    #[error("NAK received")]
    Nak,

    #[error("Unexpected response from device")]
    UnexpectedResponse,

    #[error("Not in All-Link group")]
    NotLinked,

    #[error("No load detected")]
    NoLoadDetected,

    #[error("Unknown command")]
    UnknownCommand,

    #[error("Illegal value in command")]
    IllegalValue,

    #[error("I2CS invalid checksum")]
    IncorrectChecksum,

    #[error("Database search took too long")]
    PreNak,

    // --- timeouts ---
    #[error("Read Timeout")]
    ReadTimeout,

    #[error("Write Timeout")]
    WriteTimeout,

    #[error("Timeout waiting for Device ACK")]
    AckTimeout,

    // --- capabilities ---
    #[error("Command is not yet implemented")]
    NotImplemented,

    #[error("Action/command is not supported on this device")]
    NotSupported,

    // --- session ---
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unknown Insteon Version number {0}")]
    UnknownEngineVersion(u8),

    #[error("Failed to add link {0} to ALDB")]
    AddLinkFailed(LinkRecord),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl InsteonError {
    /// True for the errors produced by the connection's own clocks.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            InsteonError::ReadTimeout | InsteonError::WriteTimeout | InsteonError::AckTimeout
        )
    }
}
