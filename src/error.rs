//! # Error Types
//!
//! Custom error types for pwrctl using `thiserror`.

use thiserror::Error;

/// Main error type for pwrctl
#[derive(Debug, Error)]
pub enum PwrctlError {
    /// Malformed or short response from the power controller
    #[error("Power controller protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No power controller serial port found (tried: {0})")]
    SerialPortNotFound(String),

    /// No matching response arrived before the call deadline
    #[error("Timed out after {timeout_ms} ms waiting for response to command 0x{command:02X}")]
    Timeout { command: u8, timeout_ms: u64 },

    /// The link receiver has stopped; no response can arrive
    #[error("Power controller link is closed")]
    LinkClosed,

    /// Payload does not fit in a frame
    #[error("Payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),

    /// Intel-HEX input could not be parsed
    #[error("Intel HEX error on line {line}: {reason}")]
    HexFormat { line: usize, reason: String },

    /// Flash image is not safe to program
    #[error("Firmware image error: {0}")]
    Firmware(String),

    /// A firmware update step failed and the update was aborted
    #[error("Firmware update aborted during {step}: {source}")]
    UpdateStep {
        step: String,
        #[source]
        source: Box<PwrctlError>,
    },
}

impl PwrctlError {
    /// True when this error (or the step failure it wraps) is a response timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            PwrctlError::Timeout { .. } => true,
            PwrctlError::UpdateStep { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Result type alias for pwrctl
pub type Result<T> = std::result::Result<T, PwrctlError>;
