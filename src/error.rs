//! Error types and handling.

use thiserror::Error;

use crate::dpp::types::AckCode;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum DppError {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// USB transfer or enumeration error
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Received buffer does not start with the 0xF5 0xFA sync pair
    #[error("Sync error: packet does not start with F5 FA")]
    Sync,

    /// Framed length field is out of range
    #[error("Length error: framed length {0} exceeds protocol bound")]
    Length(usize),

    /// Packet checksum does not zero the 16-bit byte sum
    #[error("Checksum error: packet sum is {0:#06X}, expected 0")]
    Checksum(u16),

    /// PID1/PID2 pair not in the response table
    #[error("PID error: unrecognized packet type {0:#04X} {1:#04X}")]
    Pid(u8, u8),

    /// Buffer shorter than the fixed layout being decoded
    #[error("Short buffer: got {got} bytes, need {need}")]
    ShortBuffer { got: usize, need: usize },

    /// Device negative acknowledgement
    #[error("Device NAK: {}", .0.describe())]
    Nak(AckCode),

    /// ASCII command payload exceeds the 512-byte hardware buffer
    #[error("Command string too long: {0} bytes (limit 512)")]
    CommandTooLong(usize),

    /// Timeout waiting for device response
    #[error("Timeout waiting for response")]
    Timeout,

    /// NetFinder discovery found no devices
    #[error("No device found: {0}")]
    NoDevice(String),

    /// Discovery or receive loop exceeded its byte/packet budget
    #[error("Receive budget exceeded: {0}")]
    Overflow(String),

    /// Config readback arrived with no format flag set
    #[error("No configuration readback format flag set before request")]
    ReadbackFormatNotSet,

    /// Serial transport is not implemented
    #[error("Serial transport not implemented")]
    SerialUnsupported,

    /// Configuration file missing or unusable
    #[error("Config error: {0}")]
    Config(String),

    /// Response arrived with an unexpected packet kind
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Result type alias for DppError.
pub type Result<T> = std::result::Result<T, DppError>;

impl DppError {
    /// Create a config error with message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an unexpected-response error with message.
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }
}
