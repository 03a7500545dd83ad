//! Error types

use thiserror::Error;

use crate::SessionHandle;

/// A byte stream that does not follow the USB/IP protocol.
///
/// Every variant is fatal for the connection it was read from.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed header")]
    MalformedHeader,

    #[error("Unknown version: {0:#06X}")]
    UnknownVersion(u16),

    #[error("Unknown command: {0:#06X}")]
    UnknownCommand(u32),

    #[error("Invalid direction: {0}")]
    InvalidDirection(u32),

    #[error("Transfer of {0} bytes exceeds the supported maximum")]
    TransferTooLarge(u32),
}

/// Why a transfer could not be placed in the transfer table
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    #[error("a transfer is already in flight on this endpoint")]
    Busy,

    #[error("device address or endpoint outside of the table")]
    OutOfRange,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Unknown session {0}")]
    UnknownSession(SessionHandle),
}

pub type Result<T> = std::result::Result<T, Error>;
