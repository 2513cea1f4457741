//! Error types for wire-format parsing and validation.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while parsing or constructing packets.
///
/// Version and type errors are fatal to the node that observes them - a
/// peer speaking another dialect cannot be reasoned with. The remaining
/// variants are construction-time bugs surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Version byte differs from the one protocol version we speak.
    #[error("unsupported protocol version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Type byte does not name a known message, or carries the at-location
    /// flag on a message class that cannot carry it.
    #[error("unknown message type byte: {0:#04x}")]
    UnknownType(u8),

    /// Buffer is shorter than the fixed packet layout.
    #[error("packet too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Bytes required by the packet layout.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Image name does not fit the 255-byte wire field.
    #[error("image name too long: {len} bytes (max 255)")]
    NameTooLong {
        /// Length of the offending name.
        len: usize,
    },

    /// Image name field holds bytes that are not valid UTF-8.
    #[error("image name is not valid UTF-8")]
    InvalidName,
}
