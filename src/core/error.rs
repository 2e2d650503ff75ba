//! Error types for the data-collection agent.
//!
//! A single error enum covers every failure class in the driver subsystem.
//! The manager relies on the distinction between per-driver failures
//! (`Config`, `UnknownProtocol`) and per-tag failures (`AddressParse`,
//! codec errors): none of them is allowed to take down the whole agent.

use thiserror::Error;

use crate::core::data::DataType;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error type.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A tag address string matched none of the supported grammar forms.
    ///
    /// The owning tag is marked unparsed and excluded from I/O until the
    /// configuration is reloaded.
    #[error("address parse error: {0}")]
    AddressParse(String),

    /// Handshake or reconnect failure. Retried on the next poll cycle.
    #[error("connection error: {0}")]
    Connection(String),

    /// An operation required an open connection.
    #[error("not connected")]
    NotConnected,

    /// Malformed or unexpected protocol frame from the device.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The codec has no encoding for this datatype.
    #[error("unsupported data type: {0}")]
    UnsupportedType(DataType),

    /// A decode/encode window exceeds the available buffer.
    #[error("buffer too short: need {needed} bytes, have {actual}")]
    BufferTooShort { needed: usize, actual: usize },

    /// A value cannot be coerced to the target wire type.
    #[error("cannot convert {got} to {expected}")]
    TypeMismatch { expected: DataType, got: String },

    /// Write rejected: unknown tag, read-only tag, or transport failure.
    /// Returned synchronously to the `write()` caller.
    #[error("write error: {0}")]
    Write(String),

    /// No constructor registered for the URL scheme. The affected device
    /// is omitted from the active set; other devices proceed.
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Invalid persisted record or driver parameter. Aborts construction
    /// for the affected driver only.
    #[error("config error: {0}")]
    Config(String),

    /// Persisted store or realtime sink failure.
    #[error("store error: {0}")]
    Store(String),
}

impl AgentError {
    /// Create a write error.
    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check whether this error came from the codec layer.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedType(_) | Self::BufferTooShort { .. } | Self::TypeMismatch { .. }
        )
    }
}
