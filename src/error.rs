//! Error taxonomy shared by the codec, store, transports and sync controller.
//!
//! Schema and codec failures are plain values so the controller can decide how to
//! recover. Transport failures are converted into [`SyncError`] at the controller
//! boundary before they reach the user.

use thiserror::Error;

use crate::settings::schema::ValidationReport;

/// Failures while interpreting a device payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Serial line did not start with a known opcode (`g` or `s`).
    #[error("unrecognized opcode '{0}'")]
    UnrecognizedOpcode(char),

    /// Opcode was fine but the payload could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Blank line where a reply was expected.
    #[error("empty line")]
    EmptyLine,
}

impl ProtocolError {
    pub(crate) fn malformed(detail: impl std::fmt::Display) -> Self {
        ProtocolError::MalformedPayload(detail.to_string())
    }
}

/// Failures raised by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {target}: {reason}")]
    Open { target: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(String),

    /// The peer went away after the request was sent, before a full response.
    #[error("connection dropped: {0}")]
    Dropped(String),

    #[error("transport is not open")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation not supported by {0} transport")]
    Unsupported(&'static str),
}

/// User-facing failures of the sync lifecycle.
///
/// Nothing here is fatal: each error leaves the controller in `Disconnected` or
/// `Connected` and is meant to be shown as a transient notification.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport could not be opened or the initial fetch failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Transport broke while sending settings.
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Transport could not be released cleanly.
    #[error("disconnect error: {0}")]
    Disconnect(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Settings failed schema validation; nothing was sent.
    #[error("validation error: {0}")]
    Validation(ValidationReport),

    /// Backup or cached document could not be parsed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Device did not acknowledge in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Device answered `s0`.
    #[error("transfer error: device rejected the settings")]
    Rejected,

    #[error("operation not allowed while {0}")]
    InvalidState(&'static str),

    /// A save is already in flight.
    #[error("a save is already in progress")]
    Busy,

    #[error("cache error: {0}")]
    Cache(#[from] std::io::Error),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}
