//! Error types for txmux.

use std::sync::Arc;

use thiserror::Error;

use crate::protocol::RequestId;

/// Main error type for all transaction transport operations.
///
/// The enum is `Clone` because a single transport failure is fanned out to
/// every pending request's inbox. `io::Error` is therefore held behind an
/// `Arc`, and codec failures are captured as rendered strings.
#[derive(Debug, Clone, Error)]
pub enum TxError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// The underlying stream terminated or reported failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A request was attempted on a session that is already closed.
    #[error("the transaction has been closed and no further operation is allowed")]
    TransactionClosed,

    /// A response arrived for an id that is not registered.
    ///
    /// Entry removal is caller-driven, so this is an internal protocol
    /// violation rather than a late-response race.
    #[error("unknown request ID: {0}")]
    UnknownRequestId(RequestId),

    /// The server resolved a specific request with an application-level
    /// failure (e.g. commit conflict, invalid payload).
    #[error("server reported error [{code}]: {message}")]
    ServerReported { code: String, message: String },

    /// The open handshake failed; the session never reached `Open`.
    #[error("transaction open failed: {0}")]
    OpenFailed(String),

    /// Malformed frame, oversized payload, unknown kind byte, etc.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A response frame carried no outcome at all.
    #[error("response outcome not set for request {0}")]
    MissingResponse(RequestId),

    /// Payload body serialization/deserialization error.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<std::io::Error> for TxError {
    fn from(err: std::io::Error) -> Self {
        TxError::Io(Arc::new(err))
    }
}

impl From<rmp_serde::encode::Error> for TxError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        TxError::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TxError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        TxError::Codec(err.to_string())
    }
}

/// Result type alias using TxError.
pub type Result<T> = std::result::Result<T, TxError>;
