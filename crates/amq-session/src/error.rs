//! Session-layer error types.
//!
//! These cover the full taxonomy: protocol failures reported by the broker or
//! transport, misuse of a channel (wrong transaction mode, closed channel),
//! explicitly unsupported operations, and undeliverable-message errors that
//! are reported to the connection's exception sink rather than thrown at a
//! caller.

use crate::message::TypedMessage;
use crate::types::ChannelId;

/// Failure raised by the transport collaborator while writing a command or
/// waiting for a broker reply.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("broker rejected command: code {code} ({text})")]
    Rejected { code: u16, text: String },

    #[error("no reply received from broker")]
    NoReply,
}

/// Failure reported by the message-factory collaborator while reconstructing
/// a message from its content header and body fragments.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to decode message: {0}")]
pub struct DecodeError(pub String);

/// Channel-level failure surfaced to callers of the session API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("channel {0} is closed")]
    Closed(ChannelId),

    #[error("operation requires a transacted channel")]
    NotTransacted,

    #[error("operation is not valid on a transacted channel")]
    Transacted,

    #[error("not implemented: {0}")]
    Unsupported(&'static str),

    #[error("failed to commit: {0}")]
    CommitFailed(#[source] TransportError),

    #[error("failed to rollback: {0}")]
    RollbackFailed(#[source] TransportError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// A message the broker returned instead of delivering.
///
/// These are reported to the connection's exception sink; no caller is
/// waiting on a bounced message, so they are never thrown synchronously.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UndeliveredError {
    #[error("no consumers available for message: {reason}")]
    NoConsumers {
        reason: String,
        message: TypedMessage,
    },

    #[error("no route to any queue for message: {reason}")]
    NoRoute {
        reason: String,
        message: TypedMessage,
    },

    #[error("message undelivered (reply code {code}): {reason}")]
    Undelivered {
        code: u16,
        reason: String,
        message: TypedMessage,
    },
}

impl UndeliveredError {
    /// The message the broker bounced back.
    pub fn message(&self) -> &TypedMessage {
        match self {
            UndeliveredError::NoConsumers { message, .. }
            | UndeliveredError::NoRoute { message, .. }
            | UndeliveredError::Undelivered { message, .. } => message,
        }
    }
}
