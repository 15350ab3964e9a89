//! Relay error kinds.
//!
//! The `Display` text of a [`RelayError`] is what gets echoed back to a client
//! in the `error` field of an error reply, so the wording is part of the wire
//! contract.

use thiserror::Error;

/// Ways an inbound frame can fail to follow the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("Expected text message, got binary!")]
    BinaryFrame,

    #[error("Failed to parse the message as JSON: {0}")]
    MalformedJson(String),

    #[error("Received message had wrong protocol version: {0}")]
    WrongVersion(String),

    #[error("Invalid message, did not match the protocol")]
    UnmatchedShape,
}

/// Every failure the relay can raise while handling a message.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    ProtocolViolation(#[from] Violation),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("could not find id \"{0}\" while forwarding request")]
    UnresolvedTarget(String),

    #[error("failed to deliver message to {target}: {reason}")]
    DeliverySendFailure { target: String, reason: String },

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    pub fn unresolved(identity: impl Into<String>) -> Self {
        Self::UnresolvedTarget(identity.into())
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }
}
