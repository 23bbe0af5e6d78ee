//! Domain error model.

use thiserror::Error;

use crate::payload::Channel;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (validation, invariants).
/// Backend concerns belong in the infra error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// A queue payload could not be turned into its typed record.
///
/// Malformed payloads are rejected outright; nothing is zero-filled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{channel} payload is not valid JSON for its schema: {reason}")]
    Malformed { channel: Channel, reason: String },

    #[error("{channel} payload failed validation: {source}")]
    Invalid {
        channel: Channel,
        #[source]
        source: DomainError,
    },
}

impl DecodeError {
    pub fn malformed(channel: Channel, reason: impl Into<String>) -> Self {
        Self::Malformed {
            channel,
            reason: reason.into(),
        }
    }

    pub fn invalid(channel: Channel, source: DomainError) -> Self {
        Self::Invalid { channel, source }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Malformed { channel, .. } | Self::Invalid { channel, .. } => *channel,
        }
    }
}
