//! Error types, one enum per concern.

use crate::connection::ConnectionState;
use crate::types::EntityId;
use thiserror::Error;

/// A reducer refused a message.  The state it was given is left untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("unknown prop type '{0}'")]
    UnknownProp(String),

    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("entity id must not be empty")]
    EmptyEntityId,
}

/// Failure reported by a [`Renderer`](crate::renderer::Renderer) call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("element '{0}' does not exist")]
    NotFound(EntityId),

    #[error("element '{0}' already exists")]
    AlreadyExists(EntityId),

    #[error("renderer backend error: {0}")]
    Backend(String),
}

/// Rollback could not restore the pre-transition rendered set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RollbackError {
    #[error("rollback requested while another rollback is in progress")]
    Reentrant,

    #[error("{failed} unwind call(s) failed; rendered scene was cleared")]
    Partial { failed: usize },
}

/// Wire decode failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message has no 'type' field")]
    MissingType,

    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity store i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity store encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the sync client and its transports.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport is disconnected")]
    Disconnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server rejected request: {0}")]
    Server(String),

    #[error("requested range [{from}, {to}) is not serviceable")]
    RangeUnavailable { from: u64, to: u64 },

    #[error("snapshot digest mismatch (server {expected}, local {actual})")]
    DigestMismatch { expected: String, actual: String },

    #[error("invalid connection transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("snapshot could not be applied: {0}")]
    Apply(String),

    #[error("client was cold-reset and must be reloaded")]
    ResetPending,

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid setting '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}
