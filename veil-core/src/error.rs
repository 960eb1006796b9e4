//! Error types for the sync engine

use std::fmt;

use thiserror::Error;
use veil_types::{ActorId, Id, Path};

use crate::dispatch::ActionError;

/// Which identifier space an identifier was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Authoritative,
    View,
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Space::Authoritative => f.write_str("authoritative"),
            Space::View => f.write_str("view"),
        }
    }
}

/// Errors raised by the engine.
///
/// Everything except [`SyncError::DuplicateIdentifier`] is a rejected request:
/// it is reported before the session's current state changes. A duplicate
/// identifier means the id generator or a bijection is broken and faults the
/// session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    #[error("unknown actor {0}")]
    UnknownActor(ActorId),

    #[error("identifier {id} is not mapped in the {space} space")]
    UnmappedIdentifier { id: Id, space: Space },

    #[error("unknown action {0:?}")]
    UnknownAction(String),

    #[error("invalid patch at {path}: {reason}")]
    InvalidPatch { path: Path, reason: String },

    #[error("duplicate identifier {id}: {context}")]
    DuplicateIdentifier { id: Id, context: String },

    #[error("action {action:?} failed: {source}")]
    ActionFailed {
        action: String,
        #[source]
        source: ActionError,
    },

    #[error("session {session} is faulted: {reason}")]
    SessionFaulted { session: String, reason: String },

    #[error("unknown session {0}")]
    UnknownSession(String),
}

impl SyncError {
    pub(crate) fn invalid_patch(path: &Path, reason: impl Into<String>) -> Self {
        SyncError::InvalidPatch {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn reserved_name(path: &Path) -> Self {
        SyncError::invalid_patch(path, "`_` is reserved for entity metadata")
    }

    /// True if the error means the session can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::DuplicateIdentifier { .. })
    }
}

/// Result type using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;
