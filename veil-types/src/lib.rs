//! Shared types for veil
//!
//! This crate provides the data model shared by the sync engine and the game
//! server: identifiers, the state tree, paths and patches, plus the JSON codec
//! used on the wire and for persistence.

pub mod codec;
pub mod node;
pub mod patch;
pub mod path;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use codec::CodecError;
pub use node::{Entity, Key, Node};
pub use patch::Patch;
pub use path::{Path, Segment};

/// Identifier of an entity (or of an actor) in some identifier space.
///
/// Whether an `Id` is authoritative or a view alias depends on where it lives;
/// the translator in `veil-core` moves trees between the two spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl From<&str> for Id {
    fn from(id: &str) -> Self {
        Id::new(id)
    }
}

/// Identity of a player.
///
/// Actor ids double as identifiers (per-player containers are keyed by them),
/// and every actor id is a fixed point of every view bijection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(Id);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Id::new(id))
    }

    pub fn as_id(&self) -> &Id {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Id> for ActorId {
    fn from(id: Id) -> Self {
        ActorId(id)
    }
}

impl From<ActorId> for Id {
    fn from(actor: ActorId) -> Self {
        actor.0
    }
}
