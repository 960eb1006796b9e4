//! Saving and loading sessions as JSON.
//!
//! Only the snapshot and the id spaces are stored; the identity index is
//! rebuilt on load.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::SyncError;
use crate::session::SessionState;
use crate::translate::IdentitySpaces;
use crate::tree::Snapshot;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed session file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default)]
    pub revision: u64,
    pub snapshot: Snapshot,
    pub spaces: IdentitySpaces,
}

impl PersistedSession {
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            revision: state.revision,
            snapshot: state.snapshot.clone(),
            spaces: (*state.spaces).clone(),
        }
    }

    /// Write to `path`, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        let io_err = |source| PersistError::Io {
            path: path.display().to_string(),
            source,
        };
        let json = serde_json::to_vec_pretty(self).map_err(|source| PersistError::Json {
            path: path.display().to_string(),
            source,
        })?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        debug!(path = %path.display(), revision = self.revision, "session saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, PersistError> {
        let bytes = fs::read(path).map_err(|source| PersistError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| PersistError::Json {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::TempDir;
    use veil_types::{path, ActorId, Entity, Id, Node};

    use crate::dispatch::ActionRegistry;
    use crate::session::Session;
    use crate::store::SessionId;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("game.json");
        let snapshot = Snapshot::new(Node::map([(
            Id::new("cp"),
            Node::list([Entity::new("c1")
                .with_field("front", ":escaped")
                .with_visibility("front", [ActorId::new("cp")])
                .into()]),
        )]));
        let session = Session::new(
            SessionId::new("g"),
            Arc::new(ActionRegistry::new()),
            snapshot,
            vec![ActorId::new("ap"), ActorId::new("cp")],
            3,
        )
        .unwrap();

        let persisted = session.persist().unwrap();
        persisted.save(&file).unwrap();
        let loaded = PersistedSession::load(&file).unwrap();
        assert_eq!(loaded, persisted);

        let restored = Session::restore(SessionId::new("g"), Arc::new(ActionRegistry::new()), loaded, 4).unwrap();
        let ap = ActorId::new("ap");
        assert_eq!(restored.get_view(&ap).unwrap(), session.get_view(&ap).unwrap());
        assert_eq!(
            restored.current().unwrap().index.get(&Id::new("c1")),
            Some(&path![Id::new("cp"), 0usize])
        );
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(PersistedSession::load(&missing), Err(PersistError::Io { .. })));

        let garbage = dir.path().join("garbage.json");
        fs::write(&garbage, b"{\"snapshot\": {\"_\": {}}}").unwrap();
        assert!(matches!(PersistedSession::load(&garbage), Err(PersistError::Json { .. })));
    }
}
