//! Authoritative id -> path index.
//!
//! The index is rebuilt after every commit, but only below the paths a patch
//! set touched. Adding to or removing from a list shifts the later siblings,
//! so those patches dirty the whole list rather than the single slot.

use std::collections::HashMap;

use tracing::debug;
use veil_types::{Entity, Id, Node, Patch, Path};

use crate::error::{Result, SyncError};
use crate::tree::Snapshot;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityIndex {
    paths: HashMap<Id, Path>,
}

impl IdentityIndex {
    /// Index every entity in `snapshot`.
    pub fn build(snapshot: &Snapshot) -> Result<Self> {
        let mut index = Self::default();
        index.walk(snapshot, &Path::root())?;
        Ok(index)
    }

    pub fn get(&self, id: &Id) -> Option<&Path> {
        self.paths.get(id)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.paths.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Id, &Path)> {
        self.paths.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &Id> {
        self.paths.keys()
    }

    /// Resolve `id` to its entity in `snapshot`.
    pub fn entity<'a>(&self, snapshot: &'a Snapshot, id: &Id) -> Option<&'a Entity> {
        snapshot.entity(self.get(id)?).filter(|e| &e.id == id)
    }

    /// The index of `next`, where `next` was produced from the snapshot this
    /// index describes by applying `patches`.
    pub fn rebuild(&self, next: &Snapshot, patches: &[Patch]) -> Result<Self> {
        let roots = affected_roots(patches);
        if roots.iter().any(Path::is_root) {
            return Self::build(next);
        }

        let mut index = self.clone();
        index
            .paths
            .retain(|_, path| !roots.iter().any(|root| path.starts_with(root)));
        for root in &roots {
            index.walk(next, root)?;
        }
        debug!(roots = roots.len(), entities = index.len(), "rebuilt identity index");
        Ok(index)
    }

    /// Re-index the subtree of `snapshot` at `root`, if it still exists.
    fn walk(&mut self, snapshot: &Snapshot, root: &Path) -> Result<()> {
        let Some(node) = snapshot.get(root) else {
            return Ok(());
        };
        node.visit_entities(root, &mut |entity, path| self.insert(snapshot, entity, path))
    }

    fn insert(&mut self, snapshot: &Snapshot, entity: &Entity, path: &Path) -> Result<()> {
        if let Some(existing) = self.paths.get(&entity.id) {
            let still_there = snapshot
                .entity(existing)
                .is_some_and(|e| e.id == entity.id);
            if still_there && existing != path {
                return Err(SyncError::DuplicateIdentifier {
                    id: entity.id.clone(),
                    context: format!("entity found at both {existing} and {path}"),
                });
            }
        }
        self.paths.insert(entity.id.clone(), path.clone());
        Ok(())
    }

    /// Check that every entry resolves to an entity with its own id and that
    /// every entity in `snapshot` is indexed.
    pub fn is_consistent_with(&self, snapshot: &Snapshot) -> bool {
        let resolves = self
            .paths
            .iter()
            .all(|(id, path)| snapshot.entity(path).is_some_and(|e| &e.id == id));
        let mut count = 0;
        let complete = snapshot
            .root()
            .visit_entities(&Path::root(), &mut |entity, _| {
                count += 1;
                if self.contains(&entity.id) {
                    Ok(())
                } else {
                    Err(())
                }
            })
            .is_ok();
        resolves && complete && count == self.len()
    }
}

/// Minimal set of paths below which the index may be stale.
fn affected_roots(patches: &[Patch]) -> Vec<Path> {
    let mut roots: Vec<Path> = patches
        .iter()
        .map(|patch| {
            let path = patch.path();
            let Some(parent) = path.parent() else {
                return Path::root();
            };
            let shifts_siblings = matches!(patch, Patch::Add { .. } | Patch::Remove { .. })
                && path.last().is_some_and(|seg| seg.as_index().is_some() || seg.is_append());
            if shifts_siblings {
                parent
            } else if parent.last().is_some_and(|seg| seg.is_metadata()) {
                // Visibility edits leave the entity where it was.
                parent.parent().unwrap_or_default()
            } else {
                path.clone()
            }
        })
        .collect();

    roots.sort();
    roots.dedup();
    let mut minimal: Vec<Path> = Vec::with_capacity(roots.len());
    for root in roots {
        if !minimal.iter().any(|kept| root.starts_with(kept)) {
            minimal.push(root);
        }
    }
    minimal
}

/// Ids of every entity in `node`, in pre-order.
pub fn entity_ids(node: &Node) -> Vec<Id> {
    let mut ids = Vec::new();
    let _ = node.visit_entities::<(), _>(&Path::root(), &mut |entity, _| {
        ids.push(entity.id.clone());
        Ok(())
    });
    ids
}
