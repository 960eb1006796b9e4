//! Immutable snapshots of the authoritative tree.
//!
//! A [`Snapshot`] is never edited. New snapshots come from running a mutator
//! against a draft ([`Snapshot::apply`]) or from replaying patches
//! ([`Snapshot::apply_patches`]); both leave `self` untouched and share every
//! unchanged subtree with it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;
use veil_types::node::visibility_from_node;
use veil_types::path::METADATA;
use veil_types::{Entity, Key, Node, Patch, Path, Segment};

use crate::diff::diff;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    root: Node,
}

impl Snapshot {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    pub fn get(&self, path: &Path) -> Option<&Node> {
        self.root.get_path(path)
    }

    pub fn entity(&self, path: &Path) -> Option<&Entity> {
        self.get(path).and_then(Node::as_entity)
    }

    /// Run `mutator` against a draft of this snapshot.
    ///
    /// Returns the new snapshot and the patches that lead to it. If the
    /// mutator fails, its error is returned and the draft is discarded.
    pub fn apply<E, F>(&self, mutator: F) -> std::result::Result<(Snapshot, Vec<Patch>), E>
    where
        F: FnOnce(&mut Node) -> std::result::Result<(), E>,
    {
        let mut draft = self.root.clone();
        mutator(&mut draft)?;
        let patches = diff(&self.root, &draft);
        Ok((Snapshot::new(draft), patches))
    }

    /// Replay `patches` in order.
    ///
    /// Returns the resulting snapshot together with the patches as applied:
    /// numeric names and `-` on lists resolved to concrete indices. The first
    /// patch that does not apply fails the whole batch.
    pub fn apply_patches(&self, patches: &[Patch]) -> Result<(Snapshot, Vec<Patch>)> {
        let mut root = self.root.clone();
        let applied = patches
            .iter()
            .map(|patch| apply_one(&mut root, patch))
            .collect::<Result<Vec<_>>>()?;
        Ok((Snapshot::new(root), applied))
    }
}

fn apply_one(root: &mut Node, patch: &Patch) -> Result<Patch> {
    let path = patch.path();
    trace!(op = patch.op(), %path, "applying patch");
    if patch.value().and_then(Node::find_reserved).is_some() {
        return Err(SyncError::reserved_name(path));
    }

    let (Some(last), Some(parent_path)) = (path.last(), path.parent()) else {
        return match patch {
            Patch::Remove { .. } => Err(SyncError::invalid_patch(path, "cannot remove the root")),
            Patch::Add { value, .. } | Patch::Replace { value, .. } => {
                *root = value.clone();
                Ok(patch.clone())
            }
        };
    };

    if parent_path.last().is_some_and(Segment::is_metadata) {
        let entity_path = parent_path.parent().unwrap_or_default();
        let entity = root
            .get_path_mut(&entity_path)
            .and_then(Node::as_entity_mut)
            .ok_or_else(|| SyncError::invalid_patch(path, "metadata segment outside an entity"))?;
        let field = last
            .as_name()
            .ok_or_else(|| SyncError::invalid_patch(path, "visibility is keyed by field name"))?;
        apply_visibility(entity, field, patch)?;
        return Ok(patch.clone());
    }

    let parent = root
        .get_path_mut(&parent_path)
        .ok_or_else(|| SyncError::invalid_patch(path, "path does not resolve"))?;

    let resolved = match parent {
        Node::List(items) => {
            let items = Arc::make_mut(items);
            let index = apply_to_list(items, last, patch)?;
            Segment::Index(index)
        }
        Node::Map(_) if last.is_metadata() => return Err(SyncError::reserved_name(path)),
        Node::Map(entries) => {
            let key = last.to_key();
            apply_to_slot(Arc::make_mut(entries), key.clone(), patch)?;
            Segment::Key(key)
        }
        Node::Entity(entity) => {
            let field = match last.to_key() {
                Key::Name(name) if name != METADATA => name,
                Key::Name(_) => {
                    return Err(SyncError::invalid_patch(
                        path,
                        "the metadata block is only addressable per field",
                    ))
                }
                Key::Id(_) => {
                    return Err(SyncError::invalid_patch(path, "entity fields are named, not identified"))
                }
            };
            apply_to_slot(&mut Arc::make_mut(entity).fields, field.clone(), patch)?;
            Segment::name(field)
        }
        other => {
            return Err(SyncError::invalid_patch(
                path,
                format!("cannot address a child of a {}", other.kind()),
            ))
        }
    };

    let path = parent_path.child(resolved);
    Ok(match patch {
        Patch::Add { value, .. } => Patch::Add {
            path,
            value: value.clone(),
        },
        Patch::Replace { value, .. } => Patch::Replace {
            path,
            value: value.clone(),
        },
        Patch::Remove { .. } => Patch::Remove { path },
    })
}

fn apply_to_list(items: &mut Vec<Node>, last: &Segment, patch: &Patch) -> Result<usize> {
    let path = patch.path();
    let len = items.len();
    let index = if last.is_append() && matches!(patch, Patch::Add { .. }) {
        len
    } else {
        last.as_index()
            .ok_or_else(|| SyncError::invalid_patch(path, "expected a list index"))?
    };
    let out_of_bounds = || SyncError::invalid_patch(path, format!("index {index} out of bounds for length {len}"));

    match patch {
        Patch::Add { value, .. } => {
            if index > len {
                return Err(out_of_bounds());
            }
            items.insert(index, value.clone());
        }
        Patch::Replace { value, .. } => {
            let slot = items.get_mut(index).ok_or_else(out_of_bounds)?;
            *slot = value.clone();
        }
        Patch::Remove { .. } => {
            if index >= len {
                return Err(out_of_bounds());
            }
            items.remove(index);
        }
    }
    Ok(index)
}

fn apply_to_slot<K: Ord>(
    slots: &mut std::collections::BTreeMap<K, Node>,
    key: K,
    patch: &Patch,
) -> Result<()> {
    let missing = || SyncError::invalid_patch(patch.path(), "no such key");
    match patch {
        Patch::Add { value, .. } => {
            slots.insert(key, value.clone());
        }
        Patch::Replace { value, .. } => {
            let slot = slots.get_mut(&key).ok_or_else(missing)?;
            *slot = value.clone();
        }
        Patch::Remove { .. } => {
            slots.remove(&key).ok_or_else(missing)?;
        }
    }
    Ok(())
}

fn apply_visibility(entity: &mut Entity, field: &str, patch: &Patch) -> Result<()> {
    let path = patch.path();
    match patch {
        Patch::Add { value, .. } | Patch::Replace { value, .. } => {
            let actors = visibility_from_node(value).ok_or_else(|| {
                SyncError::invalid_patch(path, "visibility must be a list of actor identifiers")
            })?;
            if matches!(patch, Patch::Replace { .. }) && !entity.visibility.contains_key(field) {
                return Err(SyncError::invalid_patch(path, "field has no visibility set"));
            }
            entity.visibility.insert(field.to_string(), actors);
        }
        Patch::Remove { .. } => {
            entity
                .visibility
                .remove(field)
                .ok_or_else(|| SyncError::invalid_patch(path, "field has no visibility set"))?;
        }
    }
    Ok(())
}
