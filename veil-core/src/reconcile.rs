//! Merging an actor's edit back into the authoritative tree.
//!
//! The actor computed its patches against a redacted tree, so a patch that
//! replaces an ancestor of a hidden field would silently delete (or overwrite)
//! data the actor never saw. After applying the edit, every field that was
//! hidden from the actor is forced back to its prior value and visibility
//! set, wherever its entity ended up.
//!
//! Before any of that the edit is replayed against the actor's own redacted
//! tree. A patch that does not apply there, or that addresses a hidden field
//! (its value, anything below it, or its visibility set), is rejected with
//! the same reason whatever the hidden content is.

use std::collections::BTreeSet;

use tracing::{debug, warn};
use veil_types::{ActorId, Node, Patch, Path};

use crate::diff::diff;
use crate::error::{Result, SyncError};
use crate::index::IdentityIndex;
use crate::redact::redact;
use crate::translate::Bijection;
use crate::tree::Snapshot;

const NOT_IN_VIEW: &str = "patch does not apply to the editor's view";

/// Outcome of a successful merge.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub snapshot: Snapshot,
    pub index: IdentityIndex,
    /// Authoritative patches from the prior snapshot to `snapshot`.
    pub patches: Vec<Patch>,
}

struct Restore {
    entity: Path,
    field: String,
    value: Option<Node>,
    visibility: BTreeSet<ActorId>,
}

/// Merge `view_patches`, written by `actor` in its own id space, into
/// `prior`.
///
/// Fails without side effects if a patch mentions an unmapped id, does not
/// apply to the actor's view, touches a field hidden from `actor`, would leave
/// two entities with one id, or removes an entity that carries a hidden field.
pub fn reconcile(
    prior: &Snapshot,
    prior_index: &IdentityIndex,
    bijection: &Bijection,
    actor: &ActorId,
    view_patches: &[Patch],
) -> Result<Reconciled> {
    let patches = bijection.to_authoritative().patches(view_patches)?;
    check_against_view(prior, actor, &patches, view_patches)?;
    let (candidate, applied) = prior
        .apply_patches(&patches)
        .map_err(|_| SyncError::invalid_patch(&Path::root(), NOT_IN_VIEW))?;
    let candidate_index = prior_index
        .rebuild(&candidate, &applied)
        .map_err(rejected_duplicate)?;

    let mut restores = Vec::new();
    let mut missing = Vec::new();
    for (id, prior_path) in prior_index.iter() {
        let Some(entity) = prior.entity(prior_path) else {
            continue;
        };
        let mut hidden = entity
            .visibility
            .iter()
            .filter(|(_, allowed)| !allowed.contains(actor))
            .peekable();
        if hidden.peek().is_none() {
            continue;
        }
        // May still come back inside a restored field of an ancestor.
        let Some(path) = candidate_index.get(id) else {
            missing.push((id, prior_path));
            continue;
        };
        for (field, allowed) in hidden {
            restores.push(Restore {
                entity: path.clone(),
                field: field.clone(),
                value: entity.fields.get(field).cloned(),
                visibility: allowed.clone(),
            });
        }
    }

    if restores.is_empty() && missing.is_empty() {
        let merged = diff(prior.root(), candidate.root());
        return Ok(Reconciled {
            snapshot: candidate,
            index: candidate_index,
            patches: merged,
        });
    }

    // Ancestors first; anything inside a field already put back is covered.
    restores.sort_by(|a, b| a.entity.cmp(&b.entity).then_with(|| a.field.cmp(&b.field)));
    let mut root = candidate.into_root();
    let mut restored: Vec<Path> = Vec::new();
    for restore in restores {
        if restored.iter().any(|done| restore.entity.starts_with(done)) {
            continue;
        }
        let field_path = restore.entity.child(restore.field.as_str());
        let entity = root
            .get_path_mut(&restore.entity)
            .and_then(Node::as_entity_mut)
            .ok_or_else(|| SyncError::invalid_patch(&restore.entity, "entity vanished while merging"))?;
        let overwritten = match restore.value {
            Some(value) => entity.fields.insert(restore.field.clone(), value.clone()) != Some(value),
            None => entity.fields.remove(&restore.field).is_some(),
        };
        entity.visibility.insert(restore.field, restore.visibility);
        if overwritten {
            debug!(actor = %actor, path = %field_path, "restored hidden field");
        }
        restored.push(field_path);
    }

    let merged = Snapshot::new(root);
    let patches = diff(prior.root(), merged.root());
    let index = prior_index
        .rebuild(&merged, &patches)
        .map_err(rejected_duplicate)?;
    if let Some((id, path)) = missing.into_iter().find(|(id, _)| !index.contains(id)) {
        debug!(actor = %actor, %id, "edit removes an entity with hidden fields");
        let path = bijection.to_view().path(path).unwrap_or_default();
        return Err(SyncError::invalid_patch(
            &path,
            "edit removes an entity with fields hidden from the editor",
        ));
    }
    Ok(Reconciled {
        snapshot: merged,
        index,
        patches,
    })
}

/// Replay `patches` on `actor`'s redacted tree. Errors carry the path the
/// actor wrote and one fixed reason.
fn check_against_view(prior: &Snapshot, actor: &ActorId, patches: &[Patch], view_patches: &[Patch]) -> Result<()> {
    let mut view = Snapshot::new(redact(prior.root(), actor));
    for (patch, written) in patches.iter().zip(view_patches) {
        let rejected = || SyncError::invalid_patch(written.path(), NOT_IN_VIEW);
        if touches_hidden(view.root(), patch.path(), actor) {
            return Err(rejected());
        }
        view = view
            .apply_patches(std::slice::from_ref(patch))
            .map_err(|_| rejected())?
            .0;
    }
    Ok(())
}

/// Whether `path` runs through or ends at a field of some entity that
/// `actor` cannot see, counting `[.., "_", field]` as addressing `field`.
fn touches_hidden(root: &Node, path: &Path, actor: &ActorId) -> bool {
    let mut node = root;
    let mut segments = path.iter().peekable();
    while let Some(segment) = segments.next() {
        if let Node::Entity(entity) = node {
            let field = if segment.is_metadata() {
                segments.peek().and_then(|next| next.as_name())
            } else {
                segment.as_name()
            };
            if field.is_some_and(|field| !entity.is_visible(field, actor)) {
                return true;
            }
        }
        match node.child(segment) {
            Some(child) => node = child,
            None => return false,
        }
    }
    false
}

fn rejected_duplicate(err: SyncError) -> SyncError {
    match err {
        SyncError::DuplicateIdentifier { id, context } => {
            warn!(%id, %context, "edit would duplicate an entity");
            SyncError::invalid_patch(&Path::root(), "edit duplicates an existing entity")
        }
        other => other,
    }
}
