//! Per-actor field redaction.
//!
//! A field is dropped when its entity carries a visibility set for it that
//! does not name the actor. Metadata (the id and every visibility set) always
//! survives, so an actor can tell that something is hidden but not what.
//! Subtrees without anything to hide are shared with the input.

use std::sync::Arc;

use veil_types::{ActorId, Node};

use crate::error::Result;
use crate::translate::IdentitySpaces;
use crate::tree::Snapshot;

/// `node` as `actor` may see it.
pub fn redact(node: &Node, actor: &ActorId) -> Node {
    redact_changed(node, actor).unwrap_or_else(|| node.clone())
}

pub fn redact_snapshot(snapshot: &Snapshot, actor: &ActorId) -> Snapshot {
    Snapshot::new(redact(snapshot.root(), actor))
}

/// The tree `actor` is shown: redacted, then moved into its id space.
pub fn project(snapshot: &Snapshot, spaces: &IdentitySpaces, actor: &ActorId) -> Result<Node> {
    let bijection = spaces.bijection(actor)?;
    bijection.to_view().node(&redact(snapshot.root(), actor))
}

// `None` means nothing below `node` is hidden from `actor`.
fn redact_changed(node: &Node, actor: &ActorId) -> Option<Node> {
    match node {
        Node::List(items) => {
            let changed: Vec<Option<Node>> = items.iter().map(|item| redact_changed(item, actor)).collect();
            if changed.iter().all(Option::is_none) {
                return None;
            }
            let items = items
                .iter()
                .zip(changed)
                .map(|(item, redacted)| redacted.unwrap_or_else(|| item.clone()))
                .collect();
            Some(Node::List(Arc::new(items)))
        }
        Node::Map(entries) => {
            let mut out = None;
            for (key, value) in entries.iter() {
                if let Some(redacted) = redact_changed(value, actor) {
                    out.get_or_insert_with(|| (**entries).clone())
                        .insert(key.clone(), redacted);
                }
            }
            out.map(|entries| Node::Map(Arc::new(entries)))
        }
        Node::Entity(entity) => {
            let mut out = None;
            for (field, value) in &entity.fields {
                let edit = if entity.is_visible(field, actor) {
                    redact_changed(value, actor).map(Some)
                } else {
                    Some(None)
                };
                if let Some(edit) = edit {
                    let fields = &mut out.get_or_insert_with(|| (**entity).clone()).fields;
                    match edit {
                        Some(redacted) => fields.insert(field.clone(), redacted),
                        None => fields.remove(field),
                    };
                }
            }
            out.map(|entity| Node::Entity(Arc::new(entity)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_types::{path, Entity, Id};

    fn hand() -> Node {
        Node::map([
            (
                Id::new("cp"),
                Node::list([Entity::new("c1")
                    .with_field("front", "Guns of August")
                    .with_field("back", "CP")
                    .with_visibility("front", [ActorId::new("cp")])
                    .into()]),
            ),
            (Id::new("ap"), Node::list([Entity::new("a1").with_field("front", "public").into()])),
        ])
    }

    #[test]
    fn test_hidden_fields_are_dropped_metadata_kept() {
        let ap = ActorId::new("ap");
        let redacted = redact(&hand(), &ap);
        let card = redacted
            .get_path(&path![Id::new("cp"), 0usize])
            .and_then(Node::as_entity)
            .unwrap();

        assert!(!card.fields.contains_key("front"));
        assert_eq!(card.fields.get("back"), Some(&Node::from("CP")));
        assert_eq!(card.id, Id::new("c1"));
        assert!(card.visibility.contains_key("front"));
    }

    #[test]
    fn test_owner_sees_everything() {
        let tree = hand();
        let redacted = redact(&tree, &ActorId::new("cp"));
        assert_eq!(redacted, tree);
        assert!(redacted.ptr_eq(&tree));
    }

    #[test]
    fn test_untouched_subtrees_are_shared() {
        let tree = hand();
        let redacted = redact(&tree, &ActorId::new("ap"));
        let key = Id::new("ap");
        assert!(redacted
            .get_path(&path![key.clone()])
            .unwrap()
            .ptr_eq(tree.get_path(&path![key]).unwrap()));
    }

    #[test]
    fn test_redaction_is_idempotent() {
        let ap = ActorId::new("ap");
        let once = redact(&hand(), &ap);
        assert_eq!(redact(&once, &ap), once);
    }

    #[test]
    fn test_nested_hidden_fields() {
        let tree: Node = Entity::new("box")
            .with_field("contents", Entity::new("inner").with_field("secret", 1u64).with_visibility("secret", []))
            .into();
        let redacted = redact(&tree, &ActorId::new("ap"));
        let inner = redacted.get_path(&path!["contents"]).and_then(Node::as_entity).unwrap();
        assert!(inner.fields.is_empty());
        assert!(tree.get_path(&path!["contents", "secret"]).is_some());
    }
}
