//! Structural diff between two trees.
//!
//! Produces the patch list that turns `old` into `new`, in pre-order of the
//! changed paths. Rules:
//!
//! - equal subtrees emit nothing (shared `Arc`s are skipped without a walk);
//! - different node kinds, scalars, or entities with different ids are
//!   `replace`d whole;
//! - maps and entity fields are merged key by key in key order: `remove` for
//!   vanished keys, recursion for common ones, `add` for new ones;
//! - an entity's visibility sets are diffed under the `_` segment before its
//!   fields, one whole set per field;
//! - lists recurse over the common prefix, then `add` the new tail in
//!   ascending order, then `remove` the surplus tail in descending order, so
//!   the patches replay in sequence.

use std::collections::{BTreeMap, BTreeSet};

use veil_types::node::visibility_to_node;
use veil_types::path::METADATA;
use veil_types::{ActorId, Entity, Node, Patch, Path, Segment};

/// Patches turning `old` into `new`.
pub fn diff(old: &Node, new: &Node) -> Vec<Patch> {
    let mut out = Vec::new();
    let mut path = Path::root();
    diff_node(old, new, &mut path, &mut out);
    out
}

fn diff_node(old: &Node, new: &Node, path: &mut Path, out: &mut Vec<Patch>) {
    if old.ptr_eq(new) || old == new {
        return;
    }
    match (old, new) {
        (Node::Map(a), Node::Map(b)) => diff_keyed(a, b, |k| Segment::Key(k.clone()), path, out),
        (Node::List(a), Node::List(b)) => diff_list(a, b, path, out),
        (Node::Entity(a), Node::Entity(b)) if a.id == b.id => diff_entity(a, b, path, out),
        _ => out.push(Patch::Replace {
            path: path.clone(),
            value: new.clone(),
        }),
    }
}

fn diff_entity(old: &Entity, new: &Entity, path: &mut Path, out: &mut Vec<Patch>) {
    if old.visibility != new.visibility {
        path.push(METADATA);
        diff_visibility(&old.visibility, &new.visibility, path, out);
        path.pop();
    }
    diff_keyed(&old.fields, &new.fields, |f| Segment::name(f.clone()), path, out);
}

/// Visibility sets change as a whole: one patch at `[.., "_", field]`.
fn diff_visibility(
    old: &BTreeMap<String, BTreeSet<ActorId>>,
    new: &BTreeMap<String, BTreeSet<ActorId>>,
    path: &Path,
    out: &mut Vec<Patch>,
) {
    for field in old.keys() {
        if !new.contains_key(field) {
            out.push(Patch::Remove {
                path: path.child(Segment::name(field.clone())),
            });
        }
    }
    for (field, actors_new) in new {
        let at = || path.child(Segment::name(field.clone()));
        match old.get(field) {
            Some(actors) if actors == actors_new => {}
            Some(_) => out.push(Patch::Replace {
                path: at(),
                value: visibility_to_node(actors_new),
            }),
            None => out.push(Patch::Add {
                path: at(),
                value: visibility_to_node(actors_new),
            }),
        }
    }
}

fn diff_keyed<K, F>(
    old: &BTreeMap<K, Node>,
    new: &BTreeMap<K, Node>,
    segment: F,
    path: &mut Path,
    out: &mut Vec<Patch>,
) where
    K: Ord,
    F: Fn(&K) -> Segment,
{
    let mut old_iter = old.iter().peekable();
    let mut new_iter = new.iter().peekable();

    loop {
        let step = match (old_iter.peek(), new_iter.peek()) {
            (None, None) => break,
            (Some((ok, _)), Some((nk, _))) => ok.cmp(nk),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
        };
        match step {
            std::cmp::Ordering::Less => {
                let Some((key, _)) = old_iter.next() else { break };
                out.push(Patch::Remove {
                    path: path.child(segment(key)),
                });
            }
            std::cmp::Ordering::Greater => {
                let Some((key, value)) = new_iter.next() else { break };
                out.push(Patch::Add {
                    path: path.child(segment(key)),
                    value: value.clone(),
                });
            }
            std::cmp::Ordering::Equal => {
                let (Some((key, a)), Some((_, b))) = (old_iter.next(), new_iter.next()) else {
                    break;
                };
                path.push(segment(key));
                diff_node(a, b, path, out);
                path.pop();
            }
        }
    }
}

fn diff_list(old: &[Node], new: &[Node], path: &mut Path, out: &mut Vec<Patch>) {
    let common = old.len().min(new.len());
    for i in 0..common {
        path.push(i);
        diff_node(&old[i], &new[i], path, out);
        path.pop();
    }
    for (i, value) in new.iter().enumerate().skip(common) {
        out.push(Patch::Add {
            path: path.child(i),
            value: value.clone(),
        });
    }
    for i in (common..old.len()).rev() {
        out.push(Patch::Remove {
            path: path.child(i),
        });
    }
}
