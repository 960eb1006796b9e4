//! The state tree.
//!
//! Containers hold their children behind `Arc`, so cloning a tree is cheap and
//! two snapshots share every subtree neither of them touched. Mutation goes
//! through `Arc::make_mut`, which copies a container only when it is shared:
//! editing a clone never shows through to the original.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::path::{Path, Segment, METADATA};
use crate::{ActorId, Id};

/// Key of a map node: a plain name or an identifier.
///
/// The name `_` is reserved: on the wire it marks an entity's metadata
/// block. Trees holding it as a map key are rejected (see
/// [`Node::find_reserved`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Name(String),
    Id(Id),
}

impl Key {
    pub fn name(name: impl Into<String>) -> Self {
        Key::Name(name.into())
    }

    pub fn as_id(&self) -> Option<&Id> {
        match self {
            Key::Id(id) => Some(id),
            Key::Name(_) => None,
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<Id> for Key {
    fn from(id: Id) -> Self {
        Key::Id(id)
    }
}

impl From<&ActorId> for Key {
    fn from(actor: &ActorId) -> Self {
        Key::Id(actor.as_id().clone())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Id(id) => id.fmt(f),
        }
    }
}

/// A node of the state tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    /// Reference to an entity or actor.
    Id(Id),
    List(Arc<Vec<Node>>),
    Map(Arc<BTreeMap<Key, Node>>),
    Entity(Arc<Entity>),
}

/// A node with a stable identity and per-field visibility.
///
/// No field may be called `_`; that segment addresses the metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: Id,
    /// Field name -> actors allowed to see it. No entry means public.
    pub visibility: BTreeMap<String, BTreeSet<ActorId>>,
    pub fields: BTreeMap<String, Node>,
}

impl Entity {
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            visibility: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Node>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Restrict `field` to the given actors (an empty set hides it from all).
    pub fn with_visibility<I>(mut self, field: impl Into<String>, actors: I) -> Self
    where
        I: IntoIterator<Item = ActorId>,
    {
        self.conceal(field, actors);
        self
    }

    pub fn conceal<I>(&mut self, field: impl Into<String>, actors: I)
    where
        I: IntoIterator<Item = ActorId>,
    {
        self.visibility
            .insert(field.into(), actors.into_iter().collect());
    }

    /// Add one actor to the visibility set of `field`, creating the set if the
    /// field was public.
    pub fn reveal_to(&mut self, field: &str, actor: ActorId) {
        self.visibility
            .entry(field.to_string())
            .or_default()
            .insert(actor);
    }

    /// Drop the visibility set of `field`, making it public.
    pub fn make_public(&mut self, field: &str) {
        self.visibility.remove(field);
    }

    /// A field is visible to `actor` unless it carries a visibility set that
    /// does not name the actor.
    pub fn is_visible(&self, field: &str, actor: &ActorId) -> bool {
        self.visibility
            .get(field)
            .map_or(true, |allowed| allowed.contains(actor))
    }

    /// Fields carrying a visibility set that excludes `actor`.
    pub fn hidden_fields<'a>(&'a self, actor: &'a ActorId) -> impl Iterator<Item = &'a str> + 'a {
        self.visibility
            .iter()
            .filter(move |(_, allowed)| !allowed.contains(actor))
            .map(|(field, _)| field.as_str())
    }
}

/// A visibility set as a tree node: a list of actor identifiers. This is the
/// value carried by patches addressing `[entity.., "_", field]`.
pub fn visibility_to_node(actors: &BTreeSet<ActorId>) -> Node {
    Node::list(actors.iter().map(|a| Node::Id(a.as_id().clone())))
}

/// Inverse of [`visibility_to_node`]; `None` unless every item is an identifier.
pub fn visibility_from_node(node: &Node) -> Option<BTreeSet<ActorId>> {
    node.as_list()?
        .iter()
        .map(|item| match item {
            Node::Id(id) => Some(ActorId::from(id.clone())),
            _ => None,
        })
        .collect()
}

impl Node {
    pub fn list<I: IntoIterator<Item = Node>>(items: I) -> Self {
        Node::List(Arc::new(items.into_iter().collect()))
    }

    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<Key>,
        I: IntoIterator<Item = (K, Node)>,
    {
        Node::Map(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn empty_list() -> Self {
        Node::List(Arc::new(Vec::new()))
    }

    pub fn empty_map() -> Self {
        Node::Map(Arc::new(BTreeMap::new()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "bool",
            Node::Number(_) => "number",
            Node::String(_) => "string",
            Node::Id(_) => "identifier",
            Node::List(_) => "list",
            Node::Map(_) => "map",
            Node::Entity(_) => "entity",
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Node::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Node>> {
        match self {
            Node::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<Key, Node>> {
        match self {
            Node::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_entity_mut(&mut self) -> Option<&mut Entity> {
        match self {
            Node::Entity(e) => Some(Arc::make_mut(e)),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Node::List(items) => Some(Arc::make_mut(items)),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<Key, Node>> {
        match self {
            Node::Map(entries) => Some(Arc::make_mut(entries)),
            _ => None,
        }
    }

    /// Cheap check for "certainly the same subtree": shared containers or
    /// identical scalars. A `false` answer says nothing.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::List(a), Node::List(b)) => Arc::ptr_eq(a, b),
            (Node::Map(a), Node::Map(b)) => Arc::ptr_eq(a, b),
            (Node::Entity(a), Node::Entity(b)) => Arc::ptr_eq(a, b),
            (Node::List(_) | Node::Map(_) | Node::Entity(_), _) => false,
            _ => self == other,
        }
    }

    /// Child addressed by one segment. The entity metadata segment is not a
    /// node and yields `None`.
    pub fn child(&self, segment: &Segment) -> Option<&Node> {
        match self {
            Node::List(items) => items.get(segment.as_index()?),
            Node::Map(entries) => entries.get(&segment.to_key()),
            Node::Entity(entity) => entity.fields.get(segment.as_name()?),
            _ => None,
        }
    }

    pub fn child_mut(&mut self, segment: &Segment) -> Option<&mut Node> {
        match self {
            Node::List(items) => {
                let index = segment.as_index()?;
                Arc::make_mut(items).get_mut(index)
            }
            Node::Map(entries) => Arc::make_mut(entries).get_mut(&segment.to_key()),
            Node::Entity(entity) => {
                let name = segment.as_name()?;
                Arc::make_mut(entity).fields.get_mut(name)
            }
            _ => None,
        }
    }

    pub fn get_path(&self, path: &Path) -> Option<&Node> {
        path.iter().try_fold(self, |node, seg| node.child(seg))
    }

    pub fn get_path_mut(&mut self, path: &Path) -> Option<&mut Node> {
        let mut node = self;
        for seg in path {
            node = node.child_mut(seg)?;
        }
        Some(node)
    }

    /// Visit every entity in this subtree in pre-order, with its path.
    /// Path to the first use of the reserved name `_` as a map key, entity
    /// field or visibility entry.
    pub fn find_reserved(&self) -> Option<Path> {
        let mut path = Path::root();
        self.find_reserved_at(&mut path).then_some(path)
    }

    fn find_reserved_at(&self, path: &mut Path) -> bool {
        match self {
            Node::List(items) => items
                .iter()
                .enumerate()
                .any(|(i, item)| item.find_reserved_below(path, Segment::Index(i), false)),
            Node::Map(entries) => entries.iter().any(|(key, value)| {
                let reserved = matches!(key, Key::Name(name) if name == METADATA);
                value.find_reserved_below(path, Segment::Key(key.clone()), reserved)
            }),
            Node::Entity(entity) => {
                if entity.fields.contains_key(METADATA) || entity.visibility.contains_key(METADATA) {
                    path.push(METADATA);
                    return true;
                }
                entity
                    .fields
                    .iter()
                    .any(|(name, value)| value.find_reserved_below(path, Segment::name(name.clone()), false))
            }
            _ => false,
        }
    }

    /// `self` sits at `segment` under `path`; leaves `path` pointing at the
    /// reserved name when one is found.
    fn find_reserved_below(&self, path: &mut Path, segment: Segment, reserved: bool) -> bool {
        path.push(segment);
        let found = reserved || self.find_reserved_at(path);
        if !found {
            path.pop();
        }
        found
    }

    pub fn visit_entities<E, F>(&self, base: &Path, f: &mut F) -> Result<(), E>
    where
        F: FnMut(&Entity, &Path) -> Result<(), E>,
    {
        let mut path = base.clone();
        self.visit_entities_at(&mut path, f)
    }

    fn visit_entities_at<E, F>(&self, path: &mut Path, f: &mut F) -> Result<(), E>
    where
        F: FnMut(&Entity, &Path) -> Result<(), E>,
    {
        match self {
            Node::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    path.push(i);
                    item.visit_entities_at(path, f)?;
                    path.pop();
                }
            }
            Node::Map(entries) => {
                for (key, value) in entries.iter() {
                    path.push(key.clone());
                    value.visit_entities_at(path, f)?;
                    path.pop();
                }
            }
            Node::Entity(entity) => {
                f(entity, path)?;
                for (name, value) in &entity.fields {
                    path.push(Segment::name(name.clone()));
                    value.visit_entities_at(path, f)?;
                    path.pop();
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl From<u64> for Node {
    fn from(n: u64) -> Self {
        Node::Number(n.into())
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Number(n.into())
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::String(s.to_string())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::String(s)
    }
}

impl From<Id> for Node {
    fn from(id: Id) -> Self {
        Node::Id(id)
    }
}

impl From<Entity> for Node {
    fn from(entity: Entity) -> Self {
        Node::Entity(Arc::new(entity))
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Node::List(Arc::new(items))
    }
}
