//! Paths into the state tree.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::{Key, Node};
use crate::Id;

/// Reserved segment addressing an entity's metadata block.
pub const METADATA: &str = "_";

/// Segment meaning "one past the end" when adding to a list.
pub const APPEND: &str = "-";

/// One step of a path: a list index, or a map key / entity field name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Index(usize),
    Key(Key),
}

impl Segment {
    pub fn name(name: impl Into<String>) -> Self {
        Segment::Key(Key::Name(name.into()))
    }

    pub fn id(id: impl Into<Id>) -> Self {
        Segment::Key(Key::Id(id.into()))
    }

    /// List index this segment denotes, accepting decimal names as well.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Key(Key::Name(s)) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                s.parse().ok()
            }
            Segment::Key(_) => None,
        }
    }

    /// Map key this segment denotes. Indices become decimal names.
    pub fn to_key(&self) -> Key {
        match self {
            Segment::Index(i) => Key::Name(i.to_string()),
            Segment::Key(k) => k.clone(),
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Segment::Key(Key::Name(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_append(&self) -> bool {
        self.as_name() == Some(APPEND)
    }

    pub fn is_metadata(&self) -> bool {
        self.as_name() == Some(METADATA)
    }
}

impl From<usize> for Segment {
    fn from(i: usize) -> Self {
        Segment::Index(i)
    }
}

impl From<&str> for Segment {
    fn from(name: &str) -> Self {
        Segment::name(name)
    }
}

impl From<Id> for Segment {
    fn from(id: Id) -> Self {
        Segment::Key(Key::Id(id))
    }
}

impl From<Key> for Segment {
    fn from(key: Key) -> Self {
        Segment::Key(key)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Index(i) => write!(f, "{i}"),
            Segment::Key(k) => k.fmt(f),
        }
    }
}

/// A sequence of segments from the root to a node.
///
/// Paths are positional: they stop being meaningful once the tree is mutated,
/// unlike identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<Segment>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, segment: impl Into<Segment>) {
        self.0.push(segment.into());
    }

    pub fn pop(&mut self) -> Option<Segment> {
        self.0.pop()
    }

    /// This path extended by one segment.
    pub fn child(&self, segment: impl Into<Segment>) -> Path {
        let mut path = self.clone();
        path.push(segment);
        path
    }

    /// This path without its last segment; `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        self.0
            .split_last()
            .map(|(_, rest)| Path(rest.to_vec()))
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// True if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.0.iter()
    }

    /// Interpret a tree node as a path: a list of names, identifiers and
    /// indices. Used for action arguments.
    pub fn from_node(node: &Node) -> Option<Path> {
        let Node::List(items) = node else {
            return None;
        };
        items
            .iter()
            .map(|item| match item {
                Node::String(s) => Some(Segment::name(s.clone())),
                Node::Id(id) => Some(Segment::id(id.clone())),
                Node::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()).map(Segment::Index),
                _ => None,
            })
            .collect()
    }

    /// The inverse of [`Path::from_node`].
    pub fn to_node(&self) -> Node {
        Node::list(self.0.iter().map(|seg| match seg {
            Segment::Index(i) => Node::from(*i as u64),
            Segment::Key(Key::Name(s)) => Node::String(s.clone()),
            Segment::Key(Key::Id(id)) => Node::Id(id.clone()),
        }))
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Path(segments)
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for seg in &self.0 {
            write!(f, "/{seg}")?;
        }
        Ok(())
    }
}

/// Build a [`Path`] from segment-convertible values.
///
/// ```
/// use veil_types::{path, Id};
/// let p = path!["hand", Id::new("cp"), 0usize];
/// assert_eq!(p.to_string(), "/hand/:cp/0");
/// ```
#[macro_export]
macro_rules! path {
    ($($seg:expr),* $(,)?) => {
        $crate::Path::new(vec![$($crate::Segment::from($seg)),*])
    };
}
