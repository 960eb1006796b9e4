//! Structural patches.
//!
//! A patch is one `add`, `replace` or `remove` operation in the JSON-Patch
//! vocabulary. Paths are segment arrays rather than JSON pointers.

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Patch {
    Add { path: Path, value: Node },
    Replace { path: Path, value: Node },
    Remove { path: Path },
}

impl Patch {
    pub fn path(&self) -> &Path {
        match self {
            Patch::Add { path, .. } | Patch::Replace { path, .. } | Patch::Remove { path } => path,
        }
    }

    pub fn value(&self) -> Option<&Node> {
        match self {
            Patch::Add { value, .. } | Patch::Replace { value, .. } => Some(value),
            Patch::Remove { .. } => None,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Patch::Add { .. } => "add",
            Patch::Replace { .. } => "replace",
            Patch::Remove { .. } => "remove",
        }
    }
}
