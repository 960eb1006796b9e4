//! Named mutations.
//!
//! An [`Action`] edits a draft of the authoritative tree. Its arguments arrive
//! in the caller's view space and are translated before it runs, so action
//! code only ever sees authoritative ids.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info};
use veil_types::{ActorId, Id, Node, Patch, Path};

use crate::error::{Result, SyncError};
use crate::index::IdentityIndex;
use crate::translate::IdentitySpaces;
use crate::tree::Snapshot;

/// Why an action refused to run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionError {
    #[error("missing argument {0}")]
    MissingArgument(usize),

    #[error("argument {index}: {reason}")]
    BadArgument { index: usize, reason: String },

    #[error("nothing at {0}")]
    PathNotFound(Path),

    #[error("{0}")]
    Rejected(String),
}

impl ActionError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ActionError::Rejected(reason.into())
    }
}

/// What an action gets besides the draft tree.
pub struct ActionContext<'a> {
    pub actor: &'a ActorId,
    /// Arguments, already in authoritative space.
    pub args: &'a [Node],
    pub rng: &'a mut dyn RngCore,
}

impl ActionContext<'_> {
    pub fn arg(&self, index: usize) -> std::result::Result<&Node, ActionError> {
        self.args.get(index).ok_or(ActionError::MissingArgument(index))
    }

    pub fn path_arg(&self, index: usize) -> std::result::Result<Path, ActionError> {
        Path::from_node(self.arg(index)?).ok_or_else(|| ActionError::BadArgument {
            index,
            reason: "expected a path".into(),
        })
    }

    /// An identifier argument, or the acting actor when the argument is
    /// absent or null.
    pub fn actor_arg(&self, index: usize) -> std::result::Result<ActorId, ActionError> {
        match self.args.get(index) {
            None | Some(Node::Null) => Ok(self.actor.clone()),
            Some(Node::Id(id)) => Ok(ActorId::from(id.clone())),
            Some(other) => Err(ActionError::BadArgument {
                index,
                reason: format!("expected an actor identifier, got a {}", other.kind()),
            }),
        }
    }

    pub fn shuffle(&mut self, items: &mut [Node]) {
        items.shuffle(&mut *self.rng);
    }
}

/// A mutation of the authoritative tree.
pub trait Action: Send + Sync {
    fn run(&self, state: &mut Node, ctx: &mut ActionContext<'_>) -> std::result::Result<(), ActionError>;
}

impl<F> Action for F
where
    F: Fn(&mut Node, &mut ActionContext<'_>) -> std::result::Result<(), ActionError> + Send + Sync,
{
    fn run(&self, state: &mut Node, ctx: &mut ActionContext<'_>) -> std::result::Result<(), ActionError> {
        self(state, ctx)
    }
}

/// Actions by name.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: Action + 'static>(&mut self, name: impl Into<String>, action: A) -> &mut Self {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Result of running an action.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub snapshot: Snapshot,
    pub index: IdentityIndex,
    /// Authoritative patches.
    pub patches: Vec<Patch>,
    /// Set when the action created entities, which now have view ids.
    pub spaces: Option<IdentitySpaces>,
}

/// Run action `name` for `actor` against `prior`.
///
/// `args` are in the actor's view space. Nothing is committed here; the
/// caller publishes the returned state.
#[allow(clippy::too_many_arguments)]
pub fn dispatch(
    registry: &ActionRegistry,
    name: &str,
    args: &[Node],
    actor: &ActorId,
    prior: &Snapshot,
    prior_index: &IdentityIndex,
    spaces: &IdentitySpaces,
    rng: &mut dyn RngCore,
) -> Result<Dispatched> {
    let action = registry
        .get(name)
        .ok_or_else(|| SyncError::UnknownAction(name.to_string()))?;
    let to_authoritative = spaces.bijection(actor)?.to_authoritative();
    let args = args
        .iter()
        .map(|arg| to_authoritative.node(arg))
        .collect::<Result<Vec<_>>>()?;

    let mut ctx = ActionContext {
        actor,
        args: &args,
        rng: &mut *rng,
    };
    let (snapshot, patches) = prior
        .apply(|state| action.run(state, &mut ctx))
        .map_err(|source| SyncError::ActionFailed {
            action: name.to_string(),
            source,
        })?;
    debug!(action = name, patches = patches.len(), "action produced patches");
    if let Some(path) = snapshot.root().find_reserved() {
        return Err(SyncError::reserved_name(&path));
    }

    let index = prior_index.rebuild(&snapshot, &patches)?;

    let mut created: Vec<&Id> = index.ids().filter(|id| !spaces.contains(id)).collect();
    let spaces = if created.is_empty() {
        None
    } else {
        created.sort();
        let mut grown = spaces.clone();
        for id in created {
            grown.register(id, &mut *rng)?;
        }
        info!(action = name, "registered new entities in every view space");
        Some(grown)
    };

    Ok(Dispatched {
        snapshot,
        index,
        patches,
        spaces,
    })
}
