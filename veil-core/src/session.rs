//! One game: the current state plus the entry points that change it.
//!
//! Writers are serialized by a per-session mutex (which also owns the random
//! source). Readers take an `Arc` of the current [`SessionState`] and never
//! block a writer. Snapshot, index and id spaces are published together, so a
//! reader cannot see one without the others.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};
use veil_types::{ActorId, Node, Patch};

use crate::diff::diff;
use crate::dispatch::{dispatch, ActionRegistry};
use crate::error::{Result, Space, SyncError};
use crate::index::{entity_ids, IdentityIndex};
use crate::persist::PersistedSession;
use crate::reconcile::reconcile;
use crate::redact::project;
use crate::store::SessionId;
use crate::translate::IdentitySpaces;
use crate::tree::Snapshot;

/// Immutable state of a session at one revision.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub revision: u64,
    pub snapshot: Snapshot,
    pub index: IdentityIndex,
    pub spaces: Arc<IdentitySpaces>,
}

impl SessionState {
    /// State at `revision` for `snapshot`, checking that every entity is
    /// known to every actor and that `_` is used nowhere as a name.
    pub fn new(revision: u64, snapshot: Snapshot, spaces: IdentitySpaces) -> Result<Self> {
        if let Some(path) = snapshot.root().find_reserved() {
            return Err(SyncError::reserved_name(&path));
        }
        let index = IdentityIndex::build(&snapshot)?;
        if let Some(id) = index.ids().find(|id| !spaces.contains(id)) {
            return Err(SyncError::UnmappedIdentifier {
                id: id.clone(),
                space: Space::Authoritative,
            });
        }
        Ok(Self {
            revision,
            snapshot,
            index,
            spaces: Arc::new(spaces),
        })
    }

    /// The tree `actor` is shown at this revision.
    pub fn view(&self, actor: &ActorId) -> Result<Node> {
        project(&self.snapshot, &self.spaces, actor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitKind {
    Action(String),
    Edit,
}

/// A published state change.
#[derive(Debug, Clone)]
pub struct Commit {
    pub actor: ActorId,
    pub kind: CommitKind,
    pub prior: Arc<SessionState>,
    pub next: Arc<SessionState>,
    /// Authoritative patches from `prior` to `next`.
    pub patches: Vec<Patch>,
}

impl Commit {
    pub fn revision(&self) -> u64 {
        self.next.revision
    }

    /// The change as `actor` sees it: the diff between its projections of
    /// the two states, in its own id space. A field hidden from `actor` never
    /// shows up, not even as a removal.
    pub fn patches_for(&self, actor: &ActorId) -> Result<Vec<Patch>> {
        let before = project(&self.prior.snapshot, &self.next.spaces, actor)?;
        let after = project(&self.next.snapshot, &self.next.spaces, actor)?;
        Ok(diff(&before, &after))
    }
}

/// What `submit_action` hands back to the caller.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Patches in the acting actor's view space.
    pub patches: Vec<Patch>,
    pub commit: Commit,
}

pub struct Session {
    id: SessionId,
    registry: Arc<ActionRegistry>,
    writer: Mutex<ChaCha8Rng>,
    current: RwLock<Arc<SessionState>>,
    fault: RwLock<Option<String>>,
}

impl Session {
    /// A new session over `snapshot`, with fresh id spaces for `actors`.
    pub fn new(
        id: SessionId,
        registry: Arc<ActionRegistry>,
        snapshot: Snapshot,
        actors: Vec<ActorId>,
        seed: u64,
    ) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut ids = entity_ids(snapshot.root());
        ids.sort();
        let spaces = IdentitySpaces::generate(actors, &ids, &mut rng)?;
        let state = SessionState::new(0, snapshot, spaces)?;
        info!(session = %id, entities = state.index.len(), "session created");
        Ok(Self::from_state(id, registry, state, rng))
    }

    /// Resume a persisted session.
    pub fn restore(
        id: SessionId,
        registry: Arc<ActionRegistry>,
        persisted: PersistedSession,
        seed: u64,
    ) -> Result<Self> {
        let state = SessionState::new(persisted.revision, persisted.snapshot, persisted.spaces)?;
        info!(session = %id, revision = state.revision, "session restored");
        Ok(Self::from_state(id, registry, state, ChaCha8Rng::seed_from_u64(seed)))
    }

    fn from_state(id: SessionId, registry: Arc<ActionRegistry>, state: SessionState, rng: ChaCha8Rng) -> Self {
        Self {
            id,
            registry,
            writer: Mutex::new(rng),
            current: RwLock::new(Arc::new(state)),
            fault: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.read().is_some()
    }

    /// The current state, unless the session has faulted.
    pub fn current(&self) -> Result<Arc<SessionState>> {
        if let Some(reason) = self.fault.read().as_ref() {
            return Err(SyncError::SessionFaulted {
                session: self.id.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(self.current.read().clone())
    }

    pub fn get_view(&self, actor: &ActorId) -> Result<Node> {
        self.current()?.view(actor)
    }

    /// Run action `name` for `actor`; `args` are in the actor's view space.
    pub fn submit_action(&self, actor: &ActorId, name: &str, args: &[Node]) -> Result<ActionOutcome> {
        let mut rng = self.writer.lock();
        let prior = self.current()?;
        prior.spaces.bijection(actor)?;

        let dispatched = dispatch(
            &self.registry,
            name,
            args,
            actor,
            &prior.snapshot,
            &prior.index,
            &prior.spaces,
            &mut *rng,
        )
        .map_err(|err| self.fail(err))?;

        let spaces = dispatched
            .spaces
            .map(Arc::new)
            .unwrap_or_else(|| prior.spaces.clone());
        let commit = self.publish(
            prior,
            actor,
            CommitKind::Action(name.to_string()),
            dispatched.snapshot,
            dispatched.index,
            spaces,
            dispatched.patches,
        );
        let patches = commit.patches_for(actor)?;
        info!(
            session = %self.id,
            actor = %actor,
            action = name,
            revision = commit.revision(),
            "action committed"
        );
        Ok(ActionOutcome { patches, commit })
    }

    /// Merge an edit `actor` made to its own view.
    pub fn submit_edit(&self, actor: &ActorId, patches: &[Patch]) -> Result<Commit> {
        let _writer = self.writer.lock();
        let prior = self.current()?;
        let bijection = prior.spaces.bijection(actor)?;

        let merged = reconcile(&prior.snapshot, &prior.index, bijection, actor, patches).map_err(|err| {
            if !err.is_fatal() {
                warn!(session = %self.id, actor = %actor, %err, "edit rejected");
            }
            self.fail(err)
        })?;

        let spaces = prior.spaces.clone();
        let commit = self.publish(
            prior,
            actor,
            CommitKind::Edit,
            merged.snapshot,
            merged.index,
            spaces,
            merged.patches,
        );
        info!(
            session = %self.id,
            actor = %actor,
            revision = commit.revision(),
            patches = commit.patches.len(),
            "edit committed"
        );
        Ok(commit)
    }

    /// Everything needed to resume this session later.
    pub fn persist(&self) -> Result<PersistedSession> {
        let state = self.current()?;
        Ok(PersistedSession::from_state(&state))
    }

    #[allow(clippy::too_many_arguments)]
    fn publish(
        &self,
        prior: Arc<SessionState>,
        actor: &ActorId,
        kind: CommitKind,
        snapshot: Snapshot,
        index: IdentityIndex,
        spaces: Arc<IdentitySpaces>,
        patches: Vec<Patch>,
    ) -> Commit {
        let next = Arc::new(SessionState {
            revision: prior.revision + 1,
            snapshot,
            index,
            spaces,
        });
        *self.current.write() = next.clone();
        debug!(session = %self.id, revision = next.revision, "published state");
        Commit {
            actor: actor.clone(),
            kind,
            prior,
            next,
            patches,
        }
    }

    /// Record a fatal error; the session refuses all later requests.
    fn fail(&self, err: SyncError) -> SyncError {
        if err.is_fatal() {
            error!(session = %self.id, %err, "session faulted");
            *self.fault.write() = Some(err.to_string());
        }
        err
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("revision", &self.current.read().revision)
            .field("faulted", &self.is_faulted())
            .finish()
    }
}
