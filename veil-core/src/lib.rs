//! Veil - hidden-information state synchronization
//!
//! This crate keeps one authoritative state tree per game and shows every
//! player a private projection of it: fields the player may not see are
//! stripped, and entity ids are replaced by player-specific aliases so that
//! hidden entities cannot be tracked across views. Edits made against such a
//! projection are merged back without losing what the editor could not see.
//!
//! # Architecture
//!
//! ```text
//!   submit_action                          submit_edit
//!        │                                      │
//!        ▼                                      ▼
//!   ┌──────────┐   view -> authoritative  ┌────────────┐
//!   │ dispatch │◄───────────┐  ┌─────────►│ reconcile  │
//!   └────┬─────┘            │  │          └─────┬──────┘
//!        │            ┌─────┴──┴───┐            │
//!        │            │ translate  │            │
//!        ▼            └─────▲──────┘            ▼
//!   ┌──────────────────────────────────────────────────┐
//!   │ tree (Snapshot, apply, diff)  +  index (id→path) │
//!   └──────────────────────┬───────────────────────────┘
//!                          │ commit
//!                          ▼
//!        redact ──► translate (authoritative -> view) ──► per-player patches
//! ```
//!
//! # Core Concepts
//!
//! ## Snapshots
//!
//! A [`Snapshot`] is immutable. Mutations run against a draft and produce a
//! new snapshot plus the [`Patch`]es between the two, computed by [`diff()`].
//!
//! ## Identity spaces
//!
//! Every player has a [`Bijection`] between authoritative ids and view ids.
//! Actor ids are fixed points. Entities created later get fresh random view
//! ids in every space before anyone sees them.
//!
//! ## Sessions
//!
//! A [`Session`] owns the current state of one game and exposes the three
//! entry points: [`Session::get_view`], [`Session::submit_action`] and
//! [`Session::submit_edit`]. Writers are serialized; readers never block.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use veil_core::{ActionContext, ActionError, ActionRegistry, Session, SessionId, Snapshot};
//! use veil_types::{path, ActorId, Entity, Node};
//!
//! fn flip(state: &mut Node, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
//!     let card = state
//!         .get_path_mut(&path!["table", 0usize])
//!         .and_then(Node::as_entity_mut)
//!         .ok_or_else(|| ActionError::rejected("no card"))?;
//!     card.make_public("front");
//!     Ok(())
//! }
//!
//! let mut registry = ActionRegistry::new();
//! registry.register("flip", flip);
//!
//! let table = Node::map([(
//!     "table",
//!     Node::list([Entity::new("c1")
//!         .with_field("front", "Ace")
//!         .with_visibility("front", [])
//!         .into()]),
//! )]);
//! let ap = ActorId::new("ap");
//! let session = Session::new(
//!     SessionId::new("demo"),
//!     Arc::new(registry),
//!     Snapshot::new(table),
//!     vec![ap.clone()],
//!     7,
//! )
//! .unwrap();
//!
//! let hidden = session.get_view(&ap).unwrap();
//! assert!(hidden.get_path(&path!["table", 0usize, "front"]).is_none());
//!
//! session.submit_action(&ap, "flip", &[]).unwrap();
//! let shown = session.get_view(&ap).unwrap();
//! assert_eq!(shown.get_path(&path!["table", 0usize, "front"]), Some(&Node::from("Ace")));
//! ```

pub mod diff;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod persist;
pub mod reconcile;
pub mod redact;
pub mod session;
pub mod store;
pub mod translate;
pub mod tree;

pub use diff::diff;
pub use dispatch::{dispatch, Action, ActionContext, ActionError, ActionRegistry, Dispatched};
pub use error::{Result, Space, SyncError};
pub use index::IdentityIndex;
pub use persist::{PersistError, PersistedSession};
pub use reconcile::{reconcile, Reconciled};
pub use redact::{project, redact, redact_snapshot};
pub use session::{ActionOutcome, Commit, CommitKind, Session, SessionState};
pub use store::{SessionId, SessionStore};
pub use translate::{Bijection, IdMap, IdentitySpaces};
pub use tree::Snapshot;
pub use veil_types::{ActorId, Entity, Id, Key, Node, Patch, Path, Segment};
