//! Identifier spaces.
//!
//! Each actor sees the tree through its own [`Bijection`] between
//! authoritative ids and view ids. View ids are drawn from `1..=N` and
//! permuted independently per actor, so two actors cannot match up an entity
//! by its id. Actor ids map to themselves in every bijection.
//!
//! [`IdMap`] is one direction of a bijection and rewrites trees, paths and
//! patches. Every identifier it meets must be mapped; nothing passes through
//! untranslated.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use veil_types::{ActorId, Entity, Id, Key, Node, Patch, Path, Segment};

use crate::error::{Result, Space, SyncError};

/// Authoritative id <-> view id, for one actor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bijection {
    to_view: BTreeMap<Id, Id>,
    to_authoritative: BTreeMap<Id, Id>,
}

impl Bijection {
    /// A fresh random bijection over `ids`, with every actor as a fixed point.
    ///
    /// View ids are the decimal numbers from 1 upwards, skipping any that
    /// would collide with an actor id.
    pub fn generate<R>(ids: &[Id], actors: &[ActorId], rng: &mut R) -> Result<Self>
    where
        R: RngCore + ?Sized,
    {
        let mut bijection = Self::default();
        for actor in actors {
            bijection.insert(actor.as_id().clone(), actor.as_id().clone())?;
        }

        let reserved: BTreeSet<&str> = actors.iter().map(ActorId::as_str).collect();
        let mut view_ids: Vec<Id> = (1u64..)
            .map(|n| n.to_string())
            .filter(|candidate| !reserved.contains(candidate.as_str()))
            .take(ids.len())
            .map(Id::new)
            .collect();
        view_ids.shuffle(rng);

        for (auth, view) in ids.iter().zip(view_ids) {
            bijection.insert(auth.clone(), view)?;
        }
        Ok(bijection)
    }

    /// Add one pair. Either side already being mapped is a broken bijection.
    pub fn insert(&mut self, auth: Id, view: Id) -> Result<()> {
        if let Some(existing) = self.to_view.get(&auth) {
            return Err(SyncError::DuplicateIdentifier {
                id: auth.clone(),
                context: format!("already mapped to view id {existing}"),
            });
        }
        if let Some(existing) = self.to_authoritative.get(&view) {
            return Err(SyncError::DuplicateIdentifier {
                id: view.clone(),
                context: format!("view id already stands for {existing}"),
            });
        }
        self.to_view.insert(auth.clone(), view.clone());
        self.to_authoritative.insert(view, auth);
        Ok(())
    }

    /// Map `auth` to a new random view id and return it.
    pub fn insert_fresh<R>(&mut self, auth: Id, rng: &mut R) -> Result<Id>
    where
        R: RngCore + ?Sized,
    {
        let view = loop {
            let candidate = Id::new(format!("{:016x}", rng.next_u64()));
            if !self.to_authoritative.contains_key(&candidate) {
                break candidate;
            }
        };
        self.insert(auth, view.clone())?;
        Ok(view)
    }

    pub fn view_of(&self, auth: &Id) -> Option<&Id> {
        self.to_view.get(auth)
    }

    pub fn authoritative_of(&self, view: &Id) -> Option<&Id> {
        self.to_authoritative.get(view)
    }

    pub fn contains_authoritative(&self, auth: &Id) -> bool {
        self.to_view.contains_key(auth)
    }

    pub fn len(&self) -> usize {
        self.to_view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_view.is_empty()
    }

    /// Both directions agree and neither side repeats.
    pub fn is_consistent(&self) -> bool {
        self.to_view.len() == self.to_authoritative.len()
            && self
                .to_view
                .iter()
                .all(|(auth, view)| self.to_authoritative.get(view) == Some(auth))
    }

    /// Authoritative -> view.
    pub fn to_view(&self) -> IdMap<'_> {
        IdMap {
            map: &self.to_view,
            from: Space::Authoritative,
        }
    }

    /// View -> authoritative.
    pub fn to_authoritative(&self) -> IdMap<'_> {
        IdMap {
            map: &self.to_authoritative,
            from: Space::View,
        }
    }
}

/// One direction of a [`Bijection`].
#[derive(Debug, Clone, Copy)]
pub struct IdMap<'a> {
    map: &'a BTreeMap<Id, Id>,
    from: Space,
}

impl IdMap<'_> {
    pub fn id(&self, id: &Id) -> Result<Id> {
        self.map
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::UnmappedIdentifier {
                id: id.clone(),
                space: self.from,
            })
    }

    fn actor(&self, actor: &ActorId) -> Result<ActorId> {
        self.id(actor.as_id()).map(ActorId::from)
    }

    pub fn key(&self, key: &Key) -> Result<Key> {
        match key {
            Key::Id(id) => self.id(id).map(Key::Id),
            Key::Name(_) => Ok(key.clone()),
        }
    }

    pub fn segment(&self, segment: &Segment) -> Result<Segment> {
        match segment {
            Segment::Key(key) => self.key(key).map(Segment::Key),
            Segment::Index(_) => Ok(segment.clone()),
        }
    }

    pub fn path(&self, path: &Path) -> Result<Path> {
        path.iter().map(|seg| self.segment(seg)).collect()
    }

    pub fn node(&self, node: &Node) -> Result<Node> {
        Ok(match node {
            Node::Id(id) => Node::Id(self.id(id)?),
            Node::List(items) => Node::List(Arc::new(
                items.iter().map(|item| self.node(item)).collect::<Result<_>>()?,
            )),
            Node::Map(entries) => {
                let mut out = BTreeMap::new();
                for (key, value) in entries.iter() {
                    let key = self.key(key)?;
                    if out.contains_key(&key) {
                        return Err(SyncError::DuplicateIdentifier {
                            id: key.as_id().cloned().unwrap_or_else(|| Id::new(key.to_string())),
                            context: "two map keys translate to the same identifier".into(),
                        });
                    }
                    out.insert(key, self.node(value)?);
                }
                Node::Map(Arc::new(out))
            }
            Node::Entity(entity) => Node::Entity(Arc::new(self.entity(entity)?)),
            Node::Null | Node::Bool(_) | Node::Number(_) | Node::String(_) => node.clone(),
        })
    }

    fn entity(&self, entity: &Entity) -> Result<Entity> {
        let visibility: BTreeMap<String, BTreeSet<ActorId>> = entity
            .visibility
            .iter()
            .map(|(field, actors)| -> Result<(String, BTreeSet<ActorId>)> {
                let actors = actors
                    .iter()
                    .map(|a| self.actor(a))
                    .collect::<Result<BTreeSet<_>>>()?;
                Ok((field.clone(), actors))
            })
            .collect::<Result<_>>()?;
        let fields: BTreeMap<String, Node> = entity
            .fields
            .iter()
            .map(|(name, value)| Ok::<_, SyncError>((name.clone(), self.node(value)?)))
            .collect::<Result<_>>()?;
        Ok(Entity {
            id: self.id(&entity.id)?,
            visibility,
            fields,
        })
    }

    pub fn patch(&self, patch: &Patch) -> Result<Patch> {
        Ok(match patch {
            Patch::Add { path, value } => Patch::Add {
                path: self.path(path)?,
                value: self.node(value)?,
            },
            Patch::Replace { path, value } => Patch::Replace {
                path: self.path(path)?,
                value: self.node(value)?,
            },
            Patch::Remove { path } => Patch::Remove {
                path: self.path(path)?,
            },
        })
    }

    pub fn patches(&self, patches: &[Patch]) -> Result<Vec<Patch>> {
        patches.iter().map(|p| self.patch(p)).collect()
    }
}

/// Every actor's bijection for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySpaces {
    actors: Vec<ActorId>,
    bijections: BTreeMap<ActorId, Bijection>,
}

impl IdentitySpaces {
    /// Independent bijections for each actor over `ids`.
    pub fn generate<R>(actors: Vec<ActorId>, ids: &[Id], rng: &mut R) -> Result<Self>
    where
        R: RngCore + ?Sized,
    {
        let bijections = actors
            .iter()
            .map(|actor| {
                let bijection = Bijection::generate(ids, &actors, &mut *rng)?;
                Ok((actor.clone(), bijection))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { actors, bijections })
    }

    pub fn actors(&self) -> &[ActorId] {
        &self.actors
    }

    pub fn is_actor(&self, actor: &ActorId) -> bool {
        self.bijections.contains_key(actor)
    }

    pub fn bijection(&self, actor: &ActorId) -> Result<&Bijection> {
        self.bijections
            .get(actor)
            .ok_or_else(|| SyncError::UnknownActor(actor.clone()))
    }

    /// True if every actor can translate `auth`.
    pub fn contains(&self, auth: &Id) -> bool {
        self.bijections.values().all(|b| b.contains_authoritative(auth))
    }

    /// Give `auth` a fresh view id in every bijection that lacks one.
    pub fn register<R>(&mut self, auth: &Id, rng: &mut R) -> Result<()>
    where
        R: RngCore + ?Sized,
    {
        for bijection in self.bijections.values_mut() {
            if !bijection.contains_authoritative(auth) {
                bijection.insert_fresh(auth.clone(), &mut *rng)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use veil_types::path;

    fn actors() -> Vec<ActorId> {
        vec![ActorId::new("ap"), ActorId::new("cp")]
    }

    fn ids(n: usize) -> Vec<Id> {
        (0..n).map(|i| Id::new(format!("card{i}"))).collect()
    }

    #[test]
    fn test_generated_bijection_is_consistent() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let bijection = Bijection::generate(&ids(20), &actors(), &mut rng).unwrap();

        assert_eq!(bijection.len(), 22);
        assert!(bijection.is_consistent());
        assert_eq!(bijection.view_of(&Id::new("cp")), Some(&Id::new("cp")));
        let mut views: Vec<u64> = ids(20)
            .iter()
            .map(|id| bijection.view_of(id).unwrap().as_str().parse().unwrap())
            .collect();
        views.sort_unstable();
        assert_eq!(views, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_numeric_actor_ids_are_skipped() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let actors = vec![ActorId::new("2")];
        let bijection = Bijection::generate(&ids(3), &actors, &mut rng).unwrap();
        assert_eq!(bijection.authoritative_of(&Id::new("2")), Some(&Id::new("2")));
        assert!(bijection.authoritative_of(&Id::new("4")).is_some());
    }

    #[test]
    fn test_actors_get_uncorrelated_spaces() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let spaces = IdentitySpaces::generate(actors(), &ids(50), &mut rng).unwrap();
        let ap = spaces.bijection(&ActorId::new("ap")).unwrap();
        let cp = spaces.bijection(&ActorId::new("cp")).unwrap();
        let same = ids(50)
            .iter()
            .filter(|id| ap.view_of(id) == cp.view_of(id))
            .count();
        assert!(same < 10, "{same} of 50 view ids agree");
        assert!(matches!(
            spaces.bijection(&ActorId::new("zz")),
            Err(SyncError::UnknownActor(_))
        ));
    }

    #[test]
    fn test_tree_round_trip() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let bijection = Bijection::generate(&ids(2), &actors(), &mut rng).unwrap();
        let tree = Node::map([
            (
                Key::from(&ActorId::new("cp")),
                Node::list([Entity::new("card0")
                    .with_field("front", "x")
                    .with_field("target", Node::Id(Id::new("card1")))
                    .with_visibility("front", [ActorId::new("cp")])
                    .into()]),
            ),
            (Key::name("note"), Node::from(":not an id")),
        ]);

        let view = bijection.to_view().node(&tree).unwrap();
        assert_ne!(view, tree);
        let entity = view.get_path(&path![Id::new("cp"), 0usize]).unwrap().as_entity().unwrap();
        assert_eq!(Some(&entity.id), bijection.view_of(&Id::new("card0")));
        assert_eq!(bijection.to_authoritative().node(&view).unwrap(), tree);
    }

    #[test]
    fn test_unmapped_identifiers_fail() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let bijection = Bijection::generate(&ids(2), &actors(), &mut rng).unwrap();
        let patch = Patch::Add {
            path: path!["hand", Id::new("cp"), 0usize],
            value: Node::Id(Id::new("999")),
        };
        assert_eq!(
            bijection.to_authoritative().patch(&patch),
            Err(SyncError::UnmappedIdentifier {
                id: Id::new("999"),
                space: Space::View,
            })
        );
        assert!(bijection
            .to_view()
            .path(&path!["hand", Id::new("nobody")])
            .is_err());
    }

    #[test]
    fn test_register_fills_every_space() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut spaces = IdentitySpaces::generate(actors(), &ids(3), &mut rng).unwrap();
        let token = Id::new("token1");
        assert!(!spaces.contains(&token));

        spaces.register(&token, &mut rng).unwrap();
        assert!(spaces.contains(&token));
        for actor in actors() {
            let bijection = spaces.bijection(&actor).unwrap();
            assert!(bijection.is_consistent());
            let view = bijection.view_of(&token).unwrap();
            assert_eq!(bijection.authoritative_of(view), Some(&token));
        }
    }

    #[test]
    fn test_duplicate_pairs_are_rejected() {
        let mut bijection = Bijection::default();
        bijection.insert(Id::new("a"), Id::new("1")).unwrap();
        assert!(bijection.insert(Id::new("b"), Id::new("1")).unwrap_err().is_fatal());
        assert!(bijection.insert(Id::new("a"), Id::new("2")).is_err());
    }
}
