//! End-to-end scenarios for a two-player card game session

use std::collections::BTreeSet;
use std::sync::Arc;

use veil_core::{
    ActionContext, ActionError, ActionRegistry, Entity, Id, Key, Node, Patch, Path, Session, SessionId,
    Snapshot, SyncError,
};
use veil_types::{path, ActorId};

const DECK: usize = 12;

fn ap() -> ActorId {
    ActorId::new("ap")
}

fn cp() -> ActorId {
    ActorId::new("cp")
}

fn per_player(value: Node) -> Node {
    Node::map([(Key::from(&ap()), value.clone()), (Key::from(&cp()), value)])
}

fn table() -> Snapshot {
    let pile = |side: &str| {
        Node::list((0..DECK).map(|i| {
            Entity::new(format!("{side}{i}").as_str())
                .with_field("front", format!("{side} card {i}"))
                .with_field("back", side)
                .with_visibility("front", [])
                .into()
        }))
    };
    Snapshot::new(Node::map([
        (
            "draw",
            Node::map([(Key::from(&ap()), pile("AP")), (Key::from(&cp()), pile("CP"))]),
        ),
        ("hand", per_player(Node::empty_list())),
        ("combat", per_player(Node::empty_list())),
    ]))
}

fn draw(state: &mut Node, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
    let player = ctx.actor_arg(0)?;
    let src = path!["draw", Key::from(&player)];
    let mut card = state
        .get_path_mut(&src)
        .and_then(Node::as_list_mut)
        .and_then(Vec::pop)
        .ok_or(ActionError::PathNotFound(src))?;
    card.as_entity_mut()
        .ok_or_else(|| ActionError::rejected("not a card"))?
        .reveal_to("front", player.clone());
    let dst = path!["hand", Key::from(&player)];
    state
        .get_path_mut(&dst)
        .and_then(Node::as_list_mut)
        .ok_or(ActionError::PathNotFound(dst))?
        .push(card);
    Ok(())
}

fn play(state: &mut Node, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
    let src = ctx.path_arg(0)?;
    let dst = ctx.path_arg(1)?;
    let (index, pile) = match src.last().and_then(|seg| seg.as_index()) {
        Some(index) => (index, src.parent().unwrap_or_default()),
        None => return Err(ActionError::rejected("source must address a card")),
    };
    let pile = state
        .get_path_mut(&pile)
        .and_then(Node::as_list_mut)
        .filter(|cards| index < cards.len())
        .ok_or_else(|| ActionError::PathNotFound(src.clone()))?;
    let mut card = pile.remove(index);
    card.as_entity_mut()
        .ok_or_else(|| ActionError::rejected("not a card"))?
        .make_public("front");
    state
        .get_path_mut(&dst)
        .and_then(Node::as_list_mut)
        .ok_or(ActionError::PathNotFound(dst))?
        .push(card);
    Ok(())
}

fn session_with_seed(seed: u64) -> Session {
    let mut registry = ActionRegistry::new();
    registry.register("draw", draw).register("play", play);
    Session::new(SessionId::new("pog"), Arc::new(registry), table(), vec![ap(), cp()], seed).unwrap()
}

fn session() -> Session {
    session_with_seed(2024)
}

fn list_len(view: &Node, path: &Path) -> usize {
    view.get_path(path).and_then(Node::as_list).map_or(0, Vec::len)
}

fn entity_at<'a>(view: &'a Node, path: &Path) -> &'a Entity {
    view.get_path(path).and_then(Node::as_entity).unwrap()
}

#[test]
fn test_private_draw() {
    // Two actors' view ids for one card agree by chance with probability
    // 1/N; pick a seed where they differ for the top card of CP's pile.
    let top = Id::new(format!("CP{}", DECK - 1));
    let session = (0..)
        .map(session_with_seed)
        .find(|s| {
            let spaces = s.current().unwrap().spaces.clone();
            spaces.bijection(&ap()).unwrap().view_of(&top) != spaces.bijection(&cp()).unwrap().view_of(&top)
        })
        .unwrap();

    let hand = path!["hand", Id::new("cp")];
    let pile = path!["draw", Id::new("cp")];
    let before = session.get_view(&cp()).unwrap();
    session.submit_action(&cp(), "draw", &[]).unwrap();

    let cp_view = session.get_view(&cp()).unwrap();
    let ap_view = session.get_view(&ap()).unwrap();
    assert_eq!(list_len(&cp_view, &hand), list_len(&before, &hand) + 1);
    assert_eq!(list_len(&cp_view, &pile), list_len(&before, &pile) - 1);

    let state = session.current().unwrap();
    let drawn = state.snapshot.entity(&hand.child(0usize)).unwrap();
    assert_eq!(drawn.id, top);
    assert_eq!(drawn.visibility["front"], [cp()].into_iter().collect::<BTreeSet<_>>());

    let seen_by_cp = entity_at(&cp_view, &hand.child(0usize));
    let seen_by_ap = entity_at(&ap_view, &hand.child(0usize));
    assert_eq!(
        seen_by_cp.fields.get("front"),
        Some(&Node::from(format!("CP card {}", DECK - 1)))
    );
    assert!(!seen_by_ap.fields.contains_key("front"));
    assert_eq!(seen_by_ap.fields.get("back"), Some(&Node::from("CP")));
    assert_ne!(seen_by_ap.id, seen_by_cp.id);
}

#[test]
fn test_play_reveals() {
    let session = session();
    session.submit_action(&cp(), "draw", &[]).unwrap();

    let args = [
        path!["hand", Id::new("cp"), 0usize].to_node(),
        path!["combat", Id::new("cp")].to_node(),
    ];
    let outcome = session.submit_action(&cp(), "play", &args).unwrap();
    assert!(!outcome.patches.is_empty());

    let state = session.current().unwrap();
    let played = state.snapshot.entity(&path!["combat", Id::new("cp"), 0usize]).unwrap();
    assert!(!played.visibility.contains_key("front"));

    let slot = path!["combat", Id::new("cp"), 0usize];
    let ap_view = session.get_view(&ap()).unwrap();
    let cp_view = session.get_view(&cp()).unwrap();
    assert_eq!(
        entity_at(&ap_view, &slot).fields.get("front"),
        entity_at(&cp_view, &slot).fields.get("front")
    );
    assert!(entity_at(&ap_view, &slot).fields.contains_key("front"));

    // AP learns the face through its own patches.
    let for_ap = outcome.commit.patches_for(&ap()).unwrap();
    assert!(for_ap.iter().any(|p| p.path().starts_with(&path!["combat", Id::new("cp")])));
}

#[test]
fn test_malicious_overwrite_rejected() {
    let session = session();
    for _ in 0..3 {
        session.submit_action(&cp(), "draw", &[]).unwrap();
    }
    let secret_before = session.current().unwrap().snapshot.clone();

    // AP rewrites CP's whole hand from its redacted view, blanking the cards'
    // faces, and also drops a note into its own combat area.
    let ap_view = session.get_view(&ap()).unwrap();
    let mut hand = ap_view.get_path(&path!["hand", Id::new("cp")]).unwrap().clone();
    for card in hand.as_list_mut().unwrap() {
        let card = card.as_entity_mut().unwrap();
        card.fields.insert("front".into(), Node::from("blank"));
        card.visibility.clear();
    }
    let edit = vec![
        Patch::Replace {
            path: path!["hand", Id::new("cp")],
            value: hand,
        },
        Patch::Add {
            path: path!["combat", Id::new("ap"), "-"],
            value: Node::from("note"),
        },
    ];
    session.submit_edit(&ap(), &edit).unwrap();

    let after = session.current().unwrap();
    let hand = path!["hand", Id::new("cp")];
    for i in 0..3usize {
        let was = secret_before.entity(&hand.child(i)).unwrap();
        let now = after.snapshot.entity(&hand.child(i)).unwrap();
        assert_eq!(now.fields.get("front"), was.fields.get("front"));
        assert_eq!(now.visibility, was.visibility);
    }
    assert_eq!(
        after.snapshot.get(&path!["combat", Id::new("ap"), 0usize]),
        Some(&Node::from("note"))
    );
}

#[test]
fn test_unmapped_id_rejected() {
    let session = session();
    session.submit_action(&cp(), "draw", &[]).unwrap();
    let before = session.current().unwrap();
    let bytes_before = serde_json::to_vec(&before.snapshot).unwrap();

    let edit = vec![Patch::Add {
        path: path!["combat", Id::new("ap"), "-"],
        value: Entity::new("no-such-view-id").into(),
    }];
    let err = session.submit_edit(&ap(), &edit).unwrap_err();
    assert!(matches!(err, SyncError::UnmappedIdentifier { .. }));

    let after = session.current().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(serde_json::to_vec(&after.snapshot).unwrap(), bytes_before);
}

#[test]
fn test_removing_an_unseen_card_is_rejected() {
    let session = session();
    session.submit_action(&cp(), "draw", &[]).unwrap();
    let before = session.current().unwrap();

    let err = session
        .submit_edit(&ap(), &[Patch::Remove { path: path!["hand", Id::new("cp"), 0usize] }])
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidPatch { .. }));
    assert!(Arc::ptr_eq(&before, &session.current().unwrap()));
    assert!(!session.is_faulted());
}

#[test]
fn test_edits_use_the_editors_view_ids() {
    let session = session();
    let view = session.get_view(&ap()).unwrap();
    let own_top = entity_at(&view, &path!["draw", Id::new("ap"), DECK - 1]).id.clone();

    // AP moves its own top card into combat, naming it by its view id.
    let card = view.get_path(&path!["draw", Id::new("ap"), DECK - 1]).unwrap().clone();
    let edit = vec![
        Patch::Remove { path: path!["draw", Id::new("ap"), DECK - 1] },
        Patch::Add {
            path: path!["combat", Id::new("ap"), 0usize],
            value: card,
        },
    ];
    let commit = session.submit_edit(&ap(), &edit).unwrap();
    assert_eq!(commit.revision(), 1);

    let state = session.current().unwrap();
    let authoritative = state
        .spaces
        .bijection(&ap())
        .unwrap()
        .authoritative_of(&own_top)
        .unwrap()
        .clone();
    assert_eq!(authoritative, Id::new(format!("AP{}", DECK - 1)));
    assert_eq!(state.index.get(&authoritative), Some(&path!["combat", Id::new("ap"), 0usize]));
    // The face stays hidden: it was hidden from AP too.
    let moved = state.snapshot.entity(&path!["combat", Id::new("ap"), 0usize]).unwrap();
    assert!(moved.fields.contains_key("front"));
    assert!(!moved.is_visible("front", &ap()));
}
