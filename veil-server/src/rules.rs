//! Paths of Glory strategy cards.
//!
//! Builds the initial table from the card data and provides the actions the
//! players may submit. Card faces live in each card's `front` field: hidden
//! from everyone in a draw pile, visible to the owner in hand, public once
//! played.

use std::path::Path as FsPath;

use rand::seq::SliceRandom;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info};
use veil_core::{ActionContext, ActionError, ActionRegistry};
use veil_types::{codec, path, ActorId, CodecError, Entity, Id, Key, Node, Path};

pub const HAND_SIZE: usize = 7;

/// Commitment levels, in the order their decks enter play.
pub const DECKS: [&str; 3] = ["mobilization", "limited war", "total war"];

/// Piles every player has, besides the three decks.
pub const PILES: [&str; 5] = ["draw", "discard", "removed", "hand", "combat"];

/// The card CP holds at the start.
pub const GUNS_OF_AUGUST: &str = "CP1";

const FRONT: &str = "front";

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("failed to read card data {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed card data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed card data: {0}")]
    Codec(#[from] CodecError),

    #[error("card data must be an array of cards, item {0} is not")]
    NotACard(usize),

    #[error("no card {0} in {1}")]
    MissingCard(String, String),

    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Load the card list from a JSON file.
pub fn load_cards(path: &FsPath) -> Result<Vec<Entity>, RulesError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_cards(&raw)
}

pub fn parse_cards(raw: &str) -> Result<Vec<Entity>, RulesError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let items = value.as_array().ok_or(RulesError::NotACard(0))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| -> Result<Entity, RulesError> {
            match codec::from_json(item)? {
                Node::Entity(card) => Ok((*card).clone()),
                _ => Err(RulesError::NotACard(i)),
            }
        })
        .collect()
}

fn front_attr<'a>(card: &'a Entity, name: &str) -> Option<&'a Node> {
    card.fields.get(FRONT)?.as_map()?.get(&Key::name(name))
}

fn belongs_to(card: &Entity, deck: usize, side: &ActorId, optional_cards: bool) -> bool {
    let level = front_attr(card, "deck").and_then(|n| match n {
        Node::Number(n) => n.as_u64(),
        _ => None,
    });
    let card_side = front_attr(card, "side").and_then(Node::as_str);
    let optional = matches!(front_attr(card, "optional"), Some(Node::Bool(true)));
    level == Some(deck as u64)
        && card_side.is_some_and(|s| s.eq_ignore_ascii_case(side.as_str()))
        && (optional_cards || !optional)
}

fn per_player(actors: &[ActorId], pile: impl Fn(&ActorId) -> Node) -> Node {
    Node::map(actors.iter().map(|a| (Key::from(a), pile(a))))
}

fn pile_mut<'a>(state: &'a mut Node, path: &Path) -> Result<&'a mut Vec<Node>, ActionError> {
    state
        .get_path_mut(path)
        .and_then(Node::as_list_mut)
        .ok_or_else(|| ActionError::PathNotFound(path.clone()))
}

fn card_mut(card: &mut Node) -> Result<&mut Entity, ActionError> {
    card.as_entity_mut()
        .ok_or_else(|| ActionError::rejected("not a card"))
}

/// The table before anyone has looked at a card: decks by commitment level,
/// CP holding Guns of August, shuffled Mobilization draw piles and full hands.
pub fn setup(
    cards: &[Entity],
    actors: &[ActorId],
    optional_cards: bool,
    rng: &mut dyn RngCore,
) -> Result<Node, RulesError> {
    let deck = Node::map(DECKS.iter().enumerate().map(|(level, name)| {
        (
            *name,
            per_player(actors, |side| {
                Node::list(
                    cards
                        .iter()
                        .filter(|c| belongs_to(c, level, side, optional_cards))
                        .cloned()
                        .map(Node::from),
                )
            }),
        )
    }));

    let mut state = Node::map(
        std::iter::once(("deck", deck))
            .chain(PILES.iter().map(|pile| (*pile, per_player(actors, |_| Node::empty_list())))),
    );

    let cp = ActorId::new("cp");
    if actors.contains(&cp) {
        let src = path!["deck", DECKS[0], Key::from(&cp)];
        let deck = pile_mut(&mut state, &src)?;
        let at = deck
            .iter()
            .position(|c| c.as_entity().is_some_and(|e| e.id.as_str() == GUNS_OF_AUGUST))
            .ok_or_else(|| RulesError::MissingCard(GUNS_OF_AUGUST.into(), src.to_string()))?;
        let mut card = deck.remove(at);
        card_mut(&mut card)?.conceal(FRONT, [cp.clone()]);
        pile_mut(&mut state, &path!["hand", Key::from(&cp)])?.push(card);
    }

    for player in actors {
        let side = Key::from(player);
        let mobilization = std::mem::take(pile_mut(&mut state, &path!["deck", DECKS[0], side.clone()])?);
        let draw = pile_mut(&mut state, &path!["draw", side])?;
        *draw = mobilization;
        for card in draw.iter_mut() {
            card_mut(card)?.conceal(FRONT, []);
        }
        draw.shuffle(&mut *rng);
        draw_cards(&mut state, player, &mut *rng)?;
    }

    info!(cards = cards.len(), players = actors.len(), "table set up");
    Ok(state)
}

/// Draw up to a full hand, reshuffling the discards into the draw pile once
/// it runs out.
pub fn draw_cards(state: &mut Node, player: &ActorId, rng: &mut dyn RngCore) -> Result<(), ActionError> {
    let side = Key::from(player);
    let hand = path!["hand", side.clone()];
    let draw = path!["draw", side.clone()];
    let discard = path!["discard", side];

    let mut drawn = deal(state, player, &draw, &hand)?;
    if pile_mut(state, &hand)?.len() < HAND_SIZE {
        let mut discards = std::mem::take(pile_mut(state, &discard)?);
        for card in discards.iter_mut() {
            card_mut(card)?.conceal(FRONT, []);
        }
        let pile = pile_mut(state, &draw)?;
        pile.append(&mut discards);
        pile.shuffle(&mut *rng);
        drawn += deal(state, player, &draw, &hand)?;
    }
    debug!(player = %player, drawn, "hand refilled");
    Ok(())
}

fn deal(state: &mut Node, player: &ActorId, src: &Path, dst: &Path) -> Result<usize, ActionError> {
    let mut drawn = 0;
    while pile_mut(state, dst)?.len() < HAND_SIZE {
        let Some(mut card) = pile_mut(state, src)?.pop() else {
            break;
        };
        card_mut(&mut card)?.conceal(FRONT, [player.clone()]);
        pile_mut(state, dst)?.push(card);
        drawn += 1;
    }
    Ok(drawn)
}

/// `draw(dst, src, player?)`: move the top card of `src` onto `dst`, showing
/// its face to `player` (the acting player by default).
fn draw(state: &mut Node, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
    let dst = ctx.path_arg(0)?;
    let src = ctx.path_arg(1)?;
    let player = ctx.actor_arg(2)?;

    let mut card = pile_mut(state, &src)?
        .pop()
        .ok_or_else(|| ActionError::rejected(format!("{src} is empty")))?;
    card_mut(&mut card)?.reveal_to(FRONT, player);
    pile_mut(state, &dst)?.push(card);
    Ok(())
}

/// `play(dst, src)`: move the card at `src` onto `dst`, face up.
fn play(state: &mut Node, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
    let dst = ctx.path_arg(0)?;
    let src = ctx.path_arg(1)?;
    let (Some(index), Some(from)) = (src.last().and_then(|s| s.as_index()), src.parent()) else {
        return Err(ActionError::BadArgument {
            index: 1,
            reason: "expected the path of a card in a pile".into(),
        });
    };

    let pile = pile_mut(state, &from)?;
    if index >= pile.len() {
        return Err(ActionError::PathNotFound(src));
    }
    let mut card = pile.remove(index);
    card_mut(&mut card)?.make_public(FRONT);
    pile_mut(state, &dst)?.push(card);
    Ok(())
}

/// `shuffle(pile)`: turn every card in `pile` face down and shuffle it.
fn shuffle(state: &mut Node, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
    let target = ctx.path_arg(0)?;
    let pile = pile_mut(state, &target)?;
    for card in pile.iter_mut() {
        card_mut(card)?.conceal(FRONT, []);
    }
    ctx.shuffle(pile);
    Ok(())
}

/// `refill(player?)`: draw up to a full hand.
fn refill(state: &mut Node, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
    let player = ctx.actor_arg(0)?;
    draw_cards(state, &player, &mut *ctx.rng)
}

/// The actions players may submit.
pub fn registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry
        .register("draw", draw)
        .register("play", play)
        .register("shuffle", shuffle)
        .register("refill", refill);
    registry
}

/// Id of the card at `path`, if there is one.
pub fn card_id(state: &Node, path: &Path) -> Option<Id> {
    state.get_path(path)?.as_entity().map(|e| e.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_cards() -> Vec<Entity> {
        let card = |id: &str, side: &str, deck: u64, optional: bool| {
            Entity::new(id)
                .with_field(
                    FRONT,
                    Node::map([
                        ("name", Node::from(format!("card {id}"))),
                        ("side", Node::from(side)),
                        ("deck", Node::from(deck)),
                        ("optional", Node::from(optional)),
                    ]),
                )
                .with_field("back", Node::map([("side", Node::from(side)), ("deck", Node::from(deck))]))
        };
        let mut cards = Vec::new();
        for i in 1..=14 {
            cards.push(card(&format!("AP{i}"), "AP", 0, false));
            cards.push(card(&format!("CP{i}"), "CP", 0, false));
        }
        for i in 15..=17 {
            cards.push(card(&format!("AP{i}"), "AP", 1, false));
            cards.push(card(&format!("CP{i}"), "CP", 2, false));
        }
        cards.push(card("AP65", "AP", 0, true));
        cards
    }

    fn actors() -> Vec<ActorId> {
        vec![ActorId::new("ap"), ActorId::new("cp")]
    }

    fn table(seed: u64) -> Node {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        setup(&sample_cards(), &actors(), false, &mut rng).unwrap()
    }

    fn pile<'a>(state: &'a Node, path: &Path) -> &'a Vec<Node> {
        state.get_path(path).and_then(Node::as_list).unwrap()
    }

    #[test]
    fn test_setup() {
        let state = table(1);
        let ap = ActorId::new("ap");
        let cp = ActorId::new("cp");

        let cp_hand = pile(&state, &path!["hand", Id::new("cp")]);
        let ap_hand = pile(&state, &path!["hand", Id::new("ap")]);
        assert_eq!(cp_hand.len(), HAND_SIZE);
        assert_eq!(ap_hand.len(), HAND_SIZE);
        assert_eq!(card_id(&state, &path!["hand", Id::new("cp"), 0usize]), Some(Id::new(GUNS_OF_AUGUST)));

        for card in cp_hand {
            let card = card.as_entity().unwrap();
            assert!(card.is_visible(FRONT, &cp));
            assert!(!card.is_visible(FRONT, &ap));
        }
        // 14 mobilization cards, CP1 plus 6 drawn for CP, 7 for AP.
        assert_eq!(pile(&state, &path!["draw", Id::new("ap")]).len(), 7);
        assert_eq!(pile(&state, &path!["draw", Id::new("cp")]).len(), 7);
        for card in pile(&state, &path!["draw", Id::new("ap")]) {
            let card = card.as_entity().unwrap();
            assert!(!card.is_visible(FRONT, &ap) && !card.is_visible(FRONT, &cp));
        }

        assert!(pile(&state, &path!["deck", "mobilization", Id::new("ap")]).is_empty());
        assert_eq!(pile(&state, &path!["deck", "limited war", Id::new("ap")]).len(), 3);
        assert_eq!(pile(&state, &path!["deck", "total war", Id::new("cp")]).len(), 3);
    }

    #[test]
    fn test_optional_cards_are_left_out() {
        let state = table(2);
        let mut ids = Vec::new();
        let _ = state.visit_entities::<(), _>(&Path::root(), &mut |e, _| {
            ids.push(e.id.clone());
            Ok(())
        });
        assert!(!ids.contains(&Id::new("AP65")));
        assert_eq!(ids.len(), 34);
    }

    #[test]
    fn test_missing_guns_of_august() {
        let cards: Vec<_> = sample_cards()
            .into_iter()
            .filter(|c| c.id.as_str() != GUNS_OF_AUGUST)
            .collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            setup(&cards, &actors(), false, &mut rng),
            Err(RulesError::MissingCard(..))
        ));
    }

    #[test]
    fn test_refill_reshuffles_discards() {
        let mut state = table(3);
        let ap = ActorId::new("ap");
        let hand = path!["hand", Id::new("ap")];
        let discard = path!["discard", Id::new("ap")];
        let draw = path!["draw", Id::new("ap")];

        // Empty the draw pile into the discards and play the whole hand away.
        let mut gone = std::mem::take(pile_mut(&mut state, &draw).unwrap());
        gone.extend(std::mem::take(pile_mut(&mut state, &hand).unwrap()));
        for card in gone.iter_mut() {
            card_mut(card).unwrap().make_public(FRONT);
        }
        *pile_mut(&mut state, &discard).unwrap() = gone;

        let mut rng = ChaCha8Rng::seed_from_u64(4);
        draw_cards(&mut state, &ap, &mut rng).unwrap();
        assert_eq!(pile(&state, &hand).len(), HAND_SIZE);
        assert!(pile(&state, &discard).is_empty());
        assert_eq!(pile(&state, &draw).len(), 7);
        for card in pile(&state, &draw) {
            assert!(!card.as_entity().unwrap().is_visible(FRONT, &ap));
        }
    }

    #[test]
    fn test_parse_cards() {
        let cards = parse_cards(
            r#"[{"_": {"@id": ":CP1"}, "front": {"name": "Guns of August", "side": "CP", "deck": 0}}]"#,
        )
        .unwrap();
        assert_eq!(cards[0].id, Id::new("CP1"));
        assert!(matches!(parse_cards(r#"[1]"#), Err(RulesError::NotACard(0))));
        assert!(matches!(parse_cards("{"), Err(RulesError::Json(_))));
    }
}
