use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use veil_core::{Commit, PersistError, PersistedSession, Session, SessionId, SessionStore, Snapshot};
use veil_types::{ActorId, Node, Patch};

use crate::{
    auth::{AuthState, User},
    config::{GameConfig, ServerConfig},
    error::ApiError,
    rules,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub game: Arc<GameConfig>,
    pub hub: Arc<GameHub>,
    pub state_file: Option<Arc<PathBuf>>,
    save_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(store: SessionStore, game: GameConfig, state_file: Option<PathBuf>) -> Self {
        Self {
            store: Arc::new(store),
            game: Arc::new(game),
            hub: Arc::new(GameHub::default()),
            state_file: state_file.map(Arc::new),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    fn session(&self, game: &str) -> Result<Arc<Session>, ApiError> {
        self.store
            .get(&SessionId::new(game))
            .map_err(|_| ApiError::UnknownGame(game.to_string()))
    }

    fn player(&self, user: &User) -> Result<ActorId, ApiError> {
        self.game
            .player_of(&user.0)
            .ok_or_else(|| ApiError::UnknownUser(user.0.clone()))
    }

    /// Tell the room about `commit` and save the game if configured to.
    async fn committed(&self, session: &Arc<Session>, commit: Commit) {
        self.hub.room(session.id()).await.publish(Arc::new(commit));

        let Some(path) = self.state_file.clone() else {
            return;
        };
        // Held across the write so saves land in commit order.
        let _guard = self.save_lock.lock().await;
        let session = session.clone();
        let saved = tokio::task::spawn_blocking(move || -> Result<(), PersistError> {
            session.persist()?.save(&path)
        })
        .await;
        match saved {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(%err, "failed to save game"),
            Err(err) => error!(%err, "save task failed"),
        }
    }
}

/// Build the game session: resume from the state file when one exists,
/// otherwise deal a new table.
pub fn load_game(config: &ServerConfig) -> Result<Session> {
    let game = &config.game;
    let id = SessionId::new(game.id.as_str());
    let registry = Arc::new(rules::registry());
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    if let Some(path) = config.state_file.as_deref().filter(|p| p.exists()) {
        let persisted = PersistedSession::load(path)?;
        info!(path = %path.display(), revision = persisted.revision, "resuming saved game");
        return Ok(Session::restore(id, registry, persisted, rng.gen())?);
    }

    let cards_path = game.cards_path();
    let cards = rules::load_cards(&cards_path)
        .with_context(|| format!("loading cards for game {}", game.id))?;
    let table = rules::setup(&cards, &game.actors(), game.optional_cards, &mut rng)?;
    let session = Session::new(id, registry, Snapshot::new(table), game.actors(), rng.gen())?;
    Ok(session)
}

/// Routes, with auth installed as an extension.
pub fn router(state: AppState, auth: AuthState) -> Router {
    Router::new()
        // Public endpoints (no auth required)
        .route("/healthz", get(healthz))
        // Authenticated endpoints
        .route(
            "/api/games/{game}/state",
            get(get_state).post(post_action).patch(patch_state),
        )
        .route("/ws/games/{game}", get(ws_game))
        .layer(Extension(auth))
        .with_state(state)
}

pub async fn serve(config: ServerConfig) -> Result<()> {
    let session = load_game(&config)?;
    let store = SessionStore::new();
    store.insert(session);

    let auth = AuthState::from_config(&config.auth);
    if !auth.verifier.has_key() {
        warn!("no user secret configured; players are identified by the {} header", crate::auth::USER_HEADER);
    }
    let state = AppState::new(store, config.game.clone(), config.state_file.clone());
    let app = router(state, auth);

    info!(addr = %config.listen_addr, game = %config.game.id, "veil-server listening");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Serialize)]
struct ViewResponse {
    g: Node,
}

#[derive(Serialize)]
struct PatchesResponse {
    p: Vec<Patch>,
}

#[derive(Deserialize)]
struct ActionRequest {
    action: String,
    #[serde(default)]
    args: Vec<Node>,
}

async fn get_state(
    Path(game): Path<String>,
    State(state): State<AppState>,
    user: User,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.session(&game)?;
    let player = state.player(&user)?;
    let view = session.get_view(&player)?;
    Ok(Json(ViewResponse { g: view }))
}

async fn post_action(
    Path(game): Path<String>,
    State(state): State<AppState>,
    user: User,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.session(&game)?;
    let player = state.player(&user)?;
    let Json(request) = payload?;

    info!(%game, %player, action = %request.action, "action submitted");
    let outcome = session.submit_action(&player, &request.action, &request.args)?;
    state.committed(&session, outcome.commit).await;
    Ok(Json(PatchesResponse { p: outcome.patches }))
}

async fn patch_state(
    Path(game): Path<String>,
    State(state): State<AppState>,
    user: User,
    payload: Result<Json<Vec<Patch>>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.session(&game)?;
    let player = state.player(&user)?;
    let Json(patches) = payload?;

    info!(%game, %player, patches = patches.len(), "edit submitted");
    let commit = session.submit_edit(&player, &patches)?;
    state.committed(&session, commit).await;
    Ok(Json(serde_json::json!({})))
}

async fn ws_game(
    Path(game): Path<String>,
    State(state): State<AppState>,
    user: User,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.session(&game)?;
    let player = state.player(&user)?;
    let room = state.hub.room(session.id()).await;

    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(err) = handle_ws(socket, session, room, player).await {
            warn!(?err, "websocket session ended with error");
        }
    }))
}

/// What a connected player receives: its view once, then its patches for
/// every commit.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum StreamMessage {
    View { revision: u64, g: Node },
    Patches { revision: u64, p: Vec<Patch> },
}

/// Commit fan-out per game.
#[derive(Default)]
pub struct GameHub {
    rooms: RwLock<HashMap<SessionId, Arc<Room>>>,
}

impl GameHub {
    pub async fn room(&self, game: &SessionId) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(game).cloned() {
            return room;
        }

        let mut guard = self.rooms.write().await;
        guard
            .entry(game.clone())
            .or_insert_with(|| Arc::new(Room::new()))
            .clone()
    }
}

pub struct Room {
    tx: broadcast::Sender<Arc<Commit>>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Commit>> {
        self.tx.subscribe()
    }

    fn publish(&self, commit: Arc<Commit>) {
        // No receivers is fine: nobody is watching.
        let _ = self.tx.send(commit);
    }
}

async fn send(socket: &mut WebSocket, msg: &StreamMessage) -> Result<()> {
    let text = serde_json::to_string(msg)?;
    socket.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

/// The current view of `player`; moves `revision` up to it.
fn view_message(session: &Session, player: &ActorId, revision: &mut u64) -> Result<StreamMessage> {
    let current = session.current()?;
    *revision = current.revision;
    Ok(StreamMessage::View {
        revision: current.revision,
        g: current.view(player)?,
    })
}

/// What `player`, up to date with `revision`, receives for `commit`.
///
/// Commits at or below `revision` are already covered. One that skips a
/// revision means some were missed or arrived late, so the full view is
/// sent instead of patches that would not apply.
fn stream_commit(
    session: &Session,
    player: &ActorId,
    revision: &mut u64,
    commit: &Commit,
) -> Result<Option<StreamMessage>> {
    if commit.revision() <= *revision {
        return Ok(None);
    }
    if commit.revision() != *revision + 1 {
        warn!(%player, from = *revision, to = commit.revision(), "revision gap, resending view");
        return view_message(session, player, revision).map(Some);
    }
    *revision = commit.revision();
    let p = commit.patches_for(player)?;
    if p.is_empty() {
        return Ok(None);
    }
    debug!(%player, revision = *revision, patches = p.len(), "streaming commit");
    Ok(Some(StreamMessage::Patches { revision: *revision, p }))
}

async fn handle_ws(mut socket: WebSocket, session: Arc<Session>, room: Arc<Room>, player: ActorId) -> Result<()> {
    // Subscribe first so no commit falls between the view and the stream.
    let mut commits = room.subscribe();
    let mut revision = 0;
    send(&mut socket, &view_message(&session, &player, &mut revision)?).await?;

    loop {
        tokio::select! {
            recv = commits.recv() => {
                let msg = match recv {
                    Ok(commit) => stream_commit(&session, &player, &mut revision, &commit)?,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%player, skipped, "subscriber lagged, resending view");
                        Some(view_message(&session, &player, &mut revision)?)
                    }
                };
                if let Some(msg) = msg {
                    send(&mut socket, &msg).await?;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    Ok(())
}
