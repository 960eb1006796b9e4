//! HTTP routes against a freshly dealt game.

use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use veil_core::{PersistedSession, SessionStore};
use veil_server::{
    auth::{create_user_token, AuthConfig, AuthState, USER_HEADER},
    config::{GameConfig, ServerConfig},
    server::{load_game, router, AppState},
};

const SECRET: &str = "test-secret";

fn config(state_file: Option<PathBuf>, auth: AuthConfig) -> ServerConfig {
    let game = GameConfig::from_file(Path::new(env!("CARGO_MANIFEST_DIR")).join("data/game.yml")).unwrap();
    ServerConfig {
        listen_addr: "127.0.0.1:0".into(),
        game,
        state_file,
        seed: 7,
        auth,
    }
}

fn with_secret() -> AuthConfig {
    AuthConfig {
        user_secret: Some(SECRET.into()),
        expected_aud: None,
        require_auth: true,
    }
}

fn app(config: &ServerConfig) -> Router {
    let store = SessionStore::new();
    store.insert(load_game(config).unwrap());
    router(
        AppState::new(store, config.game.clone(), config.state_file.clone()),
        AuthState::from_config(&config.auth),
    )
}

enum Who<'a> {
    Nobody,
    Token(&'a str),
    Header(&'a str),
}

async fn call(app: &Router, method: &str, uri: &str, who: Who<'_>, body: Option<String>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    match who {
        Who::Nobody => {}
        Who::Token(user) => {
            let token = create_user_token(SECRET.as_bytes(), user, 3600).unwrap();
            req = req.header("authorization", format!("Bearer {token}"));
        }
        Who::Header(user) => req = req.header(USER_HEADER, user),
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn view(app: &Router, user: &str) -> Value {
    let (status, body) = call(app, "GET", "/api/games/pog/state", Who::Token(user), None).await;
    assert_eq!(status, StatusCode::OK);
    body["g"].clone()
}

fn play_guns_of_august() -> String {
    json!({
        "action": "play",
        "args": [["combat", ":cp"], ["hand", ":cp", 0]],
    })
    .to_string()
}

#[tokio::test]
async fn test_healthz() {
    let app = app(&config(None, with_secret()));
    let (status, _) = call(&app, "GET", "/healthz", Who::Nobody, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_auth_failures() {
    let app = app(&config(None, with_secret()));

    let (status, _) = call(&app, "GET", "/api/games/pog/state", Who::Nobody, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/api/games/pog/state", Who::Header("uckelman"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&app, "GET", "/api/games/pog/state", Who::Token("mallory"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("mallory"));
}

#[tokio::test]
async fn test_initial_views() {
    let app = app(&config(None, with_secret()));
    let cp = view(&app, "uckelman").await;
    let ap = view(&app, "joel").await;

    let cp_hand = cp["hand"][":cp"].as_array().unwrap();
    assert_eq!(cp_hand.len(), 7);
    assert_eq!(cp_hand[0]["front"]["name"], "Guns of August");
    assert!(cp_hand.iter().all(|card| card["front"].is_object()));

    // AP sees the backs of CP's hand and nothing of either draw pile.
    let seen_by_ap = ap["hand"][":cp"].as_array().unwrap();
    assert_eq!(seen_by_ap.len(), 7);
    for card in seen_by_ap {
        assert!(card.get("front").is_none());
        assert_eq!(card["back"]["side"], "CP");
        assert_eq!(card["_"]["front"], json!([":cp"]));
    }
    for card in ap["draw"][":ap"].as_array().unwrap() {
        assert!(card.get("front").is_none());
    }
}

#[tokio::test]
async fn test_play_is_seen_by_both() {
    let app = app(&config(None, with_secret()));

    let (status, body) = call(
        &app,
        "POST",
        "/api/games/pog/state",
        Who::Token("uckelman"),
        Some(play_guns_of_august()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["p"].as_array().unwrap().is_empty());

    let ap = view(&app, "joel").await;
    assert_eq!(ap["combat"][":cp"][0]["front"]["name"], "Guns of August");
    assert_eq!(ap["hand"][":cp"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_request_errors() {
    let app = app(&config(None, with_secret()));

    let unknown = json!({ "action": "cheat", "args": [] }).to_string();
    let (status, _) = call(&app, "POST", "/api/games/pog/state", Who::Token("joel"), Some(unknown)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(&app, "POST", "/api/games/pog/state", Who::Token("joel"), Some("{".into())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "GET", "/api/games/chess/state", Who::Token("joel"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Drawing from an empty pile is rejected by the action itself.
    let empty = json!({ "action": "draw", "args": [["hand", ":ap"], ["removed", ":ap"]] }).to_string();
    let (status, body) = call(&app, "POST", "/api/games/pog/state", Who::Token("joel"), Some(empty)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("draw"));
}

#[tokio::test]
async fn test_unmapped_edit_leaves_state_alone() {
    let app = app(&config(None, with_secret()));
    let before = view(&app, "uckelman").await;

    let edit = json!([
        { "op": "add", "path": ["combat", ":ap", "-"], "value": { "_": { "@id": ":nope" }, "front": "forged" } }
    ])
    .to_string();
    let (status, _) = call(&app, "PATCH", "/api/games/pog/state", Who::Token("joel"), Some(edit)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(view(&app, "uckelman").await, before);
}

#[tokio::test]
async fn test_edit_of_own_area() {
    let app = app(&config(None, with_secret()));

    let edit = json!([{ "op": "add", "path": ["removed", ":ap", "-"], "value": "marker" }]).to_string();
    let (status, body) = call(&app, "PATCH", "/api/games/pog/state", Who::Token("joel"), Some(edit)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let cp = view(&app, "uckelman").await;
    assert_eq!(cp["removed"][":ap"], json!(["marker"]));
}

#[tokio::test]
async fn test_header_identity_without_secret() {
    let app = app(&config(None, AuthConfig::default()));

    let (status, body) = call(&app, "GET", "/api/games/pog/state", Who::Header("joel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["g"]["hand"][":ap"].as_array().unwrap().len(), 7);

    let (status, _) = call(&app, "GET", "/api/games/pog/state", Who::Nobody, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_commits_are_saved_and_resumed() {
    let dir = tempfile::TempDir::new().unwrap();
    let file = dir.path().join("pog.json");
    let cfg = config(Some(file.clone()), with_secret());
    let first = app(&cfg);

    let (status, _) = call(
        &first,
        "POST",
        "/api/games/pog/state",
        Who::Token("uckelman"),
        Some(play_guns_of_august()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(PersistedSession::load(&file).unwrap().revision, 1);

    // A restart picks the game up where it was.
    let second = app(&cfg);
    assert_eq!(view(&second, "joel").await, view(&first, "joel").await);
}
