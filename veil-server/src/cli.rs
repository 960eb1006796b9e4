use std::path::PathBuf;

use clap::Parser;

/// CLI for the game daemon.
#[derive(Debug, Clone, Parser)]
#[command(name = "veil-server", about = "Serves private per-player views of a hidden-information card game")]
pub struct Cli {
    /// Listen address for HTTP/WS endpoints
    #[arg(long, env = "VEIL_ADDR", default_value = "127.0.0.1:8887")]
    pub listen_addr: String,

    /// Path to the game description (YAML)
    #[arg(long, env = "VEIL_GAME_CONFIG", default_value = "game.yml")]
    pub game: PathBuf,

    /// Where to save the game after every commit. Loaded on startup if present.
    #[arg(long, env = "VEIL_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Seed for shuffles and view ids. Random if not set.
    #[arg(long, env = "VEIL_SEED")]
    pub seed: Option<u64>,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // Auth options
    // ─────────────────────────────────────────────────────────────────────────

    /// Secret for signing/verifying user JWT tokens (HS256).
    #[arg(long, env = "VEIL_USER_SECRET", hide_env_values = true)]
    pub user_secret: Option<String>,

    /// Require a bearer token on every game route. Without it, a request may
    /// name its user in the `x-veil-user` header instead.
    #[arg(long, env = "VEIL_REQUIRE_AUTH", default_value = "false")]
    pub require_auth: bool,

    /// Expected JWT audience claim (optional).
    #[arg(long, env = "VEIL_AUTH_AUDIENCE")]
    pub auth_audience: Option<String>,
}
