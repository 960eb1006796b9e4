use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use veil_types::ActorId;

use crate::auth::AuthConfig;
use crate::cli::Cli;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("user {user} is mapped to {player}, which is not a player")]
    UnknownPlayer { user: String, player: String },
}

/// A game as described by `game.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Game id used in routes (`/api/games/{id}/state`).
    pub id: String,

    /// Player identifiers, without the `:` prefix.
    #[serde(default = "default_players")]
    pub players: Vec<String>,

    /// User name (JWT `sub`) → player.
    #[serde(default)]
    pub users: BTreeMap<String, String>,

    /// Card data, relative to this file.
    #[serde(default = "default_cards")]
    pub cards: PathBuf,

    /// Include optional cards in the decks.
    #[serde(default)]
    pub optional_cards: bool,

    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_players() -> Vec<String> {
    vec!["ap".into(), "cp".into()]
}

fn default_cards() -> PathBuf {
    PathBuf::from("cards.json")
}

impl GameConfig {
    /// Load a game description from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: GameConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::MissingField("id".into()));
        }
        if self.players.is_empty() {
            return Err(ConfigError::MissingField("players".into()));
        }
        for (user, player) in &self.users {
            if !self.players.contains(player) {
                return Err(ConfigError::UnknownPlayer {
                    user: user.clone(),
                    player: player.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn actors(&self) -> Vec<ActorId> {
        self.players.iter().map(|p| ActorId::new(p.as_str())).collect()
    }

    /// The player `user` controls, if any.
    pub fn player_of(&self, user: &str) -> Option<ActorId> {
        self.users.get(user).map(|p| ActorId::new(p.as_str()))
    }

    /// Card data path, resolved relative to the config file
    pub fn cards_path(&self) -> PathBuf {
        if self.cards.is_absolute() {
            return self.cards.clone();
        }
        match self.config_path.as_deref().and_then(Path::parent) {
            Some(parent) => parent.join(&self.cards),
            None => self.cards.clone(),
        }
    }
}

/// Runtime configuration derived from CLI/env.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub game: GameConfig,
    pub state_file: Option<PathBuf>,
    pub seed: u64,
    pub auth: AuthConfig,
}

impl ServerConfig {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let game = GameConfig::from_file(&cli.game)?;

        let auth = AuthConfig {
            user_secret: cli.user_secret.clone(),
            expected_aud: cli.auth_audience.clone(),
            require_auth: cli.require_auth,
        };

        Ok(Self {
            listen_addr: cli.listen_addr.clone(),
            game,
            state_file: cli.state_file.clone(),
            seed: cli.seed.unwrap_or_else(rand::random),
            auth,
        })
    }
}
