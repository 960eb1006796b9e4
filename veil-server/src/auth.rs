//! Player identification.
//!
//! A bearer token signed with the server's user secret names a user in its
//! `sub` claim; the game config decides which player that user controls.
//! Without a secret (and without `--require-auth`) the user is taken from
//! the [`USER_HEADER`] instead.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

/// Header naming the user when auth is disabled.
pub const USER_HEADER: &str = "x-veil-user";

/// The only `kid` user tokens may carry.
pub const KEY_ID: &str = "user";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Unix timestamp
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not authenticated")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("unknown key id: {0}")]
    UnknownKeyId(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Checks user tokens against the configured secret.
#[derive(Clone, Default)]
pub struct TokenVerifier {
    key: Option<DecodingKey>,
    audience: Option<String>,
}

impl TokenVerifier {
    pub fn new(secret: Option<&[u8]>, audience: Option<String>) -> Self {
        Self {
            key: secret.map(DecodingKey::from_secret),
            audience,
        }
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| AuthError::InvalidToken("no user secret configured".into()))?;

        let header = jsonwebtoken::decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if let Some(kid) = header.kid.filter(|kid| kid != KEY_ID) {
            return Err(AuthError::UnknownKeyId(kid));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        match self.audience {
            Some(ref aud) => {
                validation.set_audience(&[aud]);
                validation.set_required_spec_claims(&["exp", "aud"]);
            }
            None => validation.validate_aud = false,
        }

        decode::<Claims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidAudience => AuthError::InvalidToken("audience mismatch".into()),
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Secret for user tokens (env: VEIL_USER_SECRET)
    pub user_secret: Option<String>,
    /// When set, tokens must carry this `aud`
    pub expected_aud: Option<String>,
    /// Whether a token is required even without a secret
    pub require_auth: bool,
}

/// Auth settings shared with the extractor through a request extension.
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<TokenVerifier>,
    pub require_auth: bool,
}

impl AuthState {
    pub fn from_config(config: &AuthConfig) -> Self {
        let secret = config.user_secret.as_deref().map(str::as_bytes);
        Self {
            verifier: Arc::new(TokenVerifier::new(secret, config.expected_aud.clone())),
            require_auth: config.require_auth,
        }
    }

    /// Tokens are mandatory once a secret is configured or auth is required.
    fn tokens_required(&self) -> bool {
        self.require_auth || self.verifier.has_key()
    }
}

/// The authenticated user name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User(pub String);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

impl<S> FromRequestParts<S> for User
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(auth) = parts.extensions.get::<AuthState>().cloned() else {
            return Err(AuthError::MissingToken);
        };

        if let Some(token) = bearer_token(parts) {
            return auth.verifier.verify(token).map(|claims| User(claims.sub)).map_err(|e| {
                warn!("auth failed: {}", e);
                e
            });
        }

        if auth.tokens_required() {
            return Err(AuthError::MissingToken);
        }

        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|name| User(name.to_string()))
            .ok_or(AuthError::MissingToken)
    }
}

/// Mint a token for `sub`, valid for `expires_in_secs`.
pub fn create_user_token(secret: &[u8], sub: &str, expires_in_secs: u64) -> Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| anyhow!("system clock before epoch: {}", e))?
        .as_secs()
        + expires_in_secs;

    let claims = Claims {
        sub: sub.to_string(),
        exp,
        aud: None,
    };

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(KEY_ID.to_string());

    encode(&header, &claims, &EncodingKey::from_secret(secret))
        .map_err(|e| anyhow!("failed to encode token: {}", e))
}
