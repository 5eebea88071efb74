//! JWT token handling

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::AuthError;
use crate::game::PlayerRef;

/// Token claims. `id` carries the player id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub exp: usize,
    pub iat: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    secret: String,
    expiration_hours: u64,
    issuer: Option<String>,
}

impl JwtConfig {
    pub fn new(secret: String, expiration_hours: u64) -> Self {
        Self {
            secret,
            expiration_hours,
            issuer: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").unwrap_or_else(|_| "default-secret-change-me".to_string());
        let expiration_hours = std::env::var("JWT_EXPIRATION_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24);
        let config = Self::new(secret, expiration_hours);
        match std::env::var("JWT_ISSUER") {
            Ok(issuer) if !issuer.is_empty() => config.with_issuer(issuer),
            _ => config,
        }
    }
}

/// JWT manager
#[derive(Debug, Clone)]
pub struct JwtManager {
    config: JwtConfig,
}

impl JwtManager {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    /// Issue a token for a player. The login flow lives elsewhere; this is for
    /// local runs and tests.
    pub fn create_token(&self, player: PlayerRef) -> Result<String, AuthError> {
        let now = Utc::now().timestamp().max(0) as usize;
        let claims = Claims {
            id: player.to_string(),
            exp: now + (self.config.expiration_hours as usize * 3600),
            iat: now,
            iss: self.config.issuer.clone(),
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.secret.as_bytes()),
        )?)
    }

    /// Verify a token and return the player it was issued for.
    pub fn verify_token(&self, token: &str) -> Result<PlayerRef, AuthError> {
        let mut validation = Validation::default();
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.secret.as_bytes()),
            &validation,
        )?;
        data.claims
            .id
            .parse()
            .map_err(|_| AuthError::InvalidSubject(data.claims.id))
    }

    /// Verify an `Authorization`-style value (`Bearer <jwt>`).
    pub fn verify_bearer(&self, value: &str) -> Result<PlayerRef, AuthError> {
        let token = value
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MalformedHeader)?
            .trim();
        self.verify_token(token)
    }
}
