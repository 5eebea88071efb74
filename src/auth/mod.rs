//! Authentication module
//!
//! Players are identified by a bearer JWT whose `id` claim is their player id.
//! Account management happens outside this service.

pub mod jwt;

use thiserror::Error;

pub use jwt::{Claims, JwtConfig, JwtManager};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization token")]
    MissingToken,

    #[error("invalid authorization header")]
    MalformedHeader,

    #[error("invalid or expired token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token subject {0} is not a player id")]
    InvalidSubject(String),
}
