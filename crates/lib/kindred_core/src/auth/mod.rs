//! Authentication and session lifecycle.
//!
//! Token codec, password hashing, the credential service and the
//! verification flows. Shared by both transports in `kindred_api`.

pub mod credentials;
pub mod delivery;
pub mod jwt;
pub mod password;
pub mod secret;
pub mod verification;

use thiserror::Error;

use crate::store::StoreError;

pub use credentials::CredentialService;
pub use jwt::TokenCodec;
pub use verification::VerificationService;

/// Why a token failed to decode. Never raised as a panic, always returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed token")]
    Malformed,

    #[error("signature mismatch")]
    BadSignature,

    #[error("token expired")]
    Expired,
}

/// Authentication outcomes surfaced to callers.
///
/// Everything except [`AuthError::Store`] and [`AuthError::Internal`] is an
/// expected decision. `InvalidCredentials` deliberately covers both "unknown
/// account" and "wrong password".
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email not verified")]
    EmailNotVerified,

    #[error("Not found")]
    NotFound,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token already used")]
    TokenConsumed,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Whether this is a server fault rather than an authentication decision.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Internal(_))
    }
}
