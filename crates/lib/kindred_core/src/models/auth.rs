//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API response shapes
//! in `kindred_api::models` (which use camelCase and omit secrets).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account identity record.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub email_verified: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One authenticated device/client.
///
/// `valid` is the sole authority on whether tokens referencing this session
/// are honored. Sessions are invalidated, never deleted.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub account_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub valid: bool,
    /// SHA-256 of the current refresh token.
    pub refresh_token_hash: String,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Resolved, trusted caller after successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub account_id: Uuid,
    pub session_id: Uuid,
    pub email_verified: bool,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: account ID.
    pub sub: Uuid,
    /// Session ID the token is bound to.
    pub sid: Uuid,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

impl AccessClaims {
    pub fn new(
        account_id: Uuid,
        session_id: Uuid,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sub: account_id,
            sid: session_id,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        }
    }
}

/// What a verification token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPurpose {
    EmailVerification,
    PasswordReset,
}

impl VerificationPurpose {
    /// Storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email_verification" => Some(Self::EmailVerification),
            "password_reset" => Some(Self::PasswordReset),
            _ => None,
        }
    }
}

/// JWT claims embedded in single-use verification tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationClaims {
    /// Subject: account ID.
    pub sub: Uuid,
    /// Verification record ID.
    pub jti: Uuid,
    pub purpose: VerificationPurpose,
    pub iat: i64,
    pub exp: i64,
}

/// Stored state of an issued verification token.
///
/// At most one record per (account, purpose) is pending at a time; issuing a
/// new one supersedes the previous.
#[derive(Debug, Clone)]
pub struct VerificationRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub purpose: VerificationPurpose,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub superseded_at: Option<DateTime<Utc>>,
}

impl VerificationRecord {
    pub fn consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    /// Neither consumed nor replaced by a newer token.
    pub fn is_pending(&self) -> bool {
        self.consumed_at.is_none() && self.superseded_at.is_none()
    }
}

/// Fresh credentials handed to a client after login, registration or refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub session: Session,
}

/// Result of a successful login or registration.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: TokenPair,
    pub account: Account,
}
