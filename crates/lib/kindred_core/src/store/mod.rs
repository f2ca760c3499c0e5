//! Persistence contracts required by the auth core.
//!
//! The credential service and verification flows only ever touch accounts,
//! sessions and verification records through these traits. Two
//! implementations ship with the crate: [`memory::MemoryAuthStore`] and
//! [`postgres::PgAuthStore`].

pub mod memory;
pub mod postgres;
pub mod queries;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{Account, Session, VerificationPurpose, VerificationRecord};

pub use memory::MemoryAuthStore;
pub use postgres::PgAuthStore;

/// Store faults. These are I/O failures, never authentication decisions.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal store error: {0}")]
    Internal(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Side effect applied in the same unit of work that consumes a
/// verification token.
#[derive(Debug, Clone)]
pub enum RedeemEffect {
    /// Mark the account's email as verified.
    VerifyEmail,
    /// Replace the password hash and invalidate every session of the account.
    ReplacePassword { password_hash: String },
}

/// Outcome of an atomic consume-and-apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// The token was pending; it is now consumed and the effect applied.
    Applied { account_id: Uuid, revoked_sessions: u64 },
    AlreadyConsumed,
    /// A newer token for the same purpose was issued.
    Superseded,
    Expired,
    /// No such record, wrong purpose, or the account no longer exists.
    Unknown,
}

/// Account records. Lookups and the two field updates the auth core needs.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new unverified account. Duplicate emails yield
    /// [`StoreError::Conflict`].
    async fn create_account(&self, email: &str, password_hash: &str) -> StoreResult<Account>;

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    async fn find_account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()>;

    /// Set the verification flag. The first transition to `true` also stamps
    /// `activated_at`.
    async fn update_email_verified(&self, id: Uuid, verified: bool) -> StoreResult<()>;
}

/// Durable record of sessions per account.
///
/// Invalidation is idempotent: invalidating an invalid or unknown session is
/// a no-op. `find_session` returns `None` for unknown ids and the record with
/// `valid == false` for revoked ones; callers reject both.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a session only while the account still carries
    /// `expected_password_hash`, the hash the caller verified against.
    /// Returns `None` when the account is gone or its password changed in
    /// the meantime.
    async fn create_session(
        &self,
        account_id: Uuid,
        expected_password_hash: &str,
        refresh_token_hash: &str,
    ) -> StoreResult<Option<Session>>;

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<Session>>;

    async fn find_session_by_refresh_hash(&self, refresh_token_hash: &str)
    -> StoreResult<Option<Session>>;

    /// Compare-and-set the refresh hash of a valid session. Returns `false`
    /// when `current_hash` no longer matches or the session is invalid.
    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        current_hash: &str,
        next_hash: &str,
    ) -> StoreResult<bool>;

    async fn invalidate_session(&self, id: Uuid) -> StoreResult<()>;

    /// Returns how many sessions flipped from valid to invalid.
    async fn invalidate_sessions_for_account(&self, account_id: Uuid) -> StoreResult<u64>;

    /// Valid sessions, newest first.
    async fn list_valid_sessions(&self, account_id: Uuid) -> StoreResult<Vec<Session>>;
}

/// Issued verification tokens.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Persist `record`, superseding any pending record with the same account
    /// and purpose in the same unit of work.
    async fn issue_verification(&self, record: &VerificationRecord) -> StoreResult<()>;

    async fn find_verification(&self, id: Uuid) -> StoreResult<Option<VerificationRecord>>;

    async fn find_pending_verification(
        &self,
        account_id: Uuid,
        purpose: VerificationPurpose,
    ) -> StoreResult<Option<VerificationRecord>>;
}

/// Everything the auth core needs, plus the operations that must span
/// records atomically.
#[async_trait]
pub trait AuthStore: AccountStore + SessionStore + VerificationStore {
    /// Replace the password hash and invalidate all sessions of the account
    /// as one unit. No reader may observe one without the other.
    async fn replace_password_and_revoke_sessions(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> StoreResult<u64>;

    /// Consume a pending verification record and apply `effect` as one unit.
    /// Concurrent calls for the same id see exactly one `Applied`.
    async fn redeem_verification(
        &self,
        id: Uuid,
        purpose: VerificationPurpose,
        effect: RedeemEffect,
        now: DateTime<Utc>,
    ) -> StoreResult<RedeemOutcome>;
}
