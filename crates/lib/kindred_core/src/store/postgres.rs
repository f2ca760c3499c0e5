//! PostgreSQL-backed [`AuthStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::queries;
use super::{
    AccountStore, AuthStore, RedeemEffect, RedeemOutcome, SessionStore, StoreError, StoreResult,
    VerificationStore,
};
use crate::ids::uuidv7;
use crate::models::auth::{Account, Session, VerificationPurpose, VerificationRecord};

/// Store over a shared connection pool. Cross-record operations each run in
/// a single transaction.
#[derive(Debug, Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for PgAuthStore {
    async fn create_account(&self, email: &str, password_hash: &str) -> StoreResult<Account> {
        queries::insert_account(&self.pool, email, password_hash).await
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        queries::find_account_by_email(&self.pool, email).await
    }

    async fn find_account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        queries::find_account_by_id(&self.pool, id).await
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        queries::update_password_hash(&self.pool, id, password_hash).await?;
        Ok(())
    }

    async fn update_email_verified(&self, id: Uuid, verified: bool) -> StoreResult<()> {
        queries::update_email_verified(&self.pool, id, verified).await
    }
}

#[async_trait]
impl SessionStore for PgAuthStore {
    async fn create_session(
        &self,
        account_id: Uuid,
        expected_password_hash: &str,
        refresh_token_hash: &str,
    ) -> StoreResult<Option<Session>> {
        let mut tx = self.pool.begin().await?;
        if !queries::lock_account_with_hash(&mut *tx, account_id, expected_password_hash).await? {
            tx.rollback().await?;
            return Ok(None);
        }
        let session =
            queries::insert_session(&mut *tx, uuidv7(), account_id, refresh_token_hash).await?;
        tx.commit().await?;
        Ok(Some(session))
    }

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        queries::find_session(&self.pool, id).await
    }

    async fn find_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> StoreResult<Option<Session>> {
        queries::find_session_by_refresh_hash(&self.pool, refresh_token_hash).await
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        current_hash: &str,
        next_hash: &str,
    ) -> StoreResult<bool> {
        queries::rotate_refresh_token(&self.pool, id, current_hash, next_hash).await
    }

    async fn invalidate_session(&self, id: Uuid) -> StoreResult<()> {
        queries::invalidate_session(&self.pool, id).await
    }

    async fn invalidate_sessions_for_account(&self, account_id: Uuid) -> StoreResult<u64> {
        queries::invalidate_sessions_for_account(&self.pool, account_id).await
    }

    async fn list_valid_sessions(&self, account_id: Uuid) -> StoreResult<Vec<Session>> {
        queries::list_valid_sessions(&self.pool, account_id).await
    }
}

#[async_trait]
impl VerificationStore for PgAuthStore {
    async fn issue_verification(&self, record: &VerificationRecord) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        // Concurrent issuers for one account queue here, so each one's
        // UPDATE sees the row the previous one inserted.
        if !queries::lock_account(&mut *tx, record.account_id).await? {
            tx.rollback().await?;
            return Err(StoreError::Internal(format!(
                "account {} vanished",
                record.account_id
            )));
        }
        let superseded = queries::supersede_pending(
            &mut *tx,
            record.account_id,
            record.purpose,
            record.issued_at,
        )
        .await?;
        queries::insert_verification(&mut *tx, record).await?;
        tx.commit().await?;
        debug!(
            account_id = %record.account_id,
            purpose = record.purpose.as_str(),
            superseded,
            "verification record issued"
        );
        Ok(())
    }

    async fn find_verification(&self, id: Uuid) -> StoreResult<Option<VerificationRecord>> {
        queries::find_verification(&self.pool, id).await
    }

    async fn find_pending_verification(
        &self,
        account_id: Uuid,
        purpose: VerificationPurpose,
    ) -> StoreResult<Option<VerificationRecord>> {
        queries::find_pending_verification(&self.pool, account_id, purpose).await
    }
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn replace_password_and_revoke_sessions(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        if queries::update_password_hash(&mut *tx, account_id, password_hash).await? != 1 {
            return Err(StoreError::Internal(format!("account {account_id} vanished")));
        }
        let revoked = queries::invalidate_sessions_for_account(&mut *tx, account_id).await?;
        tx.commit().await?;
        Ok(revoked)
    }

    async fn redeem_verification(
        &self,
        id: Uuid,
        purpose: VerificationPurpose,
        effect: RedeemEffect,
        now: DateTime<Utc>,
    ) -> StoreResult<RedeemOutcome> {
        let mut tx = self.pool.begin().await?;

        // The conditional UPDATE row-locks the record; a concurrent redeemer
        // blocks here and then matches zero rows.
        let Some(account_id) = queries::consume_verification(&mut *tx, id, purpose, now).await?
        else {
            tx.rollback().await?;
            let outcome = match queries::find_verification(&self.pool, id).await? {
                None => RedeemOutcome::Unknown,
                Some(r) if r.purpose != purpose => RedeemOutcome::Unknown,
                Some(r) if r.consumed() => RedeemOutcome::AlreadyConsumed,
                Some(r) if r.superseded_at.is_some() => RedeemOutcome::Superseded,
                Some(_) => RedeemOutcome::Expired,
            };
            return Ok(outcome);
        };

        let revoked_sessions = match effect {
            RedeemEffect::VerifyEmail => {
                queries::update_email_verified(&mut *tx, account_id, true).await?;
                0
            }
            RedeemEffect::ReplacePassword { password_hash } => {
                queries::update_password_hash(&mut *tx, account_id, &password_hash).await?;
                queries::invalidate_sessions_for_account(&mut *tx, account_id).await?
            }
        };
        tx.commit().await?;

        Ok(RedeemOutcome::Applied {
            account_id,
            revoked_sessions,
        })
    }
}
