//! In-process store for tests and database-less runs.
//!
//! All state sits behind one mutex, so every multi-record operation is a
//! single critical section. The lock is never held across an `.await`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccountStore, AuthStore, RedeemEffect, RedeemOutcome, SessionStore, StoreError, StoreResult,
    VerificationStore,
};
use crate::ids::uuidv7;
use crate::models::auth::{Account, Session, VerificationPurpose, VerificationRecord};

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    /// email → account id
    emails: HashMap<String, Uuid>,
    sessions: HashMap<Uuid, Session>,
    verifications: HashMap<Uuid, VerificationRecord>,
}

impl MemoryState {
    fn revoke_sessions(&mut self, account_id: Uuid) -> u64 {
        let mut revoked = 0;
        for session in self.sessions.values_mut() {
            if session.account_id == account_id && session.valid {
                session.valid = false;
                revoked += 1;
            }
        }
        revoked
    }

    fn mark_verified(&mut self, account_id: Uuid, verified: bool, now: DateTime<Utc>) -> bool {
        match self.accounts.get_mut(&account_id) {
            Some(account) => {
                account.email_verified = verified;
                if verified && account.activated_at.is_none() {
                    account.activated_at = Some(now);
                }
                true
            }
            None => false,
        }
    }
}

/// [`AuthStore`] backed by in-process hash maps.
#[derive(Debug, Default)]
pub struct MemoryAuthStore {
    state: Mutex<MemoryState>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAuthStore {
    async fn create_account(&self, email: &str, password_hash: &str) -> StoreResult<Account> {
        let mut state = self.state.lock().await;
        if state.emails.contains_key(email) {
            return Err(StoreError::Conflict(format!("email {email} already registered")));
        }
        let account = Account {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            email_verified: false,
            activated_at: None,
            created_at: Utc::now(),
        };
        state.emails.insert(account.email.clone(), account.id);
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .emails
            .get(email)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn find_account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&id) {
            account.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn update_email_verified(&self, id: Uuid, verified: bool) -> StoreResult<()> {
        self.state.lock().await.mark_verified(id, verified, Utc::now());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryAuthStore {
    async fn create_session(
        &self,
        account_id: Uuid,
        expected_password_hash: &str,
        refresh_token_hash: &str,
    ) -> StoreResult<Option<Session>> {
        let mut state = self.state.lock().await;
        match state.accounts.get(&account_id) {
            Some(account) if account.password_hash == expected_password_hash => {}
            _ => return Ok(None),
        }
        let session = Session {
            id: uuidv7(),
            account_id,
            created_at: Utc::now(),
            valid: true,
            refresh_token_hash: refresh_token_hash.to_string(),
            refreshed_at: None,
        };
        state.sessions.insert(session.id, session.clone());
        Ok(Some(session))
    }

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn find_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> StoreResult<Option<Session>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.refresh_token_hash == refresh_token_hash)
            .cloned())
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        current_hash: &str,
        next_hash: &str,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&id) {
            Some(session) if session.valid && session.refresh_token_hash == current_hash => {
                session.refresh_token_hash = next_hash.to_string();
                session.refreshed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn invalidate_session(&self, id: Uuid) -> StoreResult<()> {
        if let Some(session) = self.state.lock().await.sessions.get_mut(&id) {
            session.valid = false;
        }
        Ok(())
    }

    async fn invalidate_sessions_for_account(&self, account_id: Uuid) -> StoreResult<u64> {
        Ok(self.state.lock().await.revoke_sessions(account_id))
    }

    async fn list_valid_sessions(&self, account_id: Uuid) -> StoreResult<Vec<Session>> {
        let state = self.state.lock().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.account_id == account_id && s.valid)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(sessions)
    }
}

#[async_trait]
impl VerificationStore for MemoryAuthStore {
    async fn issue_verification(&self, record: &VerificationRecord) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        for existing in state.verifications.values_mut() {
            if existing.account_id == record.account_id
                && existing.purpose == record.purpose
                && existing.is_pending()
            {
                existing.superseded_at = Some(record.issued_at);
            }
        }
        state.verifications.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_verification(&self, id: Uuid) -> StoreResult<Option<VerificationRecord>> {
        Ok(self.state.lock().await.verifications.get(&id).cloned())
    }

    async fn find_pending_verification(
        &self,
        account_id: Uuid,
        purpose: VerificationPurpose,
    ) -> StoreResult<Option<VerificationRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .verifications
            .values()
            .filter(|r| r.account_id == account_id && r.purpose == purpose && r.is_pending())
            .max_by_key(|r| r.issued_at)
            .cloned())
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn replace_password_and_revoke_sessions(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let Some(account) = state.accounts.get_mut(&account_id) else {
            return Err(StoreError::Internal(format!("account {account_id} vanished")));
        };
        account.password_hash = password_hash.to_string();
        Ok(state.revoke_sessions(account_id))
    }

    async fn redeem_verification(
        &self,
        id: Uuid,
        purpose: VerificationPurpose,
        effect: RedeemEffect,
        now: DateTime<Utc>,
    ) -> StoreResult<RedeemOutcome> {
        let mut state = self.state.lock().await;

        let account_id = match state.verifications.get(&id) {
            None => return Ok(RedeemOutcome::Unknown),
            Some(r) if r.purpose != purpose => return Ok(RedeemOutcome::Unknown),
            Some(r) if r.consumed() => return Ok(RedeemOutcome::AlreadyConsumed),
            Some(r) if r.superseded_at.is_some() => return Ok(RedeemOutcome::Superseded),
            Some(r) if r.expires_at <= now => return Ok(RedeemOutcome::Expired),
            Some(r) => r.account_id,
        };
        if !state.accounts.contains_key(&account_id) {
            return Ok(RedeemOutcome::Unknown);
        }

        let revoked_sessions = match effect {
            RedeemEffect::VerifyEmail => {
                state.mark_verified(account_id, true, now);
                0
            }
            RedeemEffect::ReplacePassword { password_hash } => {
                if let Some(account) = state.accounts.get_mut(&account_id) {
                    account.password_hash = password_hash;
                }
                state.revoke_sessions(account_id)
            }
        };
        if let Some(record) = state.verifications.get_mut(&id) {
            record.consumed_at = Some(now);
        }

        Ok(RedeemOutcome::Applied {
            account_id,
            revoked_sessions,
        })
    }
}
