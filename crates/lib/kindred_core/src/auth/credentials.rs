//! Credential service: login, authentication decisions, logout and
//! password changes.
//!
//! Both transport guards call [`CredentialService::authenticate`]; it is the
//! only place a trust decision is made.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AuthError;
use super::jwt::TokenCodec;
use super::password::{check_policy, hash_password, verify_password};
use super::secret::{generate_token, hash_token};
use crate::config::AuthConfig;
use crate::models::auth::{AccessClaims, Account, Identity, LoginOutcome, Session, TokenPair};
use crate::store::{AccountStore, AuthStore, SessionStore, StoreError, StoreResult};

/// Hashed once at startup and verified against when the account is unknown,
/// so a miss costs the same bcrypt work as a wrong password.
const TIMING_GUARD_PASSWORD: &str = "kindred-timing-guard";

/// Convert a configured lifetime into a chrono duration.
fn chrono_ttl(ttl: std::time::Duration) -> Result<chrono::Duration, AuthError> {
    chrono::Duration::from_std(ttl)
        .map_err(|e| AuthError::Internal(format!("ttl out of range: {e}")))
}

/// `now + ttl`, failing instead of panicking past the representable range.
pub(crate) fn expiry_after(
    now: DateTime<Utc>,
    ttl: std::time::Duration,
) -> Result<DateTime<Utc>, AuthError> {
    now.checked_add_signed(chrono_ttl(ttl)?)
        .ok_or_else(|| AuthError::Internal(format!("expiry {ttl:?} after {now} out of range")))
}

/// Trim and lowercase an email for lookup and storage.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Stateful authentication logic over an [`AuthStore`].
#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn AuthStore>,
    codec: TokenCodec,
    config: AuthConfig,
    timing_guard_hash: Arc<str>,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        codec: TokenCodec,
        config: AuthConfig,
    ) -> Result<Self, AuthError> {
        let timing_guard_hash = hash_password(TIMING_GUARD_PASSWORD, config.bcrypt_cost)?;
        Ok(Self {
            store,
            codec,
            config,
            timing_guard_hash: timing_guard_hash.into(),
        })
    }

    pub fn store(&self) -> &Arc<dyn AuthStore> {
        &self.store
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Run a store call under the configured timeout. An elapsed call is a
    /// store fault and never an implicit success.
    pub(crate) async fn bounded<T, F>(&self, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result.map_err(AuthError::from),
            Err(_) => Err(AuthError::Store(StoreError::Timeout(self.config.store_timeout))),
        }
    }

    /// Check the password policy and hash a new password.
    pub(crate) fn hash_new_password(&self, password: &str) -> Result<String, AuthError> {
        check_policy(password, self.config.min_password_len)?;
        hash_password(password, self.config.bcrypt_cost)
    }

    /// Access token lifetime in seconds, as reported to clients.
    fn expires_in(&self) -> Result<i64, AuthError> {
        i64::try_from(self.config.access_token_ttl.as_secs())
            .map_err(|e| AuthError::Internal(format!("access ttl out of range: {e}")))
    }

    fn issue_access_token(
        &self,
        account_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = AccessClaims::new(account_id, session_id, now, expires_at);
        self.codec.issue(&claims)
    }

    /// Create a session for `account` and mint its token pair.
    ///
    /// The session is only opened while the account still carries the hash
    /// the caller verified, so a login racing a password change cannot
    /// outlive it.
    async fn open_session(&self, account: &Account) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let expires_at = expiry_after(now, self.config.access_token_ttl)?;
        let expires_in = self.expires_in()?;

        let refresh_token = generate_token();
        let created = self
            .bounded(self.store.create_session(
                account.id,
                &account.password_hash,
                &hash_token(&refresh_token),
            ))
            .await?;
        let Some(session) = created else {
            debug!(account_id = %account.id, "password changed during login");
            return Err(AuthError::InvalidCredentials);
        };

        let access_token = self.issue_access_token(account.id, session.id, now, expires_at)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in,
            session,
        })
    }

    /// Create an unverified account and log it in.
    pub async fn register(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::ValidationError("A valid email is required".into()));
        }
        let password_hash = self.hash_new_password(password)?;

        let account = match self.bounded(self.store.create_account(&email, &password_hash)).await {
            Err(AuthError::Store(StoreError::Conflict(_))) => {
                return Err(AuthError::EmailAlreadyExists);
            }
            other => other?,
        };
        info!(account_id = %account.id, "account registered");

        let tokens = self.open_session(&account).await?;
        Ok(LoginOutcome { tokens, account })
    }

    /// Authenticate with email + password.
    ///
    /// Unknown email and wrong password both fail with
    /// [`AuthError::InvalidCredentials`] after the same bcrypt work.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let email = normalize_email(email);
        let account = self.bounded(self.store.find_account_by_email(&email)).await?;

        let account = match account {
            Some(account) if verify_password(password, &account.password_hash) => account,
            Some(account) => {
                debug!(account_id = %account.id, "login rejected");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                let _ = verify_password(password, &self.timing_guard_hash);
                debug!("login rejected");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let tokens = self.open_session(&account).await?;
        info!(account_id = %account.id, session_id = %tokens.session.id, "logged in");
        Ok(LoginOutcome { tokens, account })
    }

    /// Resolve an access token into an [`Identity`].
    ///
    /// Decode failures (garbled, bad signature, expired) are `Unauthorized`.
    /// A well-signed token whose session is unknown or revoked is
    /// `Forbidden`.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let claims: AccessClaims = match self.codec.verify(token) {
            Ok(claims) => claims,
            Err(reason) => {
                debug!(%reason, "access token rejected");
                return Err(AuthError::Unauthorized);
            }
        };

        let session = match self.bounded(self.store.find_session(claims.sid)).await? {
            Some(session) if session.valid && session.account_id == claims.sub => session,
            Some(session) if session.account_id != claims.sub => {
                warn!(
                    session_id = %claims.sid,
                    account_id = %claims.sub,
                    "session belongs to another account"
                );
                return Err(AuthError::Forbidden);
            }
            Some(_) => {
                debug!(session_id = %claims.sid, "access token references revoked session");
                return Err(AuthError::Forbidden);
            }
            None => {
                warn!(session_id = %claims.sid, "access token references unknown session");
                return Err(AuthError::Forbidden);
            }
        };

        let Some(account) = self.bounded(self.store.find_account_by_id(claims.sub)).await? else {
            warn!(account_id = %claims.sub, "access token references unknown account");
            return Err(AuthError::Forbidden);
        };

        Ok(Identity {
            account_id: account.id,
            session_id: session.id,
            email_verified: account.email_verified,
        })
    }

    /// Secondary gate for routes that need a verified email.
    pub fn require_active(&self, identity: &Identity) -> Result<(), AuthError> {
        if identity.email_verified {
            Ok(())
        } else {
            Err(AuthError::EmailNotVerified)
        }
    }

    /// Exchange a refresh token for a new token pair (single-use rotation).
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let current_hash = hash_token(refresh_token);
        let Some(session) = self
            .bounded(self.store.find_session_by_refresh_hash(&current_hash))
            .await?
        else {
            debug!("unknown refresh token");
            return Err(AuthError::Unauthorized);
        };
        if !session.valid {
            debug!(session_id = %session.id, "refresh on revoked session");
            return Err(AuthError::Forbidden);
        }

        let now = Utc::now();
        let issued = session.refreshed_at.unwrap_or(session.created_at);
        if now - issued >= chrono_ttl(self.config.refresh_token_ttl)? {
            debug!(session_id = %session.id, "refresh token expired");
            return Err(AuthError::Unauthorized);
        }
        let expires_at = expiry_after(now, self.config.access_token_ttl)?;
        let expires_in = self.expires_in()?;

        let next_token = generate_token();
        let next_hash = hash_token(&next_token);
        let rotated = self
            .bounded(self.store.rotate_refresh_token(session.id, &current_hash, &next_hash))
            .await?;
        if !rotated {
            // Someone else presented the same refresh token first.
            warn!(session_id = %session.id, "refresh token reused; revoking session");
            self.bounded(self.store.invalidate_session(session.id)).await?;
            return Err(AuthError::Forbidden);
        }

        let access_token =
            self.issue_access_token(session.account_id, session.id, now, expires_at)?;
        Ok(TokenPair {
            access_token,
            refresh_token: next_token,
            expires_in,
            session: Session {
                refresh_token_hash: next_hash,
                refreshed_at: Some(now),
                ..session
            },
        })
    }

    /// Invalidate one session.
    pub async fn logout(&self, session_id: Uuid) -> Result<(), AuthError> {
        self.bounded(self.store.invalidate_session(session_id)).await?;
        info!(%session_id, "logged out");
        Ok(())
    }

    /// Invalidate every session of the account. Returns how many were valid.
    pub async fn logout_all(&self, account_id: Uuid) -> Result<u64, AuthError> {
        let revoked = self
            .bounded(self.store.invalidate_sessions_for_account(account_id))
            .await?;
        info!(%account_id, revoked, "logged out everywhere");
        Ok(revoked)
    }

    /// Valid sessions of the account, newest first.
    pub async fn sessions(&self, account_id: Uuid) -> Result<Vec<Session>, AuthError> {
        self.bounded(self.store.list_valid_sessions(account_id)).await
    }

    /// Re-check `old_password`, then replace the hash and revoke all sessions
    /// in one store operation. Returns the number of revoked sessions.
    pub async fn change_password(
        &self,
        account_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<u64, AuthError> {
        let account = self.bounded(self.store.find_account_by_id(account_id)).await?;
        match account {
            Some(account) if verify_password(old_password, &account.password_hash) => {}
            Some(_) => return Err(AuthError::InvalidCredentials),
            None => {
                let _ = verify_password(old_password, &self.timing_guard_hash);
                return Err(AuthError::InvalidCredentials);
            }
        }

        let password_hash = self.hash_new_password(new_password)?;
        let revoked = self
            .bounded(
                self.store
                    .replace_password_and_revoke_sessions(account_id, &password_hash),
            )
            .await?;
        info!(%account_id, revoked, "password changed");
        Ok(revoked)
    }
}
