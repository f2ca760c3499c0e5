//! Single-use verification flows: email verification and password reset.
//!
//! Tokens are signed [`VerificationClaims`] whose `jti` points at a stored
//! [`VerificationRecord`]. The signature proves we issued it; the record
//! decides whether it may still be redeemed. Redemption consumes the record
//! and applies its effect in one store operation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::credentials::{CredentialService, expiry_after, normalize_email};
use super::delivery::{DeliveryMessage, TokenDelivery};
use super::{AuthError, DecodeError};
use crate::ids::uuidv7;
use crate::models::auth::{Account, VerificationClaims, VerificationPurpose, VerificationRecord};
use crate::store::{AccountStore, AuthStore, RedeemEffect, RedeemOutcome, VerificationStore};

/// Result of a password reset request.
///
/// An unknown email is a normal outcome; whether to reveal it is up to the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordResetIssue {
    Issued { account_id: Uuid, token: String },
    NotFound,
}

/// Issues, delivers and redeems verification tokens.
#[derive(Clone)]
pub struct VerificationService {
    credentials: CredentialService,
    delivery: Arc<dyn TokenDelivery>,
}

impl VerificationService {
    pub fn new(credentials: CredentialService, delivery: Arc<dyn TokenDelivery>) -> Self {
        Self {
            credentials,
            delivery,
        }
    }

    fn store(&self) -> &Arc<dyn AuthStore> {
        self.credentials.store()
    }

    fn ttl_for(&self, purpose: VerificationPurpose) -> std::time::Duration {
        let config = self.credentials.config();
        match purpose {
            VerificationPurpose::EmailVerification => config.email_verification_ttl,
            VerificationPurpose::PasswordReset => config.password_reset_ttl,
        }
    }

    /// Persist a fresh record (superseding the pending one), sign its token
    /// and hand it to delivery.
    async fn issue(
        &self,
        account: &Account,
        purpose: VerificationPurpose,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let record = VerificationRecord {
            id: uuidv7(),
            account_id: account.id,
            purpose,
            issued_at: now,
            expires_at: expiry_after(now, self.ttl_for(purpose))?,
            consumed_at: None,
            superseded_at: None,
        };
        let token = self.credentials.codec().issue(&VerificationClaims {
            sub: account.id,
            jti: record.id,
            purpose,
            iat: record.issued_at.timestamp(),
            exp: record.expires_at.timestamp(),
        })?;

        self.credentials
            .bounded(self.store().issue_verification(&record))
            .await?;
        info!(account_id = %account.id, purpose = purpose.as_str(), "verification token issued");

        let message = DeliveryMessage {
            purpose,
            email: account.email.clone(),
            token: token.clone(),
        };
        if let Err(e) = self.delivery.deliver(message).await {
            warn!(account_id = %account.id, error = %e, "verification token delivery failed");
            return Err(AuthError::Internal(format!("delivery failed: {e}")));
        }
        Ok(token)
    }

    /// Decode and check purpose. Anything we did not sign for this purpose is
    /// `Forbidden`; a signed but stale token is `TokenExpired`.
    fn decode(
        &self,
        token: &str,
        purpose: VerificationPurpose,
    ) -> Result<VerificationClaims, AuthError> {
        let claims: VerificationClaims = match self.credentials.codec().verify(token) {
            Ok(claims) => claims,
            Err(DecodeError::Expired) => return Err(AuthError::TokenExpired),
            Err(reason) => {
                debug!(%reason, purpose = purpose.as_str(), "verification token rejected");
                return Err(AuthError::Forbidden);
            }
        };
        if claims.purpose != purpose {
            debug!(
                expected = purpose.as_str(),
                got = claims.purpose.as_str(),
                "verification token used for the wrong flow"
            );
            return Err(AuthError::Forbidden);
        }
        Ok(claims)
    }

    async fn account(&self, account_id: Uuid) -> Result<Account, AuthError> {
        self.credentials
            .bounded(self.store().find_account_by_id(account_id))
            .await?
            .ok_or(AuthError::NotFound)
    }

    async fn redeem(
        &self,
        token: &str,
        purpose: VerificationPurpose,
        effect: RedeemEffect,
    ) -> Result<(Uuid, u64), AuthError> {
        let claims = self.decode(token, purpose)?;
        let outcome = self
            .credentials
            .bounded(
                self.store()
                    .redeem_verification(claims.jti, purpose, effect, Utc::now()),
            )
            .await?;
        match outcome {
            RedeemOutcome::Applied {
                account_id,
                revoked_sessions,
            } => Ok((account_id, revoked_sessions)),
            RedeemOutcome::AlreadyConsumed | RedeemOutcome::Superseded => {
                debug!(token_id = %claims.jti, ?outcome, "verification token no longer redeemable");
                Err(AuthError::TokenConsumed)
            }
            RedeemOutcome::Expired => Err(AuthError::TokenExpired),
            RedeemOutcome::Unknown => {
                warn!(token_id = %claims.jti, "signed verification token has no record");
                Err(AuthError::Forbidden)
            }
        }
    }

    /// Issue (and deliver) an email verification token.
    pub async fn issue_email_verification(&self, account_id: Uuid) -> Result<String, AuthError> {
        let account = self.account(account_id).await?;
        self.issue(&account, VerificationPurpose::EmailVerification)
            .await
    }

    /// Reissue an email verification token, retiring the pending one.
    /// Without a pending request this is `NotFound`.
    pub async fn resend_email_verification(&self, account_id: Uuid) -> Result<String, AuthError> {
        let pending = self
            .credentials
            .bounded(
                self.store()
                    .find_pending_verification(account_id, VerificationPurpose::EmailVerification),
            )
            .await?;
        if pending.is_none() {
            return Err(AuthError::NotFound);
        }
        self.issue_email_verification(account_id).await
    }

    /// Consume an email verification token and mark the email verified.
    pub async fn redeem_email_verification(&self, token: &str) -> Result<Uuid, AuthError> {
        let (account_id, _) = self
            .redeem(
                token,
                VerificationPurpose::EmailVerification,
                RedeemEffect::VerifyEmail,
            )
            .await?;
        info!(%account_id, "email verified");
        Ok(account_id)
    }

    /// Issue (and deliver) a password reset token for `email`.
    pub async fn issue_password_reset(&self, email: &str) -> Result<PasswordResetIssue, AuthError> {
        let email = normalize_email(email);
        let Some(account) = self
            .credentials
            .bounded(self.store().find_account_by_email(&email))
            .await?
        else {
            debug!("password reset requested for unknown email");
            return Ok(PasswordResetIssue::NotFound);
        };
        let token = self
            .issue(&account, VerificationPurpose::PasswordReset)
            .await?;
        Ok(PasswordResetIssue::Issued {
            account_id: account.id,
            token,
        })
    }

    /// Check a password reset token without consuming it.
    pub async fn inspect_password_reset(&self, token: &str) -> Result<Uuid, AuthError> {
        let claims = self.decode(token, VerificationPurpose::PasswordReset)?;
        let record = self
            .credentials
            .bounded(self.store().find_verification(claims.jti))
            .await?;
        match record {
            None => Err(AuthError::Forbidden),
            Some(r) if r.purpose != VerificationPurpose::PasswordReset => Err(AuthError::Forbidden),
            Some(r) if !r.is_pending() => Err(AuthError::TokenConsumed),
            Some(r) if r.expires_at <= Utc::now() => Err(AuthError::TokenExpired),
            Some(r) => Ok(r.account_id),
        }
    }

    /// Consume a password reset token, replace the password and revoke every
    /// session of the account. Returns the number of revoked sessions.
    pub async fn redeem_password_reset(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<u64, AuthError> {
        // Reject bad links before paying for bcrypt.
        self.decode(token, VerificationPurpose::PasswordReset)?;
        let password_hash = self.credentials.hash_new_password(new_password)?;
        let (account_id, revoked) = self
            .redeem(
                token,
                VerificationPurpose::PasswordReset,
                RedeemEffect::ReplacePassword { password_hash },
            )
            .await?;
        info!(%account_id, revoked, "password reset");
        Ok(revoked)
    }
}
