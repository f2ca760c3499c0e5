//! Out-of-band delivery of verification tokens.
//!
//! Building the email and sending it is someone else's job; the auth core
//! only hands over the token value.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::AuthError;
use crate::models::auth::VerificationPurpose;

/// A token ready to be sent to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryMessage {
    pub purpose: VerificationPurpose,
    pub email: String,
    pub token: String,
}

/// Transport for verification tokens (email, SMS, ...).
#[async_trait]
pub trait TokenDelivery: Send + Sync {
    async fn deliver(&self, message: DeliveryMessage) -> Result<(), AuthError>;
}

/// Development delivery: writes the token to the debug log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDelivery;

#[async_trait]
impl TokenDelivery for LogDelivery {
    async fn deliver(&self, message: DeliveryMessage) -> Result<(), AuthError> {
        debug!(
            email = %message.email,
            purpose = message.purpose.as_str(),
            token = %message.token,
            "verification token ready for delivery"
        );
        Ok(())
    }
}

/// Keeps delivered messages in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    sent: Mutex<Vec<DeliveryMessage>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent token sent to `email` for `purpose`.
    pub async fn latest(&self, email: &str, purpose: VerificationPurpose) -> Option<String> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|m| m.email == email && m.purpose == purpose)
            .map(|m| m.token.clone())
    }

    pub async fn len(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sent.lock().await.is_empty()
    }
}

#[async_trait]
impl TokenDelivery for MemoryOutbox {
    async fn deliver(&self, message: DeliveryMessage) -> Result<(), AuthError> {
        self.sent.lock().await.push(message);
        Ok(())
    }
}
