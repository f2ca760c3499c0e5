//! JWT token codec.
//!
//! Signs and verifies access and verification tokens with a process-wide
//! HS256 secret. Pure and synchronous: expiry is checked against a caller
//! supplied clock so results are deterministic.

use std::fmt;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{AuthError, DecodeError};
use crate::models::auth::{AccessClaims, VerificationClaims};

/// Claims carrying their own expiry.
pub trait Expiring {
    /// Expiry as a unix timestamp.
    fn expires_at(&self) -> i64;
}

impl Expiring for AccessClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

impl Expiring for VerificationClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

/// HS256 signer/verifier.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is enforced in `verify_at` against the injected clock.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign `claims` into a compact JWT.
    pub fn issue<C: Serialize>(&self, claims: &C) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Verify against the current wall clock.
    pub fn verify<C>(&self, token: &str) -> Result<C, DecodeError>
    where
        C: DeserializeOwned + Expiring,
    {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify signature and structure, then reject if `now` is at or past
    /// the embedded expiry.
    pub fn verify_at<C>(&self, token: &str, now: i64) -> Result<C, DecodeError>
    where
        C: DeserializeOwned + Expiring,
    {
        let data = decode::<C>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => DecodeError::BadSignature,
                ErrorKind::ExpiredSignature => DecodeError::Expired,
                _ => DecodeError::Malformed,
            }
        })?;
        if now >= data.claims.expires_at() {
            return Err(DecodeError::Expired);
        }
        Ok(data.claims)
    }
}
