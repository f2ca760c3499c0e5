//! Authentication configuration.

use std::str::FromStr;
use std::time::Duration;

/// Tunables for token lifetimes, hashing and store access.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub email_verification_ttl: Duration,
    pub password_reset_ttl: Duration,
    /// Upper bound on a single store call. Elapsed calls fail closed.
    pub store_timeout: Duration,
    pub bcrypt_cost: u32,
    pub min_password_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            email_verification_ttl: Duration::from_secs(24 * 60 * 60),
            password_reset_ttl: Duration::from_secs(60 * 60),
            store_timeout: Duration::from_secs(5),
            bcrypt_cost: 10,
            min_password_len: 8,
        }
    }
}

impl AuthConfig {
    /// Reads overrides from environment variables, keeping defaults for
    /// anything unset or unparsable.
    ///
    /// | Variable                      | Default   |
    /// |-------------------------------|-----------|
    /// | `ACCESS_TOKEN_TTL_SECS`       | `900`     |
    /// | `REFRESH_TOKEN_TTL_SECS`      | `2592000` |
    /// | `EMAIL_VERIFICATION_TTL_SECS` | `86400`   |
    /// | `PASSWORD_RESET_TTL_SECS`     | `3600`    |
    /// | `STORE_TIMEOUT_MS`            | `5000`    |
    /// | `BCRYPT_COST`                 | `10`      |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            access_token_ttl: env_parse("ACCESS_TOKEN_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.access_token_ttl),
            refresh_token_ttl: env_parse("REFRESH_TOKEN_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_token_ttl),
            email_verification_ttl: env_parse("EMAIL_VERIFICATION_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.email_verification_ttl),
            password_reset_ttl: env_parse("PASSWORD_RESET_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.password_reset_ttl),
            store_timeout: env_parse("STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            bcrypt_cost: env_parse("BCRYPT_COST").unwrap_or(defaults.bcrypt_cost),
            min_password_len: defaults.min_password_len,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
