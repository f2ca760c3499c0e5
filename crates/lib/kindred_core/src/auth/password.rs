//! Password hashing via bcrypt.

use super::AuthError;

/// Hash a password with bcrypt at the given cost.
pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
///
/// bcrypt compares digests in constant time. A stored hash that fails to
/// parse counts as a mismatch so callers keep one failure shape.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Enforce the minimum password policy.
pub fn check_policy(password: &str, min_len: usize) -> Result<(), AuthError> {
    if password.chars().count() < min_len {
        return Err(AuthError::ValidationError(format!(
            "Password must be at least {min_len} characters"
        )));
    }
    Ok(())
}
