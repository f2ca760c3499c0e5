//! Auth-related database queries.
//!
//! Each query takes any Postgres executor so it can run against the pool or
//! inside a transaction (`&mut *tx`).

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use super::{StoreError, StoreResult};
use crate::models::auth::{Account, Session, VerificationPurpose, VerificationRecord};

type AccountRow = (Uuid, String, String, bool, Option<DateTime<Utc>>, DateTime<Utc>);
type SessionRow = (Uuid, Uuid, DateTime<Utc>, bool, String, Option<DateTime<Utc>>);
type VerificationRow = (
    Uuid,
    Uuid,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, email_verified, activated_at, created_at";
const SESSION_COLUMNS: &str = "id, account_id, created_at, valid, refresh_token_hash, refreshed_at";
const VERIFICATION_COLUMNS: &str =
    "id, account_id, purpose, issued_at, expires_at, consumed_at, superseded_at";

fn account_from_row(row: AccountRow) -> Account {
    let (id, email, password_hash, email_verified, activated_at, created_at) = row;
    Account {
        id,
        email,
        password_hash,
        email_verified,
        activated_at,
        created_at,
    }
}

fn session_from_row(row: SessionRow) -> Session {
    let (id, account_id, created_at, valid, refresh_token_hash, refreshed_at) = row;
    Session {
        id,
        account_id,
        created_at,
        valid,
        refresh_token_hash,
        refreshed_at,
    }
}

fn verification_from_row(row: VerificationRow) -> StoreResult<VerificationRecord> {
    let (id, account_id, purpose, issued_at, expires_at, consumed_at, superseded_at) = row;
    let purpose = VerificationPurpose::parse(&purpose)
        .ok_or_else(|| StoreError::Internal(format!("unknown verification purpose '{purpose}'")))?;
    Ok(VerificationRecord {
        id,
        account_id,
        purpose,
        issued_at,
        expires_at,
        consumed_at,
        superseded_at,
    })
}

/// Map a unique-constraint violation to [`StoreError::Conflict`].
fn conflict_on_unique(e: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        return StoreError::Conflict(what.to_string());
    }
    StoreError::Db(e)
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Insert a new unverified account.
pub async fn insert_account<'e, E: PgExecutor<'e>>(
    exec: E,
    email: &str,
    password_hash: &str,
) -> StoreResult<Account> {
    let sql = format!(
        "INSERT INTO accounts (email, password_hash) VALUES ($1, $2) RETURNING {ACCOUNT_COLUMNS}"
    );
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(email)
        .bind(password_hash)
        .fetch_one(exec)
        .await
        .map_err(|e| conflict_on_unique(e, "email already registered"))?;
    Ok(account_from_row(row))
}

/// Fetch an account by email.
pub async fn find_account_by_email<'e, E: PgExecutor<'e>>(
    exec: E,
    email: &str,
) -> StoreResult<Option<Account>> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(email)
        .fetch_optional(exec)
        .await?;
    Ok(row.map(account_from_row))
}

/// Fetch an account by ID.
pub async fn find_account_by_id<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
) -> StoreResult<Option<Account>> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?;
    Ok(row.map(account_from_row))
}

/// Replace an account's password hash. Returns the number of rows touched.
pub async fn update_password_hash<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    password_hash: &str,
) -> StoreResult<u64> {
    let result = sqlx::query("UPDATE accounts SET password_hash = $2 WHERE id = $1")
        .bind(id)
        .bind(password_hash)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}

/// Set the verification flag, stamping `activated_at` on first verification.
pub async fn update_email_verified<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    verified: bool,
) -> StoreResult<()> {
    sqlx::query(
        "UPDATE accounts SET email_verified = $2, \
         activated_at = CASE WHEN $2 THEN COALESCE(activated_at, now()) ELSE activated_at END \
         WHERE id = $1",
    )
    .bind(id)
    .bind(verified)
    .execute(exec)
    .await?;
    Ok(())
}

/// Row-lock an account until the transaction ends, serializing writers that
/// key off it. Returns `false` when the account does not exist.
pub async fn lock_account<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> StoreResult<bool> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(exec)
            .await?;
    Ok(row.is_some())
}

/// Share-lock an account while it still carries `password_hash`. A password
/// replacement committed first makes this match nothing; one started later
/// waits for the lock holder to commit.
pub async fn lock_account_with_hash<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    password_hash: &str,
) -> StoreResult<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM accounts WHERE id = $1 AND password_hash = $2 FOR SHARE",
    )
    .bind(id)
    .bind(password_hash)
    .fetch_optional(exec)
    .await?;
    Ok(row.is_some())
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Create a valid session with its first refresh token hash.
pub async fn insert_session<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    account_id: Uuid,
    refresh_token_hash: &str,
) -> StoreResult<Session> {
    let sql = format!(
        "INSERT INTO sessions (id, account_id, refresh_token_hash) VALUES ($1, $2, $3) \
         RETURNING {SESSION_COLUMNS}"
    );
    let row = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(id)
        .bind(account_id)
        .bind(refresh_token_hash)
        .fetch_one(exec)
        .await?;
    Ok(session_from_row(row))
}

/// Fetch a session by ID, valid or not.
pub async fn find_session<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
) -> StoreResult<Option<Session>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
    let row = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?;
    Ok(row.map(session_from_row))
}

/// Fetch a session by the hash of its current refresh token.
pub async fn find_session_by_refresh_hash<'e, E: PgExecutor<'e>>(
    exec: E,
    refresh_token_hash: &str,
) -> StoreResult<Option<Session>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token_hash = $1");
    let row = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(refresh_token_hash)
        .fetch_optional(exec)
        .await?;
    Ok(row.map(session_from_row))
}

/// Swap the refresh hash if it still matches. Returns whether a row changed.
pub async fn rotate_refresh_token<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    current_hash: &str,
    next_hash: &str,
) -> StoreResult<bool> {
    let result = sqlx::query(
        "UPDATE sessions SET refresh_token_hash = $3, refreshed_at = now() \
         WHERE id = $1 AND refresh_token_hash = $2 AND valid",
    )
    .bind(id)
    .bind(current_hash)
    .bind(next_hash)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Invalidate one session.
pub async fn invalidate_session<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> StoreResult<()> {
    sqlx::query("UPDATE sessions SET valid = FALSE WHERE id = $1 AND valid")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(())
}

/// Invalidate all sessions of an account.
pub async fn invalidate_sessions_for_account<'e, E: PgExecutor<'e>>(
    exec: E,
    account_id: Uuid,
) -> StoreResult<u64> {
    let result = sqlx::query("UPDATE sessions SET valid = FALSE WHERE account_id = $1 AND valid")
        .bind(account_id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}

/// Valid sessions of an account, newest first.
pub async fn list_valid_sessions<'e, E: PgExecutor<'e>>(
    exec: E,
    account_id: Uuid,
) -> StoreResult<Vec<Session>> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE account_id = $1 AND valid \
         ORDER BY created_at DESC"
    );
    let rows = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(account_id)
        .fetch_all(exec)
        .await?;
    Ok(rows.into_iter().map(session_from_row).collect())
}

// ---------------------------------------------------------------------------
// Verification tokens
// ---------------------------------------------------------------------------

/// Mark pending records of the same account and purpose as superseded.
pub async fn supersede_pending<'e, E: PgExecutor<'e>>(
    exec: E,
    account_id: Uuid,
    purpose: VerificationPurpose,
    at: DateTime<Utc>,
) -> StoreResult<u64> {
    let result = sqlx::query(
        "UPDATE verification_tokens SET superseded_at = $3 \
         WHERE account_id = $1 AND purpose = $2 \
           AND consumed_at IS NULL AND superseded_at IS NULL",
    )
    .bind(account_id)
    .bind(purpose.as_str())
    .bind(at)
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}

/// Insert a pending verification record.
pub async fn insert_verification<'e, E: PgExecutor<'e>>(
    exec: E,
    record: &VerificationRecord,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO verification_tokens (id, account_id, purpose, issued_at, expires_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(record.id)
    .bind(record.account_id)
    .bind(record.purpose.as_str())
    .bind(record.issued_at)
    .bind(record.expires_at)
    .execute(exec)
    .await?;
    Ok(())
}

/// Fetch a verification record by ID.
pub async fn find_verification<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
) -> StoreResult<Option<VerificationRecord>> {
    let sql = format!("SELECT {VERIFICATION_COLUMNS} FROM verification_tokens WHERE id = $1");
    let row = sqlx::query_as::<_, VerificationRow>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?;
    row.map(verification_from_row).transpose()
}

/// Newest pending record for an account and purpose.
pub async fn find_pending_verification<'e, E: PgExecutor<'e>>(
    exec: E,
    account_id: Uuid,
    purpose: VerificationPurpose,
) -> StoreResult<Option<VerificationRecord>> {
    let sql = format!(
        "SELECT {VERIFICATION_COLUMNS} FROM verification_tokens \
         WHERE account_id = $1 AND purpose = $2 \
           AND consumed_at IS NULL AND superseded_at IS NULL \
         ORDER BY issued_at DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, VerificationRow>(&sql)
        .bind(account_id)
        .bind(purpose.as_str())
        .fetch_optional(exec)
        .await?;
    row.map(verification_from_row).transpose()
}

/// Flip `consumed_at` on a pending, unexpired record. Returns the owning
/// account when this call won the race.
pub async fn consume_verification<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    purpose: VerificationPurpose,
    now: DateTime<Utc>,
) -> StoreResult<Option<Uuid>> {
    let row = sqlx::query_scalar::<_, Uuid>(
        "UPDATE verification_tokens SET consumed_at = $3 \
         WHERE id = $1 AND purpose = $2 \
           AND consumed_at IS NULL AND superseded_at IS NULL AND expires_at > $3 \
         RETURNING account_id",
    )
    .bind(id)
    .bind(purpose.as_str())
    .bind(now)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}
