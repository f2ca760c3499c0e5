//! Registration, login, refresh and password change handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, response::IntoResponse};
use axum_extra::extract::cookie::CookieJar;
use kindred_core::models::auth::{LoginOutcome, TokenPair};
use tracing::warn;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    AccountInfo, AuthResponse, ChangePasswordRequest, IdentityResponse, LoginRequest,
    RegisterRequest, RevokedResponse,
};
use crate::services::cookies::{self, REFRESH_COOKIE};

fn auth_response(tokens: &TokenPair, account: Option<AccountInfo>) -> AuthResponse {
    AuthResponse {
        access_token: tokens.access_token.clone(),
        expires_in: tokens.expires_in,
        session_id: tokens.session.id,
        account,
    }
}

fn signed_in(
    state: &AppState,
    jar: CookieJar,
    outcome: &LoginOutcome,
) -> (CookieJar, Json<AuthResponse>) {
    let jar = cookies::with_tokens(
        jar,
        &outcome.tokens,
        &state.config.auth,
        state.config.secure_cookies,
    );
    let body = auth_response(&outcome.tokens, Some(AccountInfo::from(&outcome.account)));
    (jar, Json(body))
}

/// `POST /users`: create an account, sign it in and send the verification
/// email.
pub async fn register_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    let outcome = state
        .credentials
        .register(&body.email, &body.password)
        .await?;

    // The account exists either way; a failed send can be retried via resend.
    if let Err(e) = state
        .verification
        .issue_email_verification(outcome.account.id)
        .await
    {
        warn!(
            account_id = %outcome.account.id,
            error = %e,
            "email verification not sent after registration"
        );
    }

    let (jar, body) = signed_in(&state, jar, &outcome);
    Ok((StatusCode::CREATED, jar, body))
}

/// `POST /users/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<AuthResponse>)> {
    let outcome = state.credentials.login(&body.email, &body.password).await?;
    Ok(signed_in(&state, jar, &outcome))
}

/// `POST /users/auth/refresh`: rotate the refresh cookie and mint a new
/// access token.
pub async fn refresh_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<AuthResponse>)> {
    let refresh_token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing refresh token".into()))?;

    let tokens = state.credentials.refresh(&refresh_token).await?;
    let jar = cookies::with_tokens(jar, &tokens, &state.config.auth, state.config.secure_cookies);
    Ok((jar, Json(auth_response(&tokens, None))))
}

/// `GET /users/me`: the resolved identity.
pub async fn me_handler(
    Extension(user): Extension<AuthenticatedUser>,
) -> Json<IdentityResponse> {
    Json(user.0.into())
}

/// `PATCH /users/auth/password`: change password; every session, this one
/// included, is revoked.
pub async fn change_password_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    jar: CookieJar,
    Json(body): Json<ChangePasswordRequest>,
) -> AppResult<(CookieJar, Json<RevokedResponse>)> {
    let revoked_sessions = state
        .credentials
        .change_password(user.0.account_id, &body.old_password, &body.new_password)
        .await?;
    let jar = cookies::cleared(jar, state.config.secure_cookies);
    Ok((jar, Json(RevokedResponse { revoked_sessions })))
}
