//! Email verification and password reset handlers.
//!
//! Tokens arrive as path segments because they are delivered inside links.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use kindred_core::auth::verification::PasswordResetIssue;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    MessageResponse, ResetPasswordRequest, RevokedResponse, SetNewPasswordRequest,
    VerifiedResponse,
};

/// `POST /users/auth/resend-verification-email`
pub async fn resend_verification_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<MessageResponse>> {
    state
        .verification
        .resend_email_verification(user.0.account_id)
        .await?;
    Ok(Json(MessageResponse::new("Verification email sent")))
}

/// `PATCH /users/auth/verify-email/{token}`
pub async fn verify_email_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<VerifiedResponse>> {
    let account_id = state.verification.redeem_email_verification(&token).await?;
    Ok(Json(VerifiedResponse { account_id }))
}

/// `POST /users/auth/reset-password`
pub async fn reset_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    match state.verification.issue_password_reset(&body.email).await? {
        PasswordResetIssue::Issued { .. } => {
            Ok(Json(MessageResponse::new("Password reset email sent")))
        }
        PasswordResetIssue::NotFound => {
            Err(AppError::NotFound("No account with that email".into()))
        }
    }
}

/// `POST /users/auth/verify-link/{token}`: check a reset link before showing
/// the new-password form.
pub async fn verify_link_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    state.verification.inspect_password_reset(&token).await?;
    Ok(Json(MessageResponse::new("Link is valid")))
}

/// `PATCH /users/auth/set-new-password/{token}`
pub async fn set_new_password_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<SetNewPasswordRequest>,
) -> AppResult<Json<RevokedResponse>> {
    let revoked_sessions = state
        .verification
        .redeem_password_reset(&token, &body.password)
        .await?;
    Ok(Json(RevokedResponse { revoked_sessions }))
}
