//! Session listing and logout handlers.

use axum::extract::State;
use axum::{Extension, Json};
use axum_extra::extract::cookie::CookieJar;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{MessageResponse, RevokedResponse, SessionInfo, SessionListResponse};
use crate::services::cookies;

/// `GET /sessions`: valid sessions of the caller, newest first.
pub async fn list_sessions_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<SessionListResponse>> {
    let sessions = state.credentials.sessions(user.0.account_id).await?;
    let sessions = sessions
        .iter()
        .map(|s| SessionInfo::new(s, user.0.session_id))
        .collect();
    Ok(Json(SessionListResponse { sessions }))
}

/// `DELETE /sessions`: log out the calling session.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    state.credentials.logout(user.0.session_id).await?;
    let jar = cookies::cleared(jar, state.config.secure_cookies);
    Ok((jar, Json(MessageResponse::new("Logged out"))))
}

/// `DELETE /sessions/all`: log out every session of the caller.
pub async fn logout_all_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<RevokedResponse>)> {
    let revoked_sessions = state.credentials.logout_all(user.0.account_id).await?;
    let jar = cookies::cleared(jar, state.config.secure_cookies);
    Ok((jar, Json(RevokedResponse { revoked_sessions })))
}
