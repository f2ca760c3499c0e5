//! Request guard: cookie or bearer access token, decided per call.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use kindred_core::models::auth::Identity;
use tracing::debug;

use crate::AppState;
use crate::error::AppError;
use crate::services::bearer::{authorization_credential, cookie_credential, is_well_formed};

/// Resolved caller, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Identity);

/// Authenticate an inbound call. The `kindred_access` cookie wins over an
/// `Authorization: Bearer` header.
pub async fn authenticate_request(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Identity, AppError> {
    let token = cookie_credential(headers)
        .or_else(|| authorization_credential(headers))
        .ok_or_else(|| AppError::Unauthorized("Missing credentials".into()))?;

    if !is_well_formed(&token) {
        debug!("malformed access token rejected at the guard");
        return Err(AppError::Unauthorized("Malformed credentials".into()));
    }

    Ok(state.credentials.authenticate(&token).await?)
}

/// Axum middleware: authenticates the call and injects `AuthenticatedUser`
/// into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = authenticate_request(&state, request.headers()).await?;
    request.extensions_mut().insert(AuthenticatedUser(identity));
    Ok(next.run(request).await)
}

/// Axum middleware layered inside [`require_auth`]: the caller must have a
/// verified email.
pub async fn require_active(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(AuthenticatedUser(identity)) = request.extensions().get::<AuthenticatedUser>() else {
        return Err(AppError::Unauthorized("Authentication required".into()));
    };
    state.credentials.require_active(identity)?;
    Ok(next.run(request).await)
}
