//! Realtime guard: one admission decision per connection, at handshake.
//!
//! Only the handshake `Cookie` header is consulted. Once admitted, the
//! identity is fixed for the connection lifetime; messages are not
//! re-authenticated.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use kindred_core::models::auth::Identity;
use tracing::{debug, error};

use super::auth::AuthenticatedUser;
use crate::AppState;
use crate::services::bearer::{cookie_credential, is_well_formed};

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Any authentication decision against the caller.
    Forbidden,
    /// The store could not answer; the connection is still refused.
    Unavailable,
}

impl IntoResponse for Refusal {
    fn into_response(self) -> Response {
        match self {
            Refusal::Forbidden => (StatusCode::FORBIDDEN, "forbidden").into_response(),
            Refusal::Unavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response()
            }
        }
    }
}

/// Decide whether a realtime handshake may proceed.
pub async fn admit_connection(state: &AppState, headers: &HeaderMap) -> Result<Identity, Refusal> {
    let Some(token) = cookie_credential(headers) else {
        debug!("realtime handshake without access cookie");
        return Err(Refusal::Forbidden);
    };
    if !is_well_formed(&token) {
        debug!("realtime handshake with malformed access cookie");
        return Err(Refusal::Forbidden);
    }

    match state.credentials.authenticate(&token).await {
        Ok(identity) => {
            debug!(
                account_id = %identity.account_id,
                session_id = %identity.session_id,
                "realtime connection admitted"
            );
            Ok(identity)
        }
        Err(e) if e.is_fault() => {
            error!(error = %e, "realtime admission failed on store fault");
            Err(Refusal::Unavailable)
        }
        Err(e) => {
            debug!(reason = %e, "realtime connection refused");
            Err(Refusal::Forbidden)
        }
    }
}

/// Axum middleware for handshake routes.
pub async fn require_handshake(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Refusal> {
    let identity = admit_connection(&state, request.headers()).await?;
    request.extensions_mut().insert(AuthenticatedUser(identity));
    Ok(next.run(request).await)
}
