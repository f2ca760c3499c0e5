//! # kindred_api
//!
//! HTTP and realtime API library for Kindred.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post};
use kindred_core::auth::delivery::TokenDelivery;
use kindred_core::auth::{AuthError, CredentialService, TokenCodec, VerificationService};
use kindred_core::store::AuthStore;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::handlers::{auth, realtime, sessions, verification};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialService,
    pub verification: VerificationService,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    /// Wire the auth services over `store`, signing with `config.jwt_secret`.
    pub fn new(
        store: Arc<dyn AuthStore>,
        delivery: Arc<dyn TokenDelivery>,
        config: ApiConfig,
    ) -> Result<Self, AuthError> {
        let codec = TokenCodec::new(config.jwt_secret.as_bytes());
        let credentials = CredentialService::new(store, codec, config.auth.clone())?;
        let verification = VerificationService::new(credentials.clone(), delivery);
        Ok(Self {
            credentials,
            verification,
            config,
        })
    }
}

/// Run embedded database migrations.
///
/// Delegates to `kindred_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    kindred_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::POST_USERS, post(auth::register_handler))
        .route(routes::POST_USERS_LOGIN, post(auth::login_handler))
        .route(routes::POST_USERS_AUTH_REFRESH, post(auth::refresh_handler))
        .route(
            routes::PATCH_USERS_AUTH_VERIFY_EMAIL_TOKEN,
            patch(verification::verify_email_handler),
        )
        .route(
            routes::POST_USERS_AUTH_RESET_PASSWORD,
            post(verification::reset_password_handler),
        )
        .route(
            routes::POST_USERS_AUTH_VERIFY_LINK_TOKEN,
            post(verification::verify_link_handler),
        )
        .route(
            routes::PATCH_USERS_AUTH_SET_NEW_PASSWORD_TOKEN,
            patch(verification::set_new_password_handler),
        );

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::GET_USERS_ME, get(auth::me_handler))
        .route(
            routes::PATCH_USERS_AUTH_PASSWORD,
            patch(auth::change_password_handler),
        )
        .route(
            routes::POST_USERS_AUTH_RESEND_VERIFICATION_EMAIL,
            post(verification::resend_verification_handler),
        )
        .route(
            routes::SESSIONS,
            get(sessions::list_sessions_handler).delete(sessions::logout_handler),
        )
        .route(
            routes::DELETE_SESSIONS_ALL,
            delete(sessions::logout_all_handler),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    // Verified-email routes: require_auth runs first, then require_active.
    let active = Router::new()
        .route(routes::GET_USERS_ME_ACTIVE, get(auth::me_handler))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_active,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    // Realtime: one admission decision at handshake
    let realtime = Router::new()
        .route(routes::GET_WS, get(realtime::ws_handler))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::realtime::require_handshake,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(active)
        .merge(realtime)
        .layer(cors)
        .with_state(state)
}
