//! Cookie service: build and clear httpOnly auth cookies.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use kindred_core::config::AuthConfig;
use kindred_core::models::auth::TokenPair;
use time::Duration;

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "kindred_access";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "kindred_refresh";
/// The refresh cookie is only sent back to the API.
pub const REFRESH_COOKIE_PATH: &str = "/api/v1";

fn build(
    name: &'static str,
    value: String,
    path: &'static str,
    secure: bool,
    max_age: Duration,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(path)
        .max_age(max_age)
        .build()
}

fn seconds(ttl: std::time::Duration) -> Duration {
    Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
}

/// Build a httpOnly cookie for the access token.
pub fn access_cookie(token: &str, config: &AuthConfig, secure: bool) -> Cookie<'static> {
    build(ACCESS_COOKIE, token.to_string(), "/", secure, seconds(config.access_token_ttl))
}

/// Build a httpOnly cookie for the refresh token.
pub fn refresh_cookie(token: &str, config: &AuthConfig, secure: bool) -> Cookie<'static> {
    build(
        REFRESH_COOKIE,
        token.to_string(),
        REFRESH_COOKIE_PATH,
        secure,
        seconds(config.refresh_token_ttl),
    )
}

/// Add both token cookies to `jar`.
pub fn with_tokens(
    jar: CookieJar,
    tokens: &TokenPair,
    config: &AuthConfig,
    secure: bool,
) -> CookieJar {
    jar.add(access_cookie(&tokens.access_token, config, secure))
        .add(refresh_cookie(&tokens.refresh_token, config, secure))
}

/// Expire both auth cookies.
pub fn cleared(jar: CookieJar, secure: bool) -> CookieJar {
    let refresh = build(
        REFRESH_COOKIE,
        String::new(),
        REFRESH_COOKIE_PATH,
        secure,
        Duration::ZERO,
    );
    jar.add(build(ACCESS_COOKIE, String::new(), "/", secure, Duration::ZERO))
        .add(refresh)
}
