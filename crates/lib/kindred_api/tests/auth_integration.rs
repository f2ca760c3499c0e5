//! Integration tests: drive the router with in-memory store and outbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Utc};
use kindred_api::config::ApiConfig;
use kindred_api::middleware::auth::authenticate_request;
use kindred_api::middleware::realtime::{Refusal, admit_connection};
use kindred_api::{AppState, router};
use kindred_core::auth::delivery::MemoryOutbox;
use kindred_core::config::AuthConfig;
use kindred_core::models::auth::{Account, Session, VerificationPurpose, VerificationRecord};
use kindred_core::store::{
    AccountStore, AuthStore, MemoryAuthStore, RedeemEffect, RedeemOutcome, SessionStore,
    StoreResult, VerificationStore,
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    app: Router,
    state: AppState,
    outbox: Arc<MemoryOutbox>,
}

fn test_auth_config() -> AuthConfig {
    AuthConfig {
        bcrypt_cost: 4,
        ..AuthConfig::default()
    }
}

fn test_app_over(store: Arc<dyn AuthStore>, auth: AuthConfig) -> TestApp {
    let outbox = Arc::new(MemoryOutbox::new());
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".into(),
        database_url: None,
        jwt_secret: "test-secret".into(),
        secure_cookies: false,
        auth,
    };
    let state = AppState::new(store, outbox.clone(), config).expect("app state");
    TestApp {
        app: router(state.clone()),
        state,
        outbox,
    }
}

fn test_app() -> TestApp {
    test_app_over(Arc::new(MemoryAuthStore::new()), test_auth_config())
}

/// In-memory store whose session lookups hang once `hang` is set.
#[derive(Default)]
struct HangingStore {
    inner: MemoryAuthStore,
    hang: AtomicBool,
}

#[async_trait::async_trait]
impl AccountStore for HangingStore {
    async fn create_account(&self, email: &str, password_hash: &str) -> StoreResult<Account> {
        self.inner.create_account(email, password_hash).await
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        self.inner.find_account_by_email(email).await
    }

    async fn find_account_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        self.inner.find_account_by_id(id).await
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        self.inner.update_password_hash(id, password_hash).await
    }

    async fn update_email_verified(&self, id: Uuid, verified: bool) -> StoreResult<()> {
        self.inner.update_email_verified(id, verified).await
    }
}

#[async_trait::async_trait]
impl SessionStore for HangingStore {
    async fn create_session(
        &self,
        account_id: Uuid,
        expected_password_hash: &str,
        refresh_token_hash: &str,
    ) -> StoreResult<Option<Session>> {
        self.inner
            .create_session(account_id, expected_password_hash, refresh_token_hash)
            .await
    }

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.inner.find_session(id).await
    }

    async fn find_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> StoreResult<Option<Session>> {
        self.inner.find_session_by_refresh_hash(refresh_token_hash).await
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        current_hash: &str,
        next_hash: &str,
    ) -> StoreResult<bool> {
        self.inner.rotate_refresh_token(id, current_hash, next_hash).await
    }

    async fn invalidate_session(&self, id: Uuid) -> StoreResult<()> {
        self.inner.invalidate_session(id).await
    }

    async fn invalidate_sessions_for_account(&self, account_id: Uuid) -> StoreResult<u64> {
        self.inner.invalidate_sessions_for_account(account_id).await
    }

    async fn list_valid_sessions(&self, account_id: Uuid) -> StoreResult<Vec<Session>> {
        self.inner.list_valid_sessions(account_id).await
    }
}

#[async_trait::async_trait]
impl VerificationStore for HangingStore {
    async fn issue_verification(&self, record: &VerificationRecord) -> StoreResult<()> {
        self.inner.issue_verification(record).await
    }

    async fn find_verification(&self, id: Uuid) -> StoreResult<Option<VerificationRecord>> {
        self.inner.find_verification(id).await
    }

    async fn find_pending_verification(
        &self,
        account_id: Uuid,
        purpose: VerificationPurpose,
    ) -> StoreResult<Option<VerificationRecord>> {
        self.inner.find_pending_verification(account_id, purpose).await
    }
}

#[async_trait::async_trait]
impl AuthStore for HangingStore {
    async fn replace_password_and_revoke_sessions(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> StoreResult<u64> {
        self.inner
            .replace_password_and_revoke_sessions(account_id, password_hash)
            .await
    }

    async fn redeem_verification(
        &self,
        id: Uuid,
        purpose: VerificationPurpose,
        effect: RedeemEffect,
        now: DateTime<Utc>,
    ) -> StoreResult<RedeemOutcome> {
        self.inner.redeem_verification(id, purpose, effect, now).await
    }
}

/// Auth cookies captured from `Set-Cookie` headers.
#[derive(Debug, Clone, Default)]
struct Cookies {
    access: Option<String>,
    refresh: Option<String>,
}

impl Cookies {
    fn from_response(resp: &Response) -> Self {
        let mut cookies = Cookies::default();
        for header in resp.headers().get_all(SET_COOKIE) {
            let Ok(raw) = header.to_str() else { continue };
            let pair = raw.split(';').next().unwrap_or_default();
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let value = (!value.is_empty()).then(|| value.to_string());
            match name {
                "kindred_access" => cookies.access = value,
                "kindred_refresh" => cookies.refresh = value,
                _ => {}
            }
        }
        cookies
    }

    fn header(&self) -> String {
        let mut parts = Vec::new();
        if let Some(a) = &self.access {
            parts.push(format!("kindred_access={a}"));
        }
        if let Some(r) = &self.refresh {
            parts.push(format!("kindred_refresh={r}"));
        }
        parts.join("; ")
    }
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    cookies: Option<&Cookies>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookies) = cookies {
        builder = builder.header(COOKIE, cookies.header());
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .expect("request")
}

async fn json_body(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("parse JSON")
}

async fn register(t: &TestApp, email: &str, password: &str) -> Cookies {
    let resp = send(
        &t.app,
        Method::POST,
        "/api/v1/users",
        None,
        Some(json!({"email": email, "password": password})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    Cookies::from_response(&resp)
}

async fn login(t: &TestApp, email: &str, password: &str) -> Response {
    send(
        &t.app,
        Method::POST,
        "/api/v1/users/login",
        None,
        Some(json!({"email": email, "password": password})),
    )
    .await
}

async fn me(t: &TestApp, cookies: &Cookies) -> Response {
    send(&t.app, Method::GET, "/api/v1/users/me", Some(cookies), None).await
}

fn cookie_headers(cookies: &Cookies) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_str(&cookies.header()).unwrap());
    headers
}

#[tokio::test]
async fn register_signs_in_and_email_verification_unlocks_active_routes() {
    let t = test_app();
    let cookies = register(&t, "a@x.com", "password1").await;
    assert!(cookies.access.is_some());
    assert!(cookies.refresh.is_some());

    let resp = me(&t, &cookies).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["emailVerified"], false);

    let resp = send(&t.app, Method::GET, "/api/v1/users/me/active", Some(&cookies), None).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(resp).await["error"], "email_not_verified");

    let token = t
        .outbox
        .latest("a@x.com", VerificationPurpose::EmailVerification)
        .await
        .expect("verification email sent");
    let uri = format!("/api/v1/users/auth/verify-email/{token}");
    let resp = send(&t.app, Method::PATCH, &uri, None, None).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&t.app, Method::GET, "/api/v1/users/me/active", Some(&cookies), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["emailVerified"], true);

    let resp = send(&t.app, Method::PATCH, &uri, None, None).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let t = test_app();
    register(&t, "a@x.com", "password1").await;
    let resp = send(
        &t.app,
        Method::POST,
        "/api/v1/users",
        None,
        Some(json!({"email": "a@x.com", "password": "password1"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_email_and_wrong_password_look_the_same() {
    let t = test_app();
    register(&t, "a@x.com", "password1").await;

    let unknown = login(&t, "ghost@x.com", "password1").await;
    let wrong = login(&t, "a@x.com", "password2").await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    assert_eq!(unknown.status(), wrong.status());
    assert!(unknown.headers().get(SET_COOKIE).is_none());
    assert!(wrong.headers().get(SET_COOKIE).is_none());
    assert_eq!(json_body(unknown).await, json_body(wrong).await);
}

#[tokio::test]
async fn missing_or_malformed_credentials_are_unauthorized() {
    let t = test_app();
    let resp = send(&t.app, Method::GET, "/api/v1/users/me", None, None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let garbage = Cookies {
        access: Some("not-a-token".into()),
        refresh: None,
    };
    let resp = me(&t, &garbage).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(resp).await["error"], "unauthorized");
}

#[tokio::test]
async fn bearer_header_is_accepted_for_conventional_calls() {
    let t = test_app();
    let cookies = register(&t, "a@x.com", "password1").await;
    let req = Request::builder()
        .uri("/api/v1/users/me")
        .header(
            AUTHORIZATION,
            format!("Bearer {}", cookies.access.as_deref().unwrap()),
        )
        .body(Body::empty())
        .unwrap();
    let resp = t.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn logout_revokes_only_the_calling_session() {
    let t = test_app();
    let first = register(&t, "a@x.com", "password1").await;
    let second = Cookies::from_response(&login(&t, "a@x.com", "password1").await);

    let resp = send(&t.app, Method::DELETE, "/api/v1/sessions", Some(&first), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(Cookies::from_response(&resp).access, None);

    let resp = me(&t, &first).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(resp).await["error"], "forbidden");
    assert_eq!(me(&t, &second).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn sessions_are_listed_and_logout_all_revokes_every_device() {
    let t = test_app();
    let first = register(&t, "a@x.com", "password1").await;
    let second = Cookies::from_response(&login(&t, "a@x.com", "password1").await);

    let resp = send(&t.app, Method::GET, "/api/v1/sessions", Some(&second), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions.iter().filter(|s| s["current"] == true).count(), 1);

    let resp = send(&t.app, Method::DELETE, "/api/v1/sessions/all", Some(&second), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["revokedSessions"], 2);

    for cookies in [&first, &second] {
        assert_eq!(me(&t, cookies).await.status(), StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn change_password_revokes_sessions_and_new_password_works() {
    let t = test_app();
    let cookies = register(&t, "a@x.com", "password1").await;

    let resp = send(
        &t.app,
        Method::PATCH,
        "/api/v1/users/auth/password",
        Some(&cookies),
        Some(json!({"oldPassword": "wrong", "newPassword": "password2"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["error"], "invalid_credentials");

    let resp = send(
        &t.app,
        Method::PATCH,
        "/api/v1/users/auth/password",
        Some(&cookies),
        Some(json!({"oldPassword": "password1", "newPassword": "password2"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["revokedSessions"], 1);

    assert_eq!(me(&t, &cookies).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        login(&t, "a@x.com", "password1").await.status(),
        StatusCode::BAD_REQUEST
    );
    let fresh = Cookies::from_response(&login(&t, "a@x.com", "password2").await);
    assert_eq!(me(&t, &fresh).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_rotates_cookies_once() {
    let t = test_app();
    let cookies = register(&t, "a@x.com", "password1").await;
    let only_refresh = Cookies {
        access: None,
        refresh: cookies.refresh.clone(),
    };

    let resp = send(
        &t.app,
        Method::POST,
        "/api/v1/users/auth/refresh",
        Some(&only_refresh),
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let rotated = Cookies::from_response(&resp);
    assert_ne!(rotated.refresh, cookies.refresh);
    assert_eq!(me(&t, &rotated).await.status(), StatusCode::OK);

    let resp = send(
        &t.app,
        Method::POST,
        "/api/v1/users/auth/refresh",
        Some(&only_refresh),
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = send(&t.app, Method::POST, "/api/v1/users/auth/refresh", None, None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn resend_supersedes_previous_verification_email() {
    let t = test_app();
    let cookies = register(&t, "a@x.com", "password1").await;
    let first = t
        .outbox
        .latest("a@x.com", VerificationPurpose::EmailVerification)
        .await
        .unwrap();

    let resp = send(
        &t.app,
        Method::POST,
        "/api/v1/users/auth/resend-verification-email",
        Some(&cookies),
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let second = t
        .outbox
        .latest("a@x.com", VerificationPurpose::EmailVerification)
        .await
        .unwrap();
    assert_ne!(first, second);

    let resp = send(
        &t.app,
        Method::PATCH,
        &format!("/api/v1/users/auth/verify-email/{first}"),
        None,
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let resp = send(
        &t.app,
        Method::PATCH,
        &format!("/api/v1/users/auth/verify-email/{second}"),
        None,
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    // Nothing pending any more.
    let resp = send(
        &t.app,
        Method::POST,
        "/api/v1/users/auth/resend-verification-email",
        Some(&cookies),
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_verification_link_is_forbidden() {
    let t = test_app();
    let resp = send(
        &t.app,
        Method::PATCH,
        "/api/v1/users/auth/verify-email/123",
        None,
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn password_reset_flow() {
    let t = test_app();
    let cookies = register(&t, "a@x.com", "password1").await;

    let resp = send(
        &t.app,
        Method::POST,
        "/api/v1/users/auth/reset-password",
        None,
        Some(json!({"email": "ghost@x.com"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = send(
        &t.app,
        Method::POST,
        "/api/v1/users/auth/reset-password",
        None,
        Some(json!({"email": "a@x.com"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = t
        .outbox
        .latest("a@x.com", VerificationPurpose::PasswordReset)
        .await
        .unwrap();

    let resp = send(
        &t.app,
        Method::POST,
        &format!("/api/v1/users/auth/verify-link/{token}"),
        None,
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let set_uri = format!("/api/v1/users/auth/set-new-password/{token}");
    let resp = send(
        &t.app,
        Method::PATCH,
        &set_uri,
        None,
        Some(json!({"password": "brand-new-password"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["revokedSessions"], 1);

    assert_eq!(me(&t, &cookies).await.status(), StatusCode::FORBIDDEN);
    let resp = send(
        &t.app,
        Method::PATCH,
        &set_uri,
        None,
        Some(json!({"password": "another-password"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(
        login(&t, "a@x.com", "brand-new-password").await.status(),
        StatusCode::OK
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_verification_requests_have_one_winner() {
    let t = test_app();
    register(&t, "a@x.com", "password1").await;
    let token = t
        .outbox
        .latest("a@x.com", VerificationPurpose::EmailVerification)
        .await
        .unwrap();
    let uri = format!("/api/v1/users/auth/verify-email/{token}");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let app = t.app.clone();
        let uri = uri.clone();
        handles.push(tokio::spawn(async move {
            send(&app, Method::PATCH, &uri, None, None).await.status()
        }));
    }
    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.unwrap());
    }
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == StatusCode::CONFLICT)
            .count(),
        9
    );
}

#[tokio::test]
async fn both_guards_resolve_the_same_identity() {
    let t = test_app();
    let cookies = register(&t, "a@x.com", "password1").await;
    let headers = cookie_headers(&cookies);

    let conventional = authenticate_request(&t.state, &headers).await.unwrap();
    let realtime = admit_connection(&t.state, &headers).await.unwrap();
    assert_eq!(conventional, realtime);

    let resp = me(&t, &cookies).await;
    let body = json_body(resp).await;
    assert_eq!(body["accountId"], realtime.account_id.to_string());
    assert_eq!(body["sessionId"], realtime.session_id.to_string());
    assert_eq!(body["emailVerified"], realtime.email_verified);
}

#[tokio::test]
async fn realtime_guard_refuses_revoked_and_missing_credentials() {
    let t = test_app();
    let cookies = register(&t, "a@x.com", "password1").await;

    assert_eq!(
        admit_connection(&t.state, &HeaderMap::new()).await.unwrap_err(),
        Refusal::Forbidden
    );

    // Only the handshake cookie counts; a bearer header is ignored.
    let mut bearer = HeaderMap::new();
    bearer.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cookies.access.as_deref().unwrap())).unwrap(),
    );
    assert_eq!(
        admit_connection(&t.state, &bearer).await.unwrap_err(),
        Refusal::Forbidden
    );

    send(&t.app, Method::DELETE, "/api/v1/sessions", Some(&cookies), None).await;
    assert_eq!(
        admit_connection(&t.state, &cookie_headers(&cookies))
            .await
            .unwrap_err(),
        Refusal::Forbidden
    );
}

#[tokio::test]
async fn websocket_handshake_without_cookie_is_refused() {
    let t = test_app();
    let req = Request::builder()
        .uri("/api/v1/ws")
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap();
    let resp = t.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"forbidden");
}

#[tokio::test]
async fn hung_store_is_a_service_fault_on_both_guards() {
    let store = Arc::new(HangingStore::default());
    let t = test_app_over(
        store.clone(),
        AuthConfig {
            store_timeout: Duration::from_millis(50),
            ..test_auth_config()
        },
    );
    let cookies = register(&t, "a@x.com", "password1").await;
    store.hang.store(true, Ordering::SeqCst);

    let resp = me(&t, &cookies).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(resp).await["error"], "store_unavailable");

    assert_eq!(
        admit_connection(&t.state, &cookie_headers(&cookies))
            .await
            .unwrap_err(),
        Refusal::Unavailable
    );

    let req = Request::builder()
        .uri("/api/v1/ws")
        .header(COOKIE, cookies.header())
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap();
    let resp = t.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}
