//! Route paths.

pub const POST_USERS: &str = "/api/v1/users";
pub const POST_USERS_LOGIN: &str = "/api/v1/users/login";
pub const POST_USERS_AUTH_REFRESH: &str = "/api/v1/users/auth/refresh";
pub const GET_USERS_ME: &str = "/api/v1/users/me";
pub const GET_USERS_ME_ACTIVE: &str = "/api/v1/users/me/active";
pub const PATCH_USERS_AUTH_PASSWORD: &str = "/api/v1/users/auth/password";
pub const POST_USERS_AUTH_RESEND_VERIFICATION_EMAIL: &str =
    "/api/v1/users/auth/resend-verification-email";
pub const PATCH_USERS_AUTH_VERIFY_EMAIL_TOKEN: &str = "/api/v1/users/auth/verify-email/{token}";
pub const POST_USERS_AUTH_RESET_PASSWORD: &str = "/api/v1/users/auth/reset-password";
pub const POST_USERS_AUTH_VERIFY_LINK_TOKEN: &str = "/api/v1/users/auth/verify-link/{token}";
pub const PATCH_USERS_AUTH_SET_NEW_PASSWORD_TOKEN: &str =
    "/api/v1/users/auth/set-new-password/{token}";
pub const SESSIONS: &str = "/api/v1/sessions";
pub const DELETE_SESSIONS_ALL: &str = "/api/v1/sessions/all";
pub const GET_WS: &str = "/api/v1/ws";
