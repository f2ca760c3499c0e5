//! Request handlers.

pub mod auth;
pub mod realtime;
pub mod sessions;
pub mod verification;
