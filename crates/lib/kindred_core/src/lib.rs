//! # kindred_core
//!
//! Core authentication and session-lifecycle logic for Kindred.
//!
//! Transport-agnostic: token codec, store contracts, the credential service
//! and the verification flows live here; `kindred_api` adapts them to HTTP
//! and realtime connections.

pub mod auth;
pub mod config;
pub mod ids;
pub mod migrate;
pub mod models;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
