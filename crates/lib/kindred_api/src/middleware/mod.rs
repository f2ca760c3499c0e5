//! Transport guards.
//!
//! Both adapt [`kindred_core::auth::CredentialService::authenticate`]; they
//! differ only in where the credential comes from and how a rejection is
//! signalled.

pub mod auth;
pub mod realtime;
