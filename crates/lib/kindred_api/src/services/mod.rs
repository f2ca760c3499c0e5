//! Request-independent helpers shared by handlers and guards.

pub mod bearer;
pub mod cookies;
