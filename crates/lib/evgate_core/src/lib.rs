//! # evgate_core
//!
//! Token lifecycle and identity core for the evgate API gateway.

pub mod auth;
pub mod migrate;
pub mod models;
pub mod store;
pub mod users;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
