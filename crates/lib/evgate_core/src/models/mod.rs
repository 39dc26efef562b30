//! Domain models shared across the gateway crates.

pub mod auth;
