//! Request handlers for the gateway's local services.

pub mod admin;
pub mod auth;
pub mod health;
