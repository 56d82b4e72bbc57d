//! API types shared between the gateway client and the live channel

pub mod auth;
pub mod types;

pub use auth::AuthState;
