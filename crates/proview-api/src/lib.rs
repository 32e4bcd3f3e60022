//! ProView API crate - thin axum transport over the coaching core.
//!
//! Adds API-key authentication and per-client rate limiting, then maps
//! each endpoint onto one core operation.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
