// API crate clippy configuration
#![allow(clippy::result_large_err)] // ApiError carries provider messages
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! VendeAI API Library
//!
//! Identity, entitlement, AI and payment endpoints for the VendeAI mobile app.

pub mod ai;
pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
