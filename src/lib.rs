//! API gateway control plane.
//!
//! A composable request pipeline: policy resolution by URL pattern,
//! credential verification (bearer JWT or opaque API key, with a
//! positive-result cache), distributed token-bucket rate limiting, a
//! circuit breaker over the shared store, and audit/metrics taps.

pub mod audit;
pub mod auth;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod keys;
pub mod limiter;
pub mod metrics;
pub mod policy;
pub mod repository;
pub mod routes;
pub mod utils;

pub use config::Config;
pub use context::AppContext;
pub use error::{AppError, AppResult};
