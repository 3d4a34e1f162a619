//! Core logic for grokgate: an OpenAI-compatible chat gateway backed by
//! browser-session credentials with per-model usage quotas.
//!
//! The library is split along the request path:
//! - [`pool`] — credential pool with quota bookkeeping and recovery
//! - [`transcript`] — OpenAI message list → upstream transcript payload
//! - [`stream`] — upstream event stream → OpenAI deltas / final message
//! - [`upstream`] — HTTP client for the upstream service and image hosts
//! - [`dispatch`] — per-request failover loop tying the above together

pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod pool;
pub mod protocol;
pub mod stream;
pub mod transcript;
pub mod upstream;

pub use error::{AppError, AppResult};
