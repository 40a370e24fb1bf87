//! Bulwark - a resilient client-side gateway for a single upstream HTTP service.
//!
//! Every outbound call goes through one pipeline that adds the things a flaky backend
//! needs from its callers: bounded retries with exponential backoff, a circuit breaker
//! that fails fast while the upstream is down, per-attempt timeouts, bearer token
//! injection and a bounded in-memory log of recent requests that feeds a health verdict.
//!
//! # Features
//! - Typed verbs (`get`, `post`, `put`, `patch`, `delete`) with JSON, raw and multipart bodies
//! - Retries on 408/429/5xx and timeouts only, `base * 2^(n-1)` backoff with optional jitter
//! - Three-state circuit breaker (closed, open, half-open) shared by every caller
//! - Rolling metrics log and a periodic upstream probe combined into a health status
//! - Structured tracing via `tracing` and telemetry through the `metrics` facade
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use bulwark::{Gateway, ReqwestTransport, SessionSlot};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = bulwark::config::load_config("bulwark.yaml").await?;
//! let session = Arc::new(SessionSlot::new());
//! let gateway = Gateway::builder(config, Arc::new(ReqwestTransport::new()?))
//!     .token_source(session.clone())
//!     .build()?;
//!
//! session.store(r#"{"user": {"access_token": "my-token"}}"#);
//! let flows: serde_json::Value = gateway.get("/api/v1/flows", None).await?;
//! println!("{flows} ({})", gateway.circuit_breaker_state());
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! business logic inside `core`. The upstream is reached only through the
//! [`Transport`] port, so tests drive the whole pipeline with [`ScriptedTransport`].
//!
//! # Error Handling
//! Gateway operations return [`GatewayResult<T>`]; every [`GatewayError`] carries a short
//! `user_message()` for display. Start-up helpers (config loading, tracing) return
//! `eyre::Result<T>` with context attached using `WrapErr`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{
        NoToken, ReqwestTransport, ScriptedReply, ScriptedTransport, SessionSlot, StaticToken,
    },
    config::GatewayConfig,
    core::{
        CircuitState, FormPart, Gateway, GatewayBuilder, GatewayError, GatewayRequest,
        GatewayResponse, GatewayResult, HealthLevel, HealthStatus, HttpMethod, RequestBody,
        RequestMetric, RequestOptions,
    },
    ports::{token_source::TokenSource, transport::Transport},
};
