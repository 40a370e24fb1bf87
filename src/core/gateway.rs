//! Public gateway facade.
//!
//! A [`Gateway`] owns the shared resilience state (circuit breaker, metrics log, health
//! snapshot) and the request pipeline. Build it once at start-up and hand it out as
//! `Arc<Gateway>`; every clone of the handle sees the same breaker and metrics.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bulwark::{Gateway, GatewayConfig, ReqwestTransport};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = GatewayConfig::builder()
//!     .base_url("https://api.example.test")
//!     .build()
//!     .map_err(|e| eyre::eyre!(e))?;
//! let gateway = Gateway::builder(config, Arc::new(ReqwestTransport::new()?)).build()?;
//!
//! let flows: serde_json::Value = gateway.get("/api/v1/flows", None).await?;
//! println!("{flows}");
//! # Ok(()) }
//! ```
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{
    config::{GatewayConfig, GatewayConfigValidator},
    core::{
        circuit_breaker::{CircuitBreaker, CircuitState},
        error::GatewayResult,
        health::{HealthMonitor, HealthStatus},
        metrics_log::{MetricsRecorder, RequestMetric},
        middleware::Middleware,
        pipeline::RequestPipeline,
        request::{GatewayRequest, GatewayResponse, HttpMethod, RequestBody, RequestOptions},
    },
    ports::{token_source::TokenSource, transport::Transport},
};

pub struct Gateway {
    config: GatewayConfig,
    pipeline: RequestPipeline,
    breaker: Arc<CircuitBreaker>,
    recorder: Arc<MetricsRecorder>,
    health: Arc<HealthMonitor>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn builder(config: GatewayConfig, transport: Arc<dyn Transport>) -> GatewayBuilder {
        GatewayBuilder {
            config,
            transport,
            tokens: Arc::new(|| None::<String>),
            middleware: Vec::new(),
        }
    }

    /// An unauthenticated gateway with the standard middleware chain.
    pub fn new(config: GatewayConfig, transport: Arc<dyn Transport>) -> GatewayResult<Self> {
        Self::builder(config, transport).build()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Send a request and return the raw response (status, headers, bytes).
    pub async fn send(&self, request: GatewayRequest) -> GatewayResult<GatewayResponse> {
        self.pipeline.execute(request).await
    }

    /// Send a request and decode the JSON response body.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<RequestBody>,
        options: Option<RequestOptions>,
    ) -> GatewayResult<T> {
        let request = GatewayRequest::new(method, path)
            .with_body(body)
            .with_options(options.unwrap_or_default());
        self.send(request).await?.json()
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: Option<RequestOptions>,
    ) -> GatewayResult<T> {
        self.request(HttpMethod::Get, path, None, options).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<RequestBody>,
        options: Option<RequestOptions>,
    ) -> GatewayResult<T> {
        self.request(HttpMethod::Post, path, body, options).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<RequestBody>,
        options: Option<RequestOptions>,
    ) -> GatewayResult<T> {
        self.request(HttpMethod::Put, path, body, options).await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<RequestBody>,
        options: Option<RequestOptions>,
    ) -> GatewayResult<T> {
        self.request(HttpMethod::Patch, path, body, options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: Option<RequestOptions>,
    ) -> GatewayResult<T> {
        self.request(HttpMethod::Delete, path, None, options).await
    }

    /// Current health verdict, with the gateway facet recomputed from recent metrics.
    pub fn health_status(&self) -> HealthStatus {
        self.health.refresh()
    }

    pub fn metrics(&self) -> Vec<RequestMetric> {
        self.recorder.all()
    }

    pub fn clear_metrics(&self) {
        self.recorder.clear();
    }

    pub fn circuit_breaker_state(&self) -> CircuitState {
        self.breaker.current_state()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    /// The monitor, for probing on demand or spawning the periodic loop.
    pub fn health_monitor(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }
}

pub struct GatewayBuilder {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl GatewayBuilder {
    /// Where bearer tokens come from.
    pub fn token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Append a stage after the built-in ones, just before the transport.
    pub fn middleware(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.middleware.push(stage);
        self
    }

    pub fn build(self) -> GatewayResult<Gateway> {
        GatewayConfigValidator::validate(&self.config)?;

        let breaker = Arc::new(CircuitBreaker::new(&self.config.circuit_breaker));
        let recorder = Arc::new(MetricsRecorder::new(self.config.metrics_capacity));
        let health = Arc::new(HealthMonitor::new(
            self.transport.clone(),
            recorder.clone(),
            self.config.base_url.clone(),
            self.config.health_check.clone(),
        ));
        let pipeline = RequestPipeline::new(
            &self.config,
            self.transport,
            breaker.clone(),
            recorder.clone(),
            self.tokens,
            self.middleware,
        )?;

        tracing::debug!(
            "Gateway ready for {} (attempts: {}, timeout: {}ms)",
            self.config.base_url,
            self.config.retry_attempts,
            self.config.timeout_ms
        );

        Ok(Gateway {
            config: self.config,
            pipeline,
            breaker,
            recorder,
            health,
        })
    }
}
