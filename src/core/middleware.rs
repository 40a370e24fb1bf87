//! Per-attempt middleware chain.
//!
//! Each stage receives the attempt and a [`Next`] handle to the rest of the chain. A
//! stage may observe the outcome (metrics), short-circuit without calling `next`
//! (circuit gate) or rewrite the attempt before passing it on (auth injection). The
//! end of the chain dispatches over the transport under the per-attempt timeout.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use http::{HeaderMap, HeaderValue, header::AUTHORIZATION};

use crate::{
    core::{
        circuit_breaker::CircuitBreaker,
        metrics_log::{MetricsRecorder, RequestMetric},
        request::GatewayResponse,
    },
    metrics::{AttemptTimer, increment_circuit_rejections, increment_upstream_request_total},
    ports::{
        token_source::TokenSource,
        transport::{OutgoingRequest, Transport, TransportError},
    },
};

/// One network attempt of a logical request.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based attempt number within the logical request.
    pub number: u32,
    /// Endpoint as given by the caller, used for metrics labels.
    pub endpoint: String,
    pub request: OutgoingRequest,
}

#[derive(Debug, Clone)]
pub enum AttemptError {
    /// The circuit breaker refused the attempt; nothing was sent.
    Rejected { retry_after: Option<Duration> },
    /// No response was obtained.
    Transport(TransportError),
}

pub type AttemptResult = Result<GatewayResponse, AttemptError>;

#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, attempt: Attempt, next: Next<'_>) -> AttemptResult;
}

/// The remainder of the chain.
pub struct Next<'a> {
    stack: &'a [Arc<dyn Middleware>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub fn new(stack: &'a [Arc<dyn Middleware>], transport: &'a dyn Transport) -> Self {
        Self { stack, transport }
    }

    pub fn run(self, attempt: Attempt) -> BoxFuture<'a, AttemptResult> {
        match self.stack.split_first() {
            Some((stage, rest)) => stage.handle(
                attempt,
                Next {
                    stack: rest,
                    transport: self.transport,
                },
            ),
            None => {
                let transport = self.transport;
                Box::pin(async move {
                    let timeout = attempt.request.timeout;
                    match tokio::time::timeout(timeout, transport.send(attempt.request)).await {
                        Ok(result) => result.map_err(AttemptError::Transport),
                        Err(_) => Err(AttemptError::Transport(TransportError::Timeout(timeout))),
                    }
                })
            }
        }
    }
}

/// Records one [`RequestMetric`] per completed attempt and a marker per rejection.
pub struct MetricsObserver {
    recorder: Arc<MetricsRecorder>,
    enabled: bool,
}

impl MetricsObserver {
    pub fn new(recorder: Arc<MetricsRecorder>, enabled: bool) -> Self {
        Self { recorder, enabled }
    }
}

#[async_trait]
impl Middleware for MetricsObserver {
    async fn handle(&self, attempt: Attempt, next: Next<'_>) -> AttemptResult {
        let endpoint = attempt.endpoint.clone();
        let method = attempt.request.method;
        let timer = AttemptTimer::new(&endpoint, method);

        let result = next.run(attempt).await;

        let status = match &result {
            Ok(response) => Some(response.status.as_u16()),
            Err(AttemptError::Transport(TransportError::InvalidRequest(_))) => None,
            Err(AttemptError::Transport(_)) => Some(0),
            Err(AttemptError::Rejected { .. }) => None,
        };

        match status {
            Some(status) => {
                let metric = RequestMetric::new(endpoint, method, timer.elapsed(), status);
                increment_upstream_request_total(&metric.endpoint, method, status, metric.success);
                if self.enabled {
                    self.recorder.record(metric);
                }
            }
            None => {
                timer.discard();
                if matches!(result, Err(AttemptError::Rejected { .. })) {
                    increment_circuit_rejections();
                    if self.enabled {
                        self.recorder.record(RequestMetric::rejected(endpoint, method));
                    }
                }
            }
        }
        result
    }
}

/// Refuses attempts while the circuit is open and reports every real outcome.
pub struct CircuitGate {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitGate {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl Middleware for CircuitGate {
    async fn handle(&self, attempt: Attempt, next: Next<'_>) -> AttemptResult {
        let permit = match self.breaker.acquire() {
            Ok(permit) => permit,
            Err(retry_after) => return Err(AttemptError::Rejected { retry_after }),
        };

        let result = next.run(attempt).await;
        match &result {
            Ok(response) if response.is_success() => permit.success(),
            Ok(_) => permit.failure(),
            // Never sent, so it says nothing about the upstream.
            Err(AttemptError::Transport(TransportError::InvalidRequest(_))) => drop(permit),
            Err(AttemptError::Transport(_)) => permit.failure(),
            Err(AttemptError::Rejected { .. }) => drop(permit),
        }
        result
    }
}

/// Attaches `Authorization: Bearer <token>` when the session has a token.
pub struct AuthInjection {
    tokens: Arc<dyn TokenSource>,
}

impl AuthInjection {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self { tokens }
    }

    pub fn attach(&self, mut headers: HeaderMap) -> HeaderMap {
        let Some(token) = self.tokens.access_token() else {
            return headers;
        };

        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!("Ignoring access token that is not a valid header value"),
        }
        headers
    }
}

#[async_trait]
impl Middleware for AuthInjection {
    async fn handle(&self, mut attempt: Attempt, next: Next<'_>) -> AttemptResult {
        attempt.request.headers = self.attach(std::mem::take(&mut attempt.request.headers));
        next.run(attempt).await
    }
}
