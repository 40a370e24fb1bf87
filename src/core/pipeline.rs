//! Orchestrates one logical request: the middleware chain per attempt, then the retry
//! loop around it.
use std::{sync::Arc, time::Duration};

use chrono::Utc;
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::{
    config::GatewayConfig,
    core::{
        circuit_breaker::{CircuitBreaker, CircuitState},
        error::{AttemptFailure, FailureCause, GatewayError, GatewayResult},
        metrics_log::MetricsRecorder,
        middleware::{
            Attempt, AttemptError, AuthInjection, CircuitGate, MetricsObserver, Middleware, Next,
        },
        request::{GatewayRequest, GatewayResponse, join_endpoint},
        retry::RetryPolicy,
    },
    metrics::increment_retries,
    ports::{
        token_source::TokenSource,
        transport::{OutgoingRequest, Transport, TransportError},
    },
    tracing_setup::{create_attempt_span, create_request_span},
};

/// State carried across the attempts of one logical request.
struct RetryContext {
    attempt: u32,
    request: GatewayRequest,
    url: Url,
    headers: HeaderMap,
    failures: Vec<AttemptFailure>,
}

impl RetryContext {
    fn next_attempt(&mut self, timeout: Duration) -> Attempt {
        self.attempt += 1;
        Attempt {
            number: self.attempt,
            endpoint: self.request.endpoint.clone(),
            request: OutgoingRequest {
                method: self.request.method,
                url: self.url.clone(),
                headers: self.headers.clone(),
                body: self.request.body.clone(),
                timeout,
            },
        }
    }
}

pub struct RequestPipeline {
    base_url: String,
    default_headers: HeaderMap,
    timeout: Duration,
    enable_logging: bool,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    stack: Vec<Arc<dyn Middleware>>,
    transport: Arc<dyn Transport>,
}

impl RequestPipeline {
    /// Build the pipeline with the standard chain:
    /// metrics observation, circuit gate, auth injection, then `extra` stages.
    pub fn new(
        config: &GatewayConfig,
        transport: Arc<dyn Transport>,
        breaker: Arc<CircuitBreaker>,
        recorder: Arc<MetricsRecorder>,
        tokens: Arc<dyn TokenSource>,
        extra: Vec<Arc<dyn Middleware>>,
    ) -> GatewayResult<Self> {
        let mut stack: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(MetricsObserver::new(recorder, config.enable_metrics)),
            Arc::new(CircuitGate::new(breaker.clone())),
            Arc::new(AuthInjection::new(tokens)),
        ];
        stack.extend(extra);

        Ok(Self {
            base_url: config.base_url.clone(),
            default_headers: parse_default_headers(config)?,
            timeout: config.timeout(),
            enable_logging: config.enable_logging,
            retry: RetryPolicy::from_config(config),
            breaker,
            stack,
            transport,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run a logical request to completion.
    pub async fn execute(&self, request: GatewayRequest) -> GatewayResult<GatewayResponse> {
        let request_id = Uuid::new_v4().to_string();
        let span = create_request_span(request.method.as_str(), &request.endpoint, &request_id);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: GatewayRequest) -> GatewayResult<GatewayResponse> {
        let url = join_endpoint(&self.base_url, &request.endpoint)?;
        let mut headers = self.default_headers.clone();
        headers.extend(request.headers.clone());

        let mut ctx = RetryContext {
            attempt: 0,
            request,
            url,
            headers,
            failures: Vec::new(),
        };

        loop {
            let attempt = ctx.next_attempt(self.timeout);
            let number = attempt.number;
            let span = create_attempt_span(number, ctx.url.as_str());
            let result = Next::new(&self.stack, self.transport.as_ref())
                .run(attempt)
                .instrument(span)
                .await;

            let cause = match result {
                Ok(response) if response.is_success() => {
                    let current = tracing::Span::current();
                    current.record("http.status_code", response.status.as_u16());
                    current.record("attempts", number);
                    if self.enable_logging {
                        tracing::info!(
                            "{} {} -> {} (attempt {})",
                            ctx.request.method,
                            ctx.request.endpoint,
                            response.status.as_u16(),
                            number
                        );
                    }
                    return Ok(response);
                }
                Ok(response) => FailureCause::Status {
                    status: response.status,
                    body: response.body,
                },
                Err(AttemptError::Rejected { retry_after }) => {
                    tracing::warn!(
                        "{} {} rejected: circuit breaker is open",
                        ctx.request.method,
                        ctx.request.endpoint
                    );
                    return Err(GatewayError::CircuitOpen {
                        retry_after,
                        failures: ctx.failures,
                    });
                }
                Err(AttemptError::Transport(TransportError::InvalidRequest(message))) => {
                    return Err(GatewayError::InvalidRequest(message));
                }
                Err(AttemptError::Transport(err)) => FailureCause::Transport {
                    kind: err.kind(),
                    message: err.to_string(),
                },
            };

            let status = cause.status();
            let kind = cause.transport_kind();
            let failure = AttemptFailure {
                attempt: number,
                at: Utc::now(),
                cause,
            };

            if self.retry.should_retry(number, status, kind)
                && self.breaker.current_state() == CircuitState::Open
            {
                tracing::warn!(
                    "{} {} opened the circuit on attempt {} ({}), not retrying",
                    ctx.request.method,
                    ctx.request.endpoint,
                    number,
                    failure.cause
                );
                ctx.failures.push(failure);
                return Err(GatewayError::CircuitOpen {
                    retry_after: self.breaker.retry_after(),
                    failures: ctx.failures,
                });
            }

            if self.retry.should_retry(number, status, kind) {
                let delay = self.retry.backoff_delay(number);
                if self.enable_logging {
                    tracing::info!(
                        "{} {} attempt {}/{} failed ({}), retrying in {:?}",
                        ctx.request.method,
                        ctx.request.endpoint,
                        number,
                        self.retry.max_attempts(),
                        failure.cause,
                        delay
                    );
                }
                increment_retries(&ctx.request.endpoint, ctx.request.method);
                ctx.failures.push(failure);
                tokio::time::sleep(delay).await;
                continue;
            }

            let current = tracing::Span::current();
            current.record("attempts", number);
            if let Some(status) = status {
                current.record("http.status_code", status);
            }

            let circuit_state = self.breaker.current_state();
            if RetryPolicy::is_retryable(status, kind) {
                tracing::warn!(
                    "{} {} failed after {} attempts ({}), circuit {}",
                    ctx.request.method,
                    ctx.request.endpoint,
                    number,
                    failure.cause,
                    circuit_state
                );
                ctx.failures.push(failure);
                return Err(GatewayError::ExhaustedRetries {
                    attempts: number,
                    failures: ctx.failures,
                    circuit_state,
                    at: Utc::now(),
                });
            }

            if self.enable_logging {
                tracing::info!(
                    "{} {} failed without retry: {}",
                    ctx.request.method,
                    ctx.request.endpoint,
                    failure.cause
                );
            }
            return Err(GatewayError::from_failure(failure, circuit_state));
        }
    }
}

fn parse_default_headers(config: &GatewayConfig) -> GatewayResult<HeaderMap> {
    // Names differing only in case collapse onto one header; keep the winner stable.
    let mut entries: Vec<_> = config.default_headers.iter().collect();
    entries.sort();

    let mut headers = HeaderMap::with_capacity(entries.len());
    for (name, value) in entries {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| GatewayError::InvalidRequest(format!("Invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            GatewayError::InvalidRequest(format!("Invalid value for header {name}: {e}"))
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use http::{StatusCode, header::USER_AGENT};

    use super::*;
    use crate::{
        adapters::{
            scripted::{ScriptedReply, ScriptedTransport},
            session::NoToken,
        },
        core::request::HttpMethod,
        ports::transport::TransportErrorKind,
    };

    struct Fixture {
        pipeline: RequestPipeline,
        transport: Arc<ScriptedTransport>,
        recorder: Arc<MetricsRecorder>,
        breaker: Arc<CircuitBreaker>,
    }

    fn fixture(config: GatewayConfig) -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let recorder = Arc::new(MetricsRecorder::new(config.metrics_capacity));
        let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker));
        let pipeline = RequestPipeline::new(
            &config,
            transport.clone(),
            breaker.clone(),
            recorder.clone(),
            Arc::new(NoToken),
            Vec::new(),
        )
        .unwrap();
        Fixture {
            pipeline,
            transport,
            recorder,
            breaker,
        }
    }

    fn config() -> GatewayConfig {
        GatewayConfig::builder()
            .base_url("https://api.example.test/")
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_exponential_backoff() {
        let f = fixture(config());
        f.transport
            .push(ScriptedReply::Status(503))
            .push(ScriptedReply::Status(503))
            .push(ScriptedReply::Status(200));

        let started = tokio::time::Instant::now();
        let response = f
            .pipeline
            .execute(GatewayRequest::new(HttpMethod::Get, "/flows"))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(f.transport.call_count(), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(f.recorder.len(), 3);
        assert_eq!(f.breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_perpetual_503_exhausts_attempt_budget() {
        let mut config = config();
        config.circuit_breaker.failure_threshold = 100;
        let f = fixture(config);
        f.transport.set_fallback(ScriptedReply::Status(503));

        let err = f
            .pipeline
            .execute(GatewayRequest::new(HttpMethod::Get, "/flows"))
            .await
            .unwrap_err();

        match err {
            GatewayError::ExhaustedRetries {
                attempts,
                failures,
                circuit_state,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(failures.len(), 3);
                assert_eq!(
                    failures.iter().map(|f| f.attempt).collect::<Vec<_>>(),
                    vec![1, 2, 3]
                );
                assert_eq!(circuit_state, CircuitState::Closed);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let f = fixture(config());
        f.transport.set_fallback(ScriptedReply::Status(404));

        let err = f
            .pipeline
            .execute(GatewayRequest::new(HttpMethod::Get, "/flows/missing"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GatewayError::Upstream { status, ref context, .. }
                if status == StatusCode::NOT_FOUND && context.attempt == 1
        ));
        assert_eq!(f.transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_error_is_not_retried() {
        let f = fixture(config());
        f.transport.set_fallback(ScriptedReply::ConnectionRefused);

        let err = f
            .pipeline
            .execute(GatewayRequest::new(HttpMethod::Get, "/flows"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GatewayError::Transport { kind: TransportErrorKind::Connect, .. }
        ));
        assert_eq!(f.transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried() {
        let f = fixture(config());
        f.transport
            .push(ScriptedReply::Timeout)
            .push(ScriptedReply::Status(200));

        f.pipeline
            .execute(GatewayRequest::new(HttpMethod::Get, "/flows"))
            .await
            .unwrap();
        assert_eq!(f.transport.call_count(), 2);
        assert_eq!(f.recorder.all()[0].status_code, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opening_mid_retry_surfaces_circuit_open() {
        let mut config = config();
        config.circuit_breaker.failure_threshold = 2;
        let f = fixture(config);
        f.transport.set_fallback(ScriptedReply::Status(503));

        let started = tokio::time::Instant::now();
        let err = f
            .pipeline
            .execute(GatewayRequest::new(HttpMethod::Get, "/flows"))
            .await
            .unwrap_err();

        // Only the backoff after the first failure; none once the circuit is open.
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        match &err {
            GatewayError::CircuitOpen {
                retry_after,
                failures,
            } => {
                assert_eq!(*retry_after, Some(Duration::from_secs(30)));
                assert_eq!(
                    failures.iter().map(|f| f.attempt).collect::<Vec<_>>(),
                    vec![1, 2]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(f.transport.call_count(), 2);
        assert_eq!(f.recorder.len(), 2);
        assert!(f.recorder.all().iter().all(|m| !m.rejected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_during_backoff_keeps_prior_failures() {
        let f = fixture(config());
        f.transport.set_fallback(ScriptedReply::Status(503));

        let other_callers = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            for _ in 0..5 {
                f.breaker.on_failure();
            }
        };
        let (result, ()) = tokio::join!(
            f.pipeline
                .execute(GatewayRequest::new(HttpMethod::Get, "/flows")),
            other_callers
        );

        match result.unwrap_err() {
            GatewayError::CircuitOpen { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].attempt, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.transport.call_count(), 1);
        assert!(f.recorder.all()[1].rejected);
    }

    #[tokio::test]
    async fn test_url_and_default_headers() {
        let f = fixture(config());
        let mut request = GatewayRequest::new(HttpMethod::Get, "/api/v1/flows");
        request
            .headers
            .insert(USER_AGENT, HeaderValue::from_static("custom-agent"));

        f.pipeline.execute(request).await.unwrap();
        f.pipeline
            .execute(GatewayRequest::new(HttpMethod::Get, "health"))
            .await
            .unwrap();

        let calls = f.transport.calls();
        assert_eq!(calls[0].url.as_str(), "https://api.example.test/api/v1/flows");
        assert_eq!(calls[0].headers.get(USER_AGENT).unwrap(), "custom-agent");
        assert_eq!(calls[1].url.as_str(), "https://api.example.test/health");
        assert!(
            calls[1]
                .headers
                .get(USER_AGENT)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("bulwark/")
        );
    }

    #[tokio::test]
    async fn test_mixed_case_default_header_wins_over_builtin() {
        for _ in 0..16 {
            let config = GatewayConfig::builder()
                .base_url("https://api.example.test")
                .default_header("User-Agent", "my-app/1.0")
                .build()
                .unwrap();
            let f = fixture(config);

            f.pipeline
                .execute(GatewayRequest::new(HttpMethod::Get, "/flows"))
                .await
                .unwrap();
            assert_eq!(f.transport.calls()[0].headers.get(USER_AGENT).unwrap(), "my-app/1.0");
        }
    }

    #[test]
    fn test_duplicate_header_names_resolve_deterministically() {
        let mut config = config();
        config.default_headers.clear();
        config
            .default_headers
            .insert("X-Tenant".to_string(), "upper".to_string());
        config
            .default_headers
            .insert("x-tenant".to_string(), "lower".to_string());

        let headers = parse_default_headers(&config).unwrap();
        assert_eq!(headers.get_all("x-tenant").iter().count(), 1);
        assert_eq!(headers.get("x-tenant").unwrap(), "lower");
    }

    #[tokio::test]
    async fn test_invalid_endpoint_sends_nothing() {
        let f = fixture(config());
        let err = f
            .pipeline
            .execute(GatewayRequest::new(HttpMethod::Get, "http://elsewhere.test/x"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::InvalidRequest(_)));
        assert_eq!(f.transport.call_count(), 0);
        assert!(f.recorder.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_disabled_keeps_log_empty() {
        let mut config = config();
        config.enable_metrics = false;
        let f = fixture(config);

        f.pipeline
            .execute(GatewayRequest::new(HttpMethod::Get, "/flows"))
            .await
            .unwrap();
        assert!(f.recorder.is_empty());
    }
}
