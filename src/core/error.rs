//! Error taxonomy surfaced to gateway callers.
//!
//! Transient failures are recovered inside the pipeline by retrying. Whatever reaches
//! the caller is the observed failure enriched with context (timestamp, attempt number,
//! circuit state), never a replacement for it.
use std::{fmt, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::StatusCode;
use thiserror::Error;

use crate::{
    config::ValidationError,
    core::{circuit_breaker::CircuitState, retry::is_retryable_status},
    ports::transport::TransportErrorKind,
};

/// Context attached to a terminal failure.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub at: DateTime<Utc>,
    pub attempt: u32,
    pub circuit_state: CircuitState,
}

/// What went wrong on one attempt.
#[derive(Debug, Clone)]
pub enum FailureCause {
    Status { status: StatusCode, body: Bytes },
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
}

impl FailureCause {
    pub fn status(&self) -> Option<u16> {
        match self {
            FailureCause::Status { status, .. } => Some(status.as_u16()),
            FailureCause::Transport { .. } => None,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            FailureCause::Status { .. } => None,
            FailureCause::Transport { kind, .. } => Some(*kind),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Status { status, .. } => write!(f, "upstream returned {status}"),
            FailureCause::Transport { kind, message } => write!(f, "{kind}: {message}"),
        }
    }
}

/// A failed attempt kept for the exhausted-retries report.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub cause: FailureCause,
}

/// Errors returned by the gateway.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// The breaker refused the call, or opened while the request was still retrying.
    #[error("Circuit breaker is open - service temporarily unavailable")]
    CircuitOpen {
        retry_after: Option<Duration>,
        /// Attempts of this request that failed before the circuit refused it.
        failures: Vec<AttemptFailure>,
    },

    /// No response was received.
    #[error("Transport error ({kind}) on attempt {}: {message}", .context.attempt)]
    Transport {
        kind: TransportErrorKind,
        message: String,
        context: ErrorContext,
    },

    /// A response was received with a failing status.
    #[error("Upstream returned {status} on attempt {}", .context.attempt)]
    Upstream {
        status: StatusCode,
        body: Bytes,
        context: ErrorContext,
    },

    /// Every permitted attempt failed with a retryable error.
    #[error("Request failed after {attempts} attempts (circuit {circuit_state})")]
    ExhaustedRetries {
        attempts: u32,
        failures: Vec<AttemptFailure>,
        circuit_state: CircuitState,
        at: DateTime<Utc>,
    },

    /// The request could not be built; nothing was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The gateway could not be built from its configuration.
    #[error("Invalid gateway configuration: {0}")]
    Config(#[from] ValidationError),

    /// A successful response carried a body that did not match the expected type.
    #[error("Failed to decode response body: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: Bytes,
    },
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub(crate) fn from_failure(failure: AttemptFailure, circuit_state: CircuitState) -> Self {
        let context = ErrorContext {
            at: failure.at,
            attempt: failure.attempt,
            circuit_state,
        };
        match failure.cause {
            FailureCause::Status { status, body } => GatewayError::Upstream {
                status,
                body,
                context,
            },
            FailureCause::Transport { kind, message } => GatewayError::Transport {
                kind,
                message,
                context,
            },
        }
    }

    /// Whether another attempt could succeed (transient by nature).
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport { kind, .. } => *kind == TransportErrorKind::Timeout,
            GatewayError::Upstream { status, .. } => is_retryable_status(status.as_u16()),
            GatewayError::CircuitOpen { .. } | GatewayError::ExhaustedRetries { .. } => true,
            GatewayError::InvalidRequest(_)
            | GatewayError::Config(_)
            | GatewayError::Decode { .. } => false,
        }
    }

    /// Upstream status, when one was observed.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GatewayError::Upstream { status, .. } => Some(*status),
            GatewayError::ExhaustedRetries { failures, .. }
            | GatewayError::CircuitOpen { failures, .. } => failures
                .last()
                .and_then(|f| f.cause.status())
                .and_then(|s| StatusCode::from_u16(s).ok()),
            _ => None,
        }
    }

    /// A short message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::CircuitOpen { .. } => "Service temporarily unavailable".to_string(),
            GatewayError::Transport { .. } => {
                "Backend is not responding. Please check your connection.".to_string()
            }
            GatewayError::Upstream { status, body, .. } => upstream_message(*status, body),
            GatewayError::ExhaustedRetries { failures, .. } => match failures.last() {
                Some(AttemptFailure {
                    cause: FailureCause::Status { status, body },
                    ..
                }) => upstream_message(*status, body),
                _ => "Backend is not responding. Please check your connection.".to_string(),
            },
            GatewayError::InvalidRequest(message) => format!("Request failed: {message}"),
            GatewayError::Config(_) => "Gateway is not configured correctly".to_string(),
            GatewayError::Decode { .. } => "Unexpected response from backend".to_string(),
        }
    }
}

fn upstream_message(status: StatusCode, body: &Bytes) -> String {
    let detail = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "detail"]
                .iter()
                .find_map(|key| value.get(key).and_then(|v| v.as_str()).map(str::to_owned))
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
    format!("Backend error: {} - {}", status.as_u16(), detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ErrorContext {
        ErrorContext {
            at: Utc::now(),
            attempt: 1,
            circuit_state: CircuitState::Closed,
        }
    }

    #[test]
    fn test_user_message_prefers_upstream_detail() {
        let err = GatewayError::Upstream {
            status: StatusCode::BAD_REQUEST,
            body: Bytes::from_static(br#"{"detail": "Flow name taken"}"#),
            context: context(),
        };
        assert_eq!(err.user_message(), "Backend error: 400 - Flow name taken");
    }

    #[test]
    fn test_user_message_falls_back_to_reason() {
        let err = GatewayError::Upstream {
            status: StatusCode::NOT_FOUND,
            body: Bytes::from_static(b"nope"),
            context: context(),
        };
        assert_eq!(err.user_message(), "Backend error: 404 - Not Found");
        assert!(!err.is_retryable());
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_circuit_open_message() {
        let err = GatewayError::CircuitOpen {
            retry_after: None,
            failures: Vec::new(),
        };
        assert_eq!(err.user_message(), "Service temporarily unavailable");
        assert!(err.to_string().contains("Circuit breaker is open"));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_from_failure_keeps_cause() {
        let failure = AttemptFailure {
            attempt: 2,
            at: Utc::now(),
            cause: FailureCause::Transport {
                kind: TransportErrorKind::Connect,
                message: "connection refused".to_string(),
            },
        };
        let err = GatewayError::from_failure(failure, CircuitState::Open);
        match err {
            GatewayError::Transport { kind, context, .. } => {
                assert_eq!(kind, TransportErrorKind::Connect);
                assert_eq!(context.attempt, 2);
                assert_eq!(context.circuit_state, CircuitState::Open);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
