use std::{fmt, time::Duration};

use async_trait::async_trait;
use http::HeaderMap;
use thiserror::Error;
use url::Url;

use crate::core::request::{GatewayResponse, HttpMethod, RequestBody};

/// Coarse classification of a transport failure, used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Connect => write!(f, "connect"),
            TransportErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Custom error type for transport operations
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Error when connection to the upstream fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the attempt exceeds its deadline
    #[error("Timeout error after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Error when the request could not be built; nothing was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Any other I/O failure while sending or reading the response
    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Timeout(_) => TransportErrorKind::Timeout,
            TransportError::ConnectionError(_) => TransportErrorKind::Connect,
            TransportError::InvalidRequest(_) | TransportError::Other(_) => {
                TransportErrorKind::Other
            }
        }
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A single attempt as handed to the transport: absolute URL, final headers.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
}

/// Transport defines the port (interface) for talking to the upstream service
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one attempt and buffer the response.
    ///
    /// Any HTTP status is returned as `Ok`; only failures to obtain a response are errors.
    async fn send(&self, request: OutgoingRequest) -> TransportResult<GatewayResponse>;

    /// Perform a lightweight liveness probe.
    ///
    /// # Returns
    /// `Ok(true)` for a 2xx answer, `Ok(false)` for any other answer or a refused
    /// connection, `Err` on timeout.
    async fn health_check(&self, url: &str, timeout: Duration) -> TransportResult<bool>;
}
