pub mod circuit_breaker;
pub mod error;
pub mod gateway;
pub mod health;
pub mod metrics_log;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod retry;

pub use circuit_breaker::{BreakerPermit, CircuitBreaker, CircuitState};
pub use error::{AttemptFailure, ErrorContext, FailureCause, GatewayError, GatewayResult};
pub use gateway::{Gateway, GatewayBuilder};
pub use health::{HealthLevel, HealthMonitor, HealthStatus};
pub use metrics_log::{MetricsRecorder, RequestMetric};
pub use middleware::{Attempt, AttemptError, AttemptResult, Middleware, Next};
pub use pipeline::RequestPipeline;
pub use request::{
    FormPart, GatewayRequest, GatewayResponse, HttpMethod, RequestBody, RequestOptions,
};
pub use retry::RetryPolicy;
