//! Telemetry helpers for Bulwark.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is installed here; the
//! embedding application registers whichever recorder it prefers and these calls become
//! no-ops without one.
//!
//! Provided metrics:
//! * `bulwark_upstream_requests_total` (counter, labels: endpoint, method, status, outcome)
//! * `bulwark_upstream_request_duration_seconds` (histogram, labels: endpoint, method)
//! * `bulwark_retries_total` (counter, labels: endpoint, method)
//! * `bulwark_circuit_rejections_total` (counter)
//! * `bulwark_circuit_state` (gauge: 0 closed, 1 half-open, 2 open)
//! * `bulwark_health_status` (gauge per facet: 1 healthy, 0.5 degraded, 0 down)
//!
//! [`AttemptTimer`] records the attempt duration on drop so early returns are covered.
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

use crate::core::{circuit_breaker::CircuitState, health::HealthLevel, request::HttpMethod};

pub const BULWARK_UPSTREAM_REQUESTS_TOTAL: &str = "bulwark_upstream_requests_total";
pub const BULWARK_UPSTREAM_REQUEST_DURATION_SECONDS: &str =
    "bulwark_upstream_request_duration_seconds";
pub const BULWARK_RETRIES_TOTAL: &str = "bulwark_retries_total";
pub const BULWARK_CIRCUIT_REJECTIONS_TOTAL: &str = "bulwark_circuit_rejections_total";
pub const BULWARK_CIRCUIT_STATE: &str = "bulwark_circuit_state";
pub const BULWARK_HEALTH_STATUS: &str = "bulwark_health_status"; // labels: facet

/// Last value written to each gauge, kept for ad-hoc snapshots.
pub static GAUGE_VALUES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    describe_counter!(
        BULWARK_UPSTREAM_REQUESTS_TOTAL,
        Unit::Count,
        "Attempts sent to the upstream service, by outcome."
    );
    describe_histogram!(
        BULWARK_UPSTREAM_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of attempts sent to the upstream service."
    );
    describe_counter!(
        BULWARK_RETRIES_TOTAL,
        Unit::Count,
        "Retries scheduled after a transient upstream failure."
    );
    describe_counter!(
        BULWARK_CIRCUIT_REJECTIONS_TOTAL,
        Unit::Count,
        "Attempts refused by the circuit breaker without network I/O."
    );
    describe_gauge!(
        BULWARK_CIRCUIT_STATE,
        "Circuit breaker state (0 closed, 1 half-open, 2 open)."
    );
    describe_gauge!(
        BULWARK_HEALTH_STATUS,
        "Health verdict per facet (1 healthy, 0.5 degraded, 0 down)."
    );

    Mutex::new(HashMap::new())
});

fn store_gauge(key: String, value: f64) {
    match GAUGE_VALUES.lock() {
        Ok(mut gauges) => {
            gauges.insert(key, value);
        }
        Err(_) => tracing::error!("Failed to acquire lock for gauge snapshot"),
    }
}

/// Publish the circuit breaker state gauge.
pub fn set_circuit_state(state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    store_gauge("circuit_state".to_string(), value);
    gauge!(BULWARK_CIRCUIT_STATE).set(value);
}

/// Publish one facet of the health verdict.
pub fn set_health_status(facet: &'static str, level: HealthLevel) {
    let value = match level {
        HealthLevel::Healthy => 1.0,
        HealthLevel::Degraded => 0.5,
        HealthLevel::Down => 0.0,
    };
    store_gauge(format!("health_{facet}"), value);
    gauge!(BULWARK_HEALTH_STATUS, "facet" => facet).set(value);
}

/// Count one completed upstream attempt. `status` is 0 when no response arrived.
pub fn increment_upstream_request_total(
    endpoint: &str,
    method: HttpMethod,
    status: u16,
    success: bool,
) {
    counter!(
        BULWARK_UPSTREAM_REQUESTS_TOTAL,
        "endpoint" => endpoint.to_string(),
        "method" => method.as_str(),
        "status" => status.to_string(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

pub fn record_upstream_request_duration(endpoint: &str, method: HttpMethod, duration: Duration) {
    histogram!(
        BULWARK_UPSTREAM_REQUEST_DURATION_SECONDS,
        "endpoint" => endpoint.to_string(),
        "method" => method.as_str()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_retries(endpoint: &str, method: HttpMethod) {
    counter!(
        BULWARK_RETRIES_TOTAL,
        "endpoint" => endpoint.to_string(),
        "method" => method.as_str()
    )
    .increment(1);
}

pub fn increment_circuit_rejections() {
    counter!(BULWARK_CIRCUIT_REJECTIONS_TOTAL).increment(1);
}

/// RAII helper measuring one upstream attempt.
pub struct AttemptTimer {
    start: Instant,
    endpoint: String,
    method: HttpMethod,
    armed: bool,
}

impl AttemptTimer {
    pub fn new(endpoint: &str, method: HttpMethod) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method,
            armed: true,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Drop without recording, for attempts that never reached the network.
    pub fn discard(mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptTimer {
    fn drop(&mut self) {
        if self.armed {
            record_upstream_request_duration(&self.endpoint, self.method, self.start.elapsed());
        }
    }
}

/// Register metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing Bulwark metrics");
    Lazy::force(&GAUGE_VALUES);
    Ok(())
}

/// Snapshot of the last gauge values written.
pub fn get_current_metrics() -> HashMap<String, f64> {
    GAUGE_VALUES
        .lock()
        .map(|gauges| gauges.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_gauges_are_snapshotted() {
        set_health_status("test_facet", HealthLevel::Degraded);
        assert_eq!(get_current_metrics().get("health_test_facet"), Some(&0.5));

        set_health_status("test_facet", HealthLevel::Down);
        assert_eq!(get_current_metrics().get("health_test_facet"), Some(&0.0));
    }

    #[test]
    fn test_circuit_state_gauge_is_snapshotted() {
        set_circuit_state(CircuitState::Open);
        assert!(get_current_metrics().contains_key("circuit_state"));
    }

    #[test]
    fn test_attempt_timer() {
        let timer = AttemptTimer::new("/flows", HttpMethod::Get);
        assert!(timer.elapsed() < Duration::from_secs(5));
        drop(timer);

        AttemptTimer::new("/flows", HttpMethod::Post).discard();
    }

    #[test]
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());
    }
}
