//! Configuration data structures for Bulwark.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files and to
//! `BULWARK_`-prefixed environment variables. They include defaults so that a minimal
//! config only needs `base_url`.
use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_metrics_capacity() -> usize {
    1_000
}

fn default_headers() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert(
        "user-agent".to_string(),
        format!("bulwark/{}", env!("CARGO_PKG_VERSION")),
    );
    headers
}

/// Top level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Base URL of the single upstream service, e.g. `https://api.example.test`.
    pub base_url: String,
    /// Per-attempt timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total attempts per logical request (the original call included).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay for exponential backoff.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Add up to 10% random jitter to backoff delays.
    #[serde(default)]
    pub retry_jitter: bool,
    /// Emit per-request info logs.
    #[serde(default = "default_true")]
    pub enable_logging: bool,
    /// Record per-attempt metrics into the in-memory log.
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
    /// Maximum number of metrics retained in the log.
    #[serde(default = "default_metrics_capacity")]
    pub metrics_capacity: usize,
    /// Headers added to every outgoing attempt unless the request sets them.
    #[serde(default = "default_headers")]
    pub default_headers: HashMap<String, String>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7860".to_string(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_jitter: false,
            enable_logging: true,
            enable_metrics: true,
            metrics_capacity: default_metrics_capacity(),
            default_headers: default_headers(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health_check: HealthCheckConfig::default(),
        }
    }
}

/// Builder for GatewayConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct GatewayConfigBuilder {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
    retry_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_jitter: bool,
    enable_logging: Option<bool>,
    enable_metrics: Option<bool>,
    metrics_capacity: Option<usize>,
    default_headers: HashMap<String, String>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    health_check: Option<HealthCheckConfig>,
}

impl GatewayConfigBuilder {
    /// Set the upstream base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn retry_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_base_delay_ms = Some(delay_ms);
        self
    }

    pub fn retry_jitter(mut self, enabled: bool) -> Self {
        self.retry_jitter = enabled;
        self
    }

    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = Some(enabled);
        self
    }

    pub fn enable_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = Some(enabled);
        self
    }

    pub fn metrics_capacity(mut self, capacity: usize) -> Self {
        self.metrics_capacity = Some(capacity);
        self
    }

    /// Add a header sent with every attempt. Names are case-insensitive, so this
    /// replaces a built-in default of the same name.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn health_check(mut self, config: HealthCheckConfig) -> Self {
        self.health_check = Some(config);
        self
    }

    /// Build the final GatewayConfig
    pub fn build(self) -> Result<GatewayConfig, String> {
        let base_url = self
            .base_url
            .ok_or_else(|| "base_url is required".to_string())?;

        let mut default_headers = default_headers();
        default_headers.extend(self.default_headers);

        Ok(GatewayConfig {
            base_url,
            timeout_ms: self.timeout_ms.unwrap_or_else(default_timeout_ms),
            retry_attempts: self.retry_attempts.unwrap_or_else(default_retry_attempts),
            retry_base_delay_ms: self
                .retry_base_delay_ms
                .unwrap_or_else(default_retry_base_delay_ms),
            retry_jitter: self.retry_jitter,
            enable_logging: self.enable_logging.unwrap_or(true),
            enable_metrics: self.enable_metrics.unwrap_or(true),
            metrics_capacity: self
                .metrics_capacity
                .unwrap_or_else(default_metrics_capacity),
            default_headers,
            circuit_breaker: self.circuit_breaker.unwrap_or_default(),
            health_check: self.health_check.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a trial request.
    pub open_duration_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 30_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub path: String,
    /// Rolling window used for the gateway success ratio.
    pub window_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            path: "/health".to_string(),
            window_secs: 300,
        }
    }
}
