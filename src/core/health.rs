//! Periodic upstream probing and the three-facet health verdict.
//!
//! The verdict combines:
//! - `client_component`: always healthy while the process runs,
//! - `upstream_service`: the latest liveness probe (2xx healthy, anything else down),
//! - `gateway`: the success ratio of recent real attempts in the metrics log.
//!
//! Probes go straight to the transport. They are never retried, never pass the circuit
//! breaker and never land in the metrics log.
use std::{fmt, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::Instrument;

use crate::{
    config::HealthCheckConfig,
    core::{metrics_log::MetricsRecorder, request::join_endpoint},
    metrics::set_health_status,
    ports::transport::Transport,
    tracing_setup::configure_component_tracing,
};

/// Ratio at or above which the gateway facet is healthy.
pub const HEALTHY_RATIO: f64 = 0.9;
/// Ratio above which (and below [`HEALTHY_RATIO`]) the gateway facet is degraded.
pub const DEGRADED_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Down,
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthLevel::Healthy => write!(f, "HEALTHY"),
            HealthLevel::Degraded => write!(f, "DEGRADED"),
            HealthLevel::Down => write!(f, "DOWN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub client_component: HealthLevel,
    pub upstream_service: HealthLevel,
    pub gateway: HealthLevel,
    pub last_checked_at: DateTime<Utc>,
}

impl HealthStatus {
    fn initial() -> Self {
        Self {
            client_component: HealthLevel::Healthy,
            upstream_service: HealthLevel::Healthy,
            gateway: HealthLevel::Healthy,
            last_checked_at: Utc::now(),
        }
    }
}

/// Map a recent success ratio to the gateway facet. No evidence means healthy.
pub fn gateway_level(ratio: Option<f64>) -> HealthLevel {
    match ratio {
        None => HealthLevel::Healthy,
        Some(r) if r >= HEALTHY_RATIO => HealthLevel::Healthy,
        Some(r) if r > DEGRADED_RATIO => HealthLevel::Degraded,
        Some(_) => HealthLevel::Down,
    }
}

pub struct HealthMonitor {
    transport: Arc<dyn Transport>,
    recorder: Arc<MetricsRecorder>,
    config: HealthCheckConfig,
    base_url: String,
    status: ArcSwap<HealthStatus>,
}

impl HealthMonitor {
    pub fn new(
        transport: Arc<dyn Transport>,
        recorder: Arc<MetricsRecorder>,
        base_url: impl Into<String>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            transport,
            recorder,
            config,
            base_url: base_url.into(),
            status: ArcSwap::from_pointee(HealthStatus::initial()),
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Last computed verdict. Never blocks.
    pub fn snapshot(&self) -> HealthStatus {
        self.status.load().as_ref().clone()
    }

    /// Recompute the gateway facet from the metrics log, keeping the last probe result.
    pub fn refresh(&self) -> HealthStatus {
        let upstream = self.status.load().upstream_service;
        self.publish(upstream)
    }

    /// Probe the upstream once and publish the resulting verdict.
    pub async fn probe_now(&self) -> HealthStatus {
        let upstream = self.probe_upstream().await;
        let status = self.publish(upstream);
        tracing::debug!(
            "Health check completed: upstream={}, gateway={}",
            status.upstream_service,
            status.gateway
        );
        status
    }

    async fn probe_upstream(&self) -> HealthLevel {
        let url = match join_endpoint(&self.base_url, &self.config.path) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!("Health check URL is invalid: {}", err);
                return HealthLevel::Down;
            }
        };
        let timeout = Duration::from_secs(self.config.timeout_secs);

        match tokio::time::timeout(timeout, self.transport.health_check(url.as_str(), timeout))
            .await
        {
            Ok(Ok(true)) => HealthLevel::Healthy,
            Ok(Ok(false)) => {
                tracing::warn!("Health check for {} reported unhealthy", url);
                HealthLevel::Down
            }
            Ok(Err(err)) => {
                tracing::warn!("Health check failed for {}: {}", url, err);
                HealthLevel::Down
            }
            Err(_) => {
                tracing::warn!("Health check for {} timed out after {:?}", url, timeout);
                HealthLevel::Down
            }
        }
    }

    fn publish(&self, upstream_service: HealthLevel) -> HealthStatus {
        let window = Duration::from_secs(self.config.window_secs);
        let gateway = gateway_level(self.recorder.success_ratio(window));

        let previous = self.status.load();
        if previous.upstream_service != upstream_service {
            tracing::info!(
                "Upstream service is now {} (was {})",
                upstream_service,
                previous.upstream_service
            );
        }
        if previous.gateway != gateway {
            tracing::info!("Gateway health is now {} (was {})", gateway, previous.gateway);
        }

        let status = HealthStatus {
            client_component: HealthLevel::Healthy,
            upstream_service,
            gateway,
            last_checked_at: Utc::now(),
        };
        set_health_status("client_component", status.client_component);
        set_health_status("upstream_service", status.upstream_service);
        set_health_status("gateway", status.gateway);

        self.status.store(Arc::new(status.clone()));
        status
    }

    /// Probe on a fixed interval until the task is dropped. The first probe is immediate.
    pub async fn run(&self) {
        if !self.config.enabled {
            tracing::info!("Health checking is disabled");
            return;
        }

        tracing::info!(
            "Starting health monitor with interval: {}s, timeout: {}s, path: {}",
            self.config.interval_secs,
            self.config.timeout_secs,
            self.config.path
        );

        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.probe_now().await;
        }
    }

    /// Run the monitor on its own task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let span = configure_component_tracing("health_monitor");
        tokio::spawn(async move { self.run().await }.instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::scripted::ScriptedTransport,
        core::{metrics_log::RequestMetric, request::HttpMethod},
    };

    fn monitor(transport: Arc<ScriptedTransport>, recorder: Arc<MetricsRecorder>) -> HealthMonitor {
        HealthMonitor::new(
            transport,
            recorder,
            "https://api.example.test",
            HealthCheckConfig::default(),
        )
    }

    fn record(recorder: &MetricsRecorder, successes: usize, failures: usize) {
        for _ in 0..successes {
            recorder.record(RequestMetric::new("/flows", HttpMethod::Get, Duration::ZERO, 200));
        }
        for _ in 0..failures {
            recorder.record(RequestMetric::new("/flows", HttpMethod::Get, Duration::ZERO, 503));
        }
    }

    #[test]
    fn test_gateway_level_boundaries() {
        assert_eq!(gateway_level(None), HealthLevel::Healthy);
        assert_eq!(gateway_level(Some(1.0)), HealthLevel::Healthy);
        assert_eq!(gateway_level(Some(0.9)), HealthLevel::Healthy);
        assert_eq!(gateway_level(Some(0.89)), HealthLevel::Degraded);
        assert_eq!(gateway_level(Some(0.51)), HealthLevel::Degraded);
        assert_eq!(gateway_level(Some(0.5)), HealthLevel::Down);
        assert_eq!(gateway_level(Some(0.4)), HealthLevel::Down);
        assert_eq!(gateway_level(Some(0.0)), HealthLevel::Down);
    }

    #[tokio::test]
    async fn test_nine_of_ten_is_not_degraded() {
        let recorder = Arc::new(MetricsRecorder::default());
        record(&recorder, 9, 1);
        let monitor = monitor(Arc::new(ScriptedTransport::new()), recorder);

        let status = monitor.refresh();
        assert_ne!(status.gateway, HealthLevel::Degraded);
        assert_eq!(status.gateway, HealthLevel::Healthy);
    }

    #[tokio::test]
    async fn test_four_of_ten_is_down() {
        let recorder = Arc::new(MetricsRecorder::default());
        record(&recorder, 4, 6);
        let monitor = monitor(Arc::new(ScriptedTransport::new()), recorder);

        assert_eq!(monitor.refresh().gateway, HealthLevel::Down);
    }

    #[tokio::test]
    async fn test_probe_failure_marks_upstream_down() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_health(false);
        let monitor = monitor(transport.clone(), Arc::new(MetricsRecorder::default()));

        let status = monitor.probe_now().await;
        assert_eq!(status.upstream_service, HealthLevel::Down);
        assert_eq!(status.client_component, HealthLevel::Healthy);
        assert_eq!(monitor.snapshot(), status);
        assert_eq!(
            transport.health_probes(),
            vec!["https://api.example.test/health".to_string()]
        );

        transport.set_health(true);
        assert_eq!(
            monitor.probe_now().await.upstream_service,
            HealthLevel::Healthy
        );
    }

    #[tokio::test]
    async fn test_probe_bypasses_metrics_log() {
        let recorder = Arc::new(MetricsRecorder::default());
        let transport = Arc::new(ScriptedTransport::new());
        let monitor = monitor(transport.clone(), recorder.clone());

        monitor.probe_now().await;
        assert!(recorder.is_empty());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_probes_immediately_then_on_interval() {
        let transport = Arc::new(ScriptedTransport::new());
        let monitor = Arc::new(monitor(transport.clone(), Arc::new(MetricsRecorder::default())));

        let handle = monitor.clone().spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.health_probes().len(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.health_probes().len(), 2);

        handle.abort();
    }

    #[tokio::test]
    async fn test_disabled_monitor_returns() {
        let monitor = HealthMonitor::new(
            Arc::new(ScriptedTransport::new()),
            Arc::new(MetricsRecorder::default()),
            "https://api.example.test",
            HealthCheckConfig {
                enabled: false,
                ..HealthCheckConfig::default()
            },
        );
        monitor.run().await;
    }
}
