//! Helpers sitting above [`HealthMonitor`]: spawning the loop for a gateway and
//! summarizing the metrics log for logs and the CLI.
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::core::{
    gateway::Gateway,
    health::{HealthLevel, HealthMonitor, HealthStatus},
    metrics_log::RequestMetric,
};

/// Spawn the periodic health monitor for `gateway` if enabled.
pub fn spawn_health_monitor(gateway: &Gateway, log_prefix: &str) -> Option<JoinHandle<()>> {
    let config = &gateway.config().health_check;
    if !config.enabled {
        tracing::info!(
            "({}) Health checking is disabled by configuration. Health monitor not running.",
            log_prefix
        );
        return None;
    }

    tracing::info!(
        "({}) Health monitor task started. Interval: {}s, Path: {}",
        log_prefix,
        config.interval_secs,
        config.path
    );
    Some(HealthMonitor::spawn(gateway.health_monitor()))
}

/// Aggregate view of a slice of the metrics log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub rejected: usize,
    pub average_duration_ms: Option<u64>,
}

pub fn summarize_metrics(metrics: &[RequestMetric]) -> MetricsSummary {
    let mut summary = MetricsSummary::default();
    let mut total_duration = 0u64;

    for metric in metrics {
        summary.total += 1;
        if metric.rejected {
            summary.rejected += 1;
            continue;
        }
        total_duration = total_duration.saturating_add(metric.duration_ms);
        if metric.success {
            summary.successes += 1;
        } else {
            summary.failures += 1;
        }
    }

    let attempts = summary.successes + summary.failures;
    if attempts > 0 {
        summary.average_duration_ms = Some(total_duration / attempts as u64);
    }
    summary
}

/// Emit a concise health summary log line (warns unless every facet is healthy).
pub fn log_health_summary(status: &HealthStatus, log_prefix: &str) {
    let all_healthy = [status.client_component, status.upstream_service, status.gateway]
        .iter()
        .all(|level| *level == HealthLevel::Healthy);

    if all_healthy {
        tracing::info!("({}) Health summary: all facets healthy", log_prefix);
    } else {
        tracing::warn!(
            "({}) Health summary: upstream {}, gateway {}",
            log_prefix,
            status.upstream_service,
            status.gateway
        );
    }
}
