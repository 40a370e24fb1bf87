//! Bounded in-memory log of completed upstream attempts.
use std::{collections::VecDeque, sync::Mutex, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::request::{HttpMethod, is_success_status};

/// One completed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetric {
    pub endpoint: String,
    pub method: HttpMethod,
    pub duration_ms: u64,
    /// 0 when no response was received.
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Marker for an attempt the circuit breaker refused; never a network attempt.
    #[serde(default)]
    pub rejected: bool,
}

impl RequestMetric {
    pub fn new(
        endpoint: impl Into<String>,
        method: HttpMethod,
        duration: Duration,
        status_code: u16,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            duration_ms: duration.as_millis().min(u64::MAX as u128) as u64,
            status_code,
            timestamp: Utc::now(),
            success: is_success_status(status_code),
            rejected: false,
        }
    }

    /// Synthetic entry for a call refused by an open circuit.
    pub fn rejected(endpoint: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            duration_ms: 0,
            status_code: 0,
            timestamp: Utc::now(),
            success: false,
            rejected: true,
        }
    }
}

pub struct MetricsRecorder {
    capacity: usize,
    log: Mutex<VecDeque<RequestMetric>>,
}

impl MetricsRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            log: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, VecDeque<RequestMetric>> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a metric, evicting the oldest entries beyond capacity.
    pub fn record(&self, metric: RequestMetric) {
        let mut log = self.entries();
        while log.len() >= self.capacity {
            log.pop_front();
        }
        log.push_back(metric);
    }

    /// Entries younger than `window`, oldest first.
    pub fn recent(&self, window: Duration) -> Vec<RequestMetric> {
        let now = Utc::now();
        self.entries()
            .iter()
            .filter(|metric| is_within(now, metric.timestamp, window))
            .cloned()
            .collect()
    }

    /// Every retained entry, oldest first.
    pub fn all(&self) -> Vec<RequestMetric> {
        self.entries().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Share of successful real attempts within `window`.
    ///
    /// Circuit rejection markers are not attempts and are skipped. Returns `None`
    /// when no real attempt falls inside the window.
    pub fn success_ratio(&self, window: Duration) -> Option<f64> {
        let now = Utc::now();
        let (total, successes) = self
            .entries()
            .iter()
            .filter(|metric| !metric.rejected && is_within(now, metric.timestamp, window))
            .fold((0usize, 0usize), |(total, ok), metric| {
                (total + 1, ok + usize::from(metric.success))
            });

        (total > 0).then(|| successes as f64 / total as f64)
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(1_000)
    }
}

fn is_within(now: DateTime<Utc>, timestamp: DateTime<Utc>, window: Duration) -> bool {
    match chrono::Duration::from_std(window) {
        Ok(window) => now.signed_duration_since(timestamp) < window,
        Err(_) => true,
    }
}
