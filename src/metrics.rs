//! Service metrics
//!
//! Request/response counters and a running mean confidence, snapshotted
//! by the admin metrics endpoint.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_responses: u64,
    pub average_confidence: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    total_requests: u64,
    successful_responses: u64,
    average_confidence: f64,
    last_updated: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ServiceMetrics {
    inner: Mutex<Inner>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                total_requests: 0,
                successful_responses: 0,
                average_confidence: 0.0,
                last_updated: Utc::now(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_request(&self) {
        let mut inner = self.lock();
        inner.total_requests += 1;
        inner.last_updated = Utc::now();
    }

    /// Fold one successful generation into the running mean.
    pub fn record_success(&self, confidence: f32) {
        let mut inner = self.lock();
        inner.successful_responses += 1;
        let n = inner.successful_responses as f64;
        inner.average_confidence =
            (inner.average_confidence * (n - 1.0) + f64::from(confidence)) / n;
        inner.last_updated = Utc::now();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.lock();
        MetricsSnapshot {
            total_requests: inner.total_requests,
            successful_responses: inner.successful_responses,
            average_confidence: inner.average_confidence,
            last_updated: inner.last_updated,
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_mean_confidence() {
        let metrics = ServiceMetrics::new();
        metrics.record_request();
        metrics.record_success(0.8);
        metrics.record_request();
        metrics.record_success(0.4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.successful_responses, 2);
        assert!((snapshot.average_confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn requests_count_even_without_success() {
        let metrics = ServiceMetrics::new();
        metrics.record_request();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.successful_responses, 0);
        assert_eq!(snapshot.average_confidence, 0.0);
    }
}
