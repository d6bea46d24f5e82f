//! Health monitoring.
//!
//! The monitor evaluates a metrics snapshot against the configured alert
//! thresholds and produces a typed report; a background task can re-check
//! on the configured cadence. Alert delivery is a consumer concern — the
//! report is the interface.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use timberdb_core::{AlertThresholds, Metrics, MetricsSnapshot};

/// Point-in-time health verdict.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// `true` when no threshold was violated.
    pub healthy: bool,
    /// One entry per violated threshold.
    pub issues: Vec<String>,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
    /// The snapshot the verdict was computed from.
    pub snapshot: MetricsSnapshot,
}

/// Evaluates metrics against alert thresholds.
pub struct HealthMonitor {
    metrics: Metrics,
    thresholds: AlertThresholds,
}

impl HealthMonitor {
    /// Creates a monitor over the given metrics handle.
    #[must_use]
    pub fn new(metrics: Metrics, thresholds: AlertThresholds) -> Self {
        Self {
            metrics,
            thresholds,
        }
    }

    /// Runs one health check.
    #[must_use]
    pub fn check(&self) -> HealthReport {
        let snapshot = self.metrics.snapshot();
        let mut issues = Vec::new();

        let success_rate = snapshot.overall_success_rate();
        let error_rate = 1.0 - success_rate;
        if error_rate > self.thresholds.max_error_rate {
            issues.push(format!(
                "error rate {error_rate:.3} exceeds threshold {:.3}",
                self.thresholds.max_error_rate
            ));
        }
        if success_rate < self.thresholds.min_success_rate {
            issues.push(format!(
                "success rate {success_rate:.3} below threshold {:.3}",
                self.thresholds.min_success_rate
            ));
        }

        let max_latency_ms = self.thresholds.max_latency_ms as f64;
        for op in &snapshot.operations {
            let avg = op.avg_latency_ms();
            if avg > max_latency_ms {
                issues.push(format!(
                    "{} average latency {avg:.1}ms exceeds threshold {max_latency_ms:.0}ms",
                    op.operation
                ));
            }
        }

        HealthReport {
            healthy: issues.is_empty(),
            issues,
            checked_at: Utc::now(),
            snapshot,
        }
    }

    /// Re-checks on a fixed cadence until the token is canceled, logging
    /// any violations.
    #[must_use]
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.check();
                        if report.healthy {
                            debug!("health check passed");
                        } else {
                            warn!(issues = ?report.issues, "health check failed");
                        }
                    }
                }
            }
        })
    }
}
