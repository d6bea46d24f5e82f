//! Engine metrics.
//!
//! Metrics live behind an explicit [`Metrics`] handle owning a private
//! `prometheus::Registry`; the handle is created at engine construction and
//! threaded through components. There is no process-global metric state, so
//! two engines in one process never share counters. [`Metrics::snapshot`]
//! exposes the numbers programmatically; [`Metrics::export_text`] renders
//! the Prometheus exposition format.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::error::{TimberError, TimberResult};

/// Operation classes tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// WAL appends (all record kinds).
    Append,
    /// Read-facade queries (`find`/`find_one`/`count`).
    Query,
    /// Materializations (by LSN or time).
    Materialize,
    /// Branch and project creation.
    BranchCreate,
    /// Resets and branch-from-history operations.
    Restore,
}

impl OpClass {
    /// Metric label for this class.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Query => "query",
            Self::Materialize => "materialize",
            Self::BranchCreate => "branch_create",
            Self::Restore => "restore",
        }
    }

    const ALL: [OpClass; 5] = [
        Self::Append,
        Self::Query,
        Self::Materialize,
        Self::BranchCreate,
        Self::Restore,
    ];
}

/// Explicit metrics handle with an owned registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    operations: IntCounterVec,
    latency: HistogramVec,
    current_lsn: IntGauge,
    active_branches: IntGauge,
    active_projects: IntGauge,
}

impl Metrics {
    /// Creates a fresh handle with its own registry.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when metric registration fails (duplicate names
    /// cannot happen on a fresh registry, so this signals a bug).
    pub fn new() -> TimberResult<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("timberdb_operations_total", "Total operations by class"),
            &["operation", "status"],
        )
        .map_err(|e| TimberError::internal(format!("metric init: {e}")))?;

        let latency = HistogramVec::new(
            HistogramOpts::new(
                "timberdb_operation_duration_seconds",
                "Operation latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["operation"],
        )
        .map_err(|e| TimberError::internal(format!("metric init: {e}")))?;

        let current_lsn = IntGauge::new("timberdb_current_lsn", "Largest committed LSN")
            .map_err(|e| TimberError::internal(format!("metric init: {e}")))?;

        let active_branches = IntGauge::new("timberdb_active_branches", "Number of ACTIVE branches")
            .map_err(|e| TimberError::internal(format!("metric init: {e}")))?;

        let active_projects = IntGauge::new("timberdb_active_projects", "Number of projects")
            .map_err(|e| TimberError::internal(format!("metric init: {e}")))?;

        for collector in [
            Box::new(operations.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(latency.clone()),
            Box::new(current_lsn.clone()),
            Box::new(active_branches.clone()),
            Box::new(active_projects.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| TimberError::internal(format!("metric register: {e}")))?;
        }

        Ok(Self {
            registry,
            operations,
            latency,
            current_lsn,
            active_branches,
            active_projects,
        })
    }

    /// Records one operation outcome with its latency.
    pub fn record(&self, op: OpClass, succeeded: bool, elapsed: Duration) {
        let status = if succeeded { "success" } else { "error" };
        self.operations
            .with_label_values(&[op.as_str(), status])
            .inc();
        self.latency
            .with_label_values(&[op.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Publishes the largest committed LSN.
    pub fn set_current_lsn(&self, lsn: i64) {
        self.current_lsn.set(lsn);
    }

    /// Publishes the ACTIVE branch count.
    pub fn set_active_branches(&self, count: i64) {
        self.active_branches.set(count);
    }

    /// Publishes the project count.
    pub fn set_active_projects(&self, count: i64) {
        self.active_projects.set(count);
    }

    /// Point-in-time view of all counters and gauges.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut ops = Vec::with_capacity(OpClass::ALL.len());
        for op in OpClass::ALL {
            let count_for = |status: &str| {
                self.operations
                    .get_metric_with_label_values(&[op.as_str(), status])
                    .map(|c| c.get())
                    .unwrap_or(0)
            };
            let (latency_sum_secs, latency_count) = self
                .latency
                .get_metric_with_label_values(&[op.as_str()])
                .map(|h| (h.get_sample_sum(), h.get_sample_count()))
                .unwrap_or((0.0, 0));
            ops.push(OpStats {
                operation: op.as_str(),
                success: count_for("success"),
                error: count_for("error"),
                latency_sum_secs,
                latency_count,
            });
        }

        MetricsSnapshot {
            operations: ops,
            current_lsn: self.current_lsn.get(),
            active_branches: self.active_branches.get(),
            active_projects: self.active_projects.get(),
        }
    }

    /// Renders all metrics in the Prometheus text exposition format.
    #[must_use]
    pub fn export_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("failed to encode metrics: {e}");
            return String::from("# error encoding metrics\n");
        }
        String::from_utf8(buffer).unwrap_or_else(|_| String::from("# error encoding metrics\n"))
    }
}

/// Per-operation-class counts.
#[derive(Debug, Clone, Copy)]
pub struct OpStats {
    /// Operation class label.
    pub operation: &'static str,
    /// Successful completions.
    pub success: u64,
    /// Failed completions.
    pub error: u64,
    /// Sum of observed latencies in seconds.
    pub latency_sum_secs: f64,
    /// Number of latency observations.
    pub latency_count: u64,
}

impl OpStats {
    /// Total completions.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.success + self.error
    }

    /// Mean observed latency in milliseconds; zero when idle.
    #[must_use]
    pub fn avg_latency_ms(&self) -> f64 {
        if self.latency_count == 0 {
            0.0
        } else {
            self.latency_sum_secs / self.latency_count as f64 * 1_000.0
        }
    }

    /// Success fraction; 1.0 when no operations ran.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            1.0
        } else {
            self.success as f64 / self.total() as f64
        }
    }
}

/// Snapshot of all engine metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Counts per operation class.
    pub operations: Vec<OpStats>,
    /// Largest committed LSN.
    pub current_lsn: i64,
    /// Number of ACTIVE branches.
    pub active_branches: i64,
    /// Number of projects.
    pub active_projects: i64,
}

impl MetricsSnapshot {
    /// Aggregate success fraction across all classes; 1.0 when idle.
    #[must_use]
    pub fn overall_success_rate(&self) -> f64 {
        let (success, total) = self
            .operations
            .iter()
            .fold((0u64, 0u64), |(s, t), op| (s + op.success, t + op.total()));
        if total == 0 {
            1.0
        } else {
            success as f64 / total as f64
        }
    }
}
