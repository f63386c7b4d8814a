//! Flow-level performance monitoring, generalized from the teacher's
//! `tools::monitoring::MonitorTool` (per-node timings and counters) to the
//! per-stage-operation shape this SDK deals in.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::service_client::StageOp;

/// A monitoring sink a [`Flow`](crate::flow::Flow) can be wired to, mirroring the
/// teacher's `MonitorTool` trait shape.
pub trait MonitorTool: Send + Sync {
    fn record_stage_added(&self, op: StageOp, elapsed: Duration);
    fn record_commit(&self, elapsed: Duration);
    fn report(&self) -> PerformanceReport;
}

/// Snapshot of accumulated timings, analogous to the teacher's `PerformanceReport`.
#[derive(Debug, Clone, Default)]
pub struct PerformanceReport {
    pub stage_additions: u64,
    pub commits: u64,
    pub total_stage_time: Duration,
    pub total_commit_time: Duration,
    pub per_operation: HashMap<String, OperationMetrics>,
}

#[derive(Debug, Clone, Default)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_time: Duration,
}

impl OperationMetrics {
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_time / self.count as u32
        }
    }
}

/// A `MonitorTool` backed by an in-process counter table. Suitable for tests and for
/// exporting a summary at the end of a warm FaaS process's lifetime; it does not
/// talk to any external metrics backend.
#[derive(Default)]
pub struct InProcessMonitor {
    state: Mutex<PerformanceReport>,
}

impl InProcessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time `f` and record it against `op` as a stage addition.
    pub fn timed_stage<T>(&self, op: StageOp, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.record_stage_added(op, start.elapsed());
        result
    }
}

impl MonitorTool for InProcessMonitor {
    fn record_stage_added(&self, op: StageOp, elapsed: Duration) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.stage_additions += 1;
        state.total_stage_time += elapsed;
        let key = format!("{op:?}");
        let entry = state.per_operation.entry(key).or_default();
        entry.count += 1;
        entry.total_time += elapsed;
        tracing::debug!(?op, ?elapsed, "stage added");
    }

    fn record_commit(&self, elapsed: Duration) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.commits += 1;
        state.total_commit_time += elapsed;
        tracing::debug!(?elapsed, "flow committed");
    }

    fn report(&self) -> PerformanceReport {
        self.state.lock().expect("lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_stage_additions_per_operation() {
        let monitor = InProcessMonitor::new();
        monitor.record_stage_added(StageOp::ThenApply, Duration::from_millis(5));
        monitor.record_stage_added(StageOp::ThenApply, Duration::from_millis(15));
        let report = monitor.report();
        assert_eq!(report.stage_additions, 2);
        let metrics = &report.per_operation["ThenApply"];
        assert_eq!(metrics.count, 2);
        assert_eq!(metrics.average(), Duration::from_millis(10));
    }
}
