pub mod logger;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::simulator::{RunReport, RunStop};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub elapsed_s: f64,
    pub runs: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub turns: u64,
    pub actions_ok: u64,
    pub actions_failed: u64,
    pub action_failure_rate: f64,
    pub avg_run_ms: f64,
}

/// Counters over branch runs, cheap to clone and share between tasks.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsInner {
    runs: u64,
    runs_completed: u64,
    runs_failed: u64,
    turns: u64,
    actions_ok: u64,
    actions_failed: u64,
    total_run_ms: f64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner::default())),
            start_time: Instant::now(),
        }
    }

    pub fn record_run(&self, report: &RunReport, took: Duration) {
        let mut inner = self.inner.write();
        inner.runs += 1;
        if report.stop == RunStop::Completed {
            inner.runs_completed += 1;
        }
        inner.turns += report.turns_run;
        inner.actions_ok += report.actions_ok;
        inner.actions_failed += report.actions_failed;
        inner.total_run_ms += took.as_secs_f64() * 1000.0;
    }

    pub fn record_failure(&self) {
        self.inner.write().runs_failed += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read();

        let attempted = inner.actions_ok + inner.actions_failed;
        let action_failure_rate = if attempted > 0 {
            inner.actions_failed as f64 / attempted as f64
        } else {
            0.0
        };

        if action_failure_rate > 0.5 {
            warn!("More than half of all actions failed ({:.0}%)", action_failure_rate * 100.0);
        }

        let avg_run_ms = if inner.runs > 0 {
            inner.total_run_ms / inner.runs as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            elapsed_s: self.start_time.elapsed().as_secs_f64(),
            runs: inner.runs,
            runs_completed: inner.runs_completed,
            runs_failed: inner.runs_failed,
            turns: inner.turns,
            actions_ok: inner.actions_ok,
            actions_failed: inner.actions_failed,
            action_failure_rate,
            avg_run_ms,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_runs_and_actions() {
        let metrics = MetricsCollector::new();
        metrics.record_run(
            &RunReport { turns_run: 3, actions_ok: 3, actions_failed: 1, stop: RunStop::Completed },
            Duration::from_millis(20),
        );
        metrics.record_run(&RunReport::default(), Duration::from_millis(10));
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs, 2);
        assert_eq!(snapshot.runs_completed, 1);
        assert_eq!(snapshot.runs_failed, 1);
        assert_eq!(snapshot.turns, 3);
        assert!((snapshot.action_failure_rate - 0.25).abs() < 1e-9);
        assert!((snapshot.avg_run_ms - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = MetricsCollector::new();
        let other = metrics.clone();
        other.record_failure();
        assert_eq!(metrics.snapshot().runs_failed, 1);
    }
}
