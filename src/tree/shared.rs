use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{NodeId, PendingBranch, SimTree};
use crate::error::{SimError, SimResult};
use crate::metrics::MetricsCollector;
use crate::simulator::RunReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRun {
    pub parent: NodeId,
    pub child: NodeId,
    pub report: RunReport,
}

type RunOutcome = (SimResult<RunReport>, Duration);

/// Tree handle for async hosts.
///
/// Simulations run on the blocking pool. The tree lock is only taken to
/// check a clone out and to attach or discard it afterwards, so sibling
/// branches advance in parallel.
#[derive(Debug, Clone)]
pub struct SharedTree {
    inner: Arc<Mutex<SimTree>>,
    metrics: MetricsCollector,
}

impl SharedTree {
    pub fn new(tree: SimTree) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tree)),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn lock(&self) -> MutexGuard<'_, SimTree> {
        self.inner.lock()
    }

    pub async fn advance(&self, parent: NodeId, turns: u64) -> SimResult<BranchRun> {
        self.advance_until(parent, turns, CancellationToken::new()).await
    }

    pub async fn advance_until(
        &self,
        parent: NodeId,
        turns: u64,
        cancel: CancellationToken,
    ) -> SimResult<BranchRun> {
        let pending = self.inner.lock().checkout(parent)?;
        let handle = spawn_run(pending.clone(), turns, cancel);
        self.finish(pending, turns, handle.await)
    }

    /// Fork and run every frontier leaf at once. Results come back sorted by
    /// parent id; a failing branch does not affect the others.
    pub async fn advance_frontier(
        &self,
        turns: u64,
        only_max_depth: bool,
        cancel: CancellationToken,
    ) -> Vec<(NodeId, SimResult<BranchRun>)> {
        let mut results = Vec::new();
        let mut pending = Vec::new();
        {
            let mut tree = self.inner.lock();
            for leaf in tree.frontier(only_max_depth) {
                match tree.checkout(leaf) {
                    Ok(branch) => pending.push(branch),
                    Err(e) => results.push((leaf, Err(e))),
                }
            }
        }
        info!("Advancing {} frontier branch(es) by {} turn(s)", pending.len(), turns);

        let running: Vec<(PendingBranch, JoinHandle<RunOutcome>)> = pending
            .into_iter()
            .map(|branch| {
                let handle = spawn_run(branch.clone(), turns, cancel.clone());
                (branch, handle)
            })
            .collect();

        for (branch, handle) in running {
            let parent = branch.parent;
            results.push((parent, self.finish(branch, turns, handle.await)));
        }

        results.sort_by_key(|(leaf, _)| *leaf);
        results
    }

    fn finish(
        &self,
        pending: PendingBranch,
        turns: u64,
        joined: Result<RunOutcome, JoinError>,
    ) -> SimResult<BranchRun> {
        let outcome = joined
            .map_err(|e| SimError::Worker(e.to_string()))
            .and_then(|(result, took)| result.map(|report| (report, took)));

        let mut tree = self.inner.lock();
        let committed = outcome.and_then(|(report, took)| {
            let child = tree.commit(&pending, turns)?;
            Ok((child, report, took))
        });

        match committed {
            Ok((child, report, took)) => {
                self.metrics.record_run(&report, took);
                Ok(BranchRun {
                    parent: pending.parent,
                    child,
                    report,
                })
            }
            Err(e) => {
                warn!("Branch from node {} failed: {}", pending.parent, e);
                if let Err(discard) = tree.discard(pending.child) {
                    warn!("Could not discard node {}: {}", pending.child, discard);
                }
                self.metrics.record_failure();
                Err(e)
            }
        }
    }
}

fn spawn_run(pending: PendingBranch, turns: u64, cancel: CancellationToken) -> JoinHandle<RunOutcome> {
    tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let result = pending.run(turns, &cancel);
        (result, started.elapsed())
    })
}
