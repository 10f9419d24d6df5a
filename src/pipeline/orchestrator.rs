//! Structured-concurrency scope for a set of workers.
//!
//! Every worker (and the optional monitor) runs as a task in one `JoinSet`.
//! [`Orchestrator::run`] returns only after every task has finished. A worker
//! failure is logged and counted; it ends the run early only when the
//! orchestrator was built with `abort_on_failure`.

use crate::error::WorkerError;
use crate::pipeline::{Monitor, OutcomeStats};
use crate::worker::{MetaSnapshot, Role, Runnable, Stage, StopSignal, Worker, WorkerMeta, WorkerStatus};
use anyhow::Result;
use futures::FutureExt;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// One transform replica: its index and the target it talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub index: u32,
    pub target: String,
}

/// Expands `workers × targets` into replicas, replica-major: every target
/// for index 0, then every target for index 1, and so on.
#[derive(Debug, Clone, Default)]
pub struct ReplicaPlan {
    replicas: Vec<Replica>,
}

impl ReplicaPlan {
    pub fn new(workers: usize, targets: &[String]) -> Self {
        let mut replicas = Vec::with_capacity(workers * targets.len());
        for index in 0..workers {
            for target in targets {
                replicas.push(Replica {
                    index: index as u32,
                    target: target.clone(),
                });
            }
        }
        Self { replicas }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Replica> {
        self.replicas.iter()
    }
}

impl IntoIterator for ReplicaPlan {
    type Item = Replica;
    type IntoIter = std::vec::IntoIter<Replica>;

    fn into_iter(self) -> Self::IntoIter {
        self.replicas.into_iter()
    }
}

/// Totals collected once every worker has finished.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    /// Workers started
    pub workers: usize,

    /// Workers that ended in `failed`
    pub workers_failed: usize,

    /// Items emitted by source workers
    pub records_read: u64,

    /// Items forwarded by transform workers
    pub domains_resolved: u64,

    /// Items transforms dropped
    pub items_dropped: u64,

    /// Items sink workers accepted
    pub items_reported: u64,

    /// Final outcome table
    pub outcomes: BTreeMap<String, u64>,

    /// Error messages of failed workers
    pub failures: Vec<String>,

    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

impl PipelineStats {
    /// Aggregate worker counters by role.
    pub fn collect(
        metas: &[Arc<WorkerMeta>],
        outcomes: &OutcomeStats,
        failures: Vec<String>,
        elapsed: Duration,
    ) -> Self {
        let mut stats = PipelineStats {
            workers: metas.len(),
            outcomes: outcomes.snapshot(),
            failures,
            elapsed,
            ..Default::default()
        };
        for meta in metas {
            if meta.status() == WorkerStatus::Failed {
                stats.workers_failed += 1;
            }
            match meta.role() {
                Role::Source => stats.records_read += meta.items_processed(),
                Role::Transform => {
                    stats.domains_resolved += meta.items_processed();
                    stats.items_dropped += meta.items_dropped();
                }
                Role::Sink => stats.items_reported += meta.items_processed(),
            }
        }
        stats
    }

    /// Save stats to a JSON file.
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Stats saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Read: {}, Resolved: {}, Dropped: {}, Reported: {}, Workers failed: {}/{}",
            self.records_read,
            self.domains_resolved,
            self.items_dropped,
            self.items_reported,
            self.workers_failed,
            self.workers
        )
    }
}

enum TaskOutcome {
    Worker(Result<MetaSnapshot, WorkerError>),
    Monitor,
}

/// Owns a set of workers and runs them concurrently to completion.
pub struct Orchestrator {
    workers: Vec<Box<dyn Runnable>>,
    metas: Vec<Arc<WorkerMeta>>,
    outcomes: Arc<OutcomeStats>,
    monitor_interval: Option<Duration>,
    abort_on_failure: bool,
}

impl Orchestrator {
    pub fn new(outcomes: Arc<OutcomeStats>) -> Self {
        Self {
            workers: Vec::new(),
            metas: Vec::new(),
            outcomes,
            monitor_interval: None,
            abort_on_failure: false,
        }
    }

    /// Abort all remaining workers on the first worker failure.
    pub fn abort_on_failure(mut self, abort: bool) -> Self {
        self.abort_on_failure = abort;
        self
    }

    /// Run a [`Monitor`] alongside the workers.
    pub fn with_monitor(mut self, interval: Duration) -> Self {
        self.monitor_interval = Some(interval);
        self
    }

    /// Register a worker. Returns its metadata handle.
    pub fn add<S: Stage>(&mut self, worker: Worker<S>) -> Arc<WorkerMeta> {
        let meta = worker.meta();
        self.metas.push(meta.clone());
        self.workers.push(Box::new(worker));
        meta
    }

    pub fn metas(&self) -> &[Arc<WorkerMeta>] {
        &self.metas
    }

    pub fn outcomes(&self) -> &Arc<OutcomeStats> {
        &self.outcomes
    }

    /// Monitor over the registered workers.
    pub fn monitor(&self, interval: Duration) -> Monitor {
        Monitor::new(self.metas.clone(), self.outcomes.clone(), interval)
    }

    /// Start every worker and wait for all of them.
    pub async fn run(self, stop: StopSignal) -> Result<PipelineStats> {
        let started = Instant::now();
        let Orchestrator {
            workers,
            metas,
            outcomes,
            monitor_interval,
            abort_on_failure,
        } = self;

        tracing::info!("Starting {} workers", workers.len());

        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        for worker in workers {
            let meta = worker.meta();
            let stop = stop.clone();
            tracing::debug!("Spawning {}", meta);
            tasks.spawn(async move {
                let result = AssertUnwindSafe(worker.run(stop))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        let _ = meta.transition(WorkerStatus::Failed);
                        Err(WorkerError::Panicked {
                            worker: meta.to_string(),
                        })
                    });
                TaskOutcome::Worker(result)
            });
        }

        if let Some(interval) = monitor_interval {
            let monitor = Monitor::new(metas.clone(), outcomes.clone(), interval);
            tasks.spawn(async move {
                monitor.run().await;
                TaskOutcome::Monitor
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let error = match joined {
                Ok(TaskOutcome::Monitor) => continue,
                Ok(TaskOutcome::Worker(Ok(snapshot))) => {
                    tracing::debug!(
                        "{}[{}] finished: {} {} processed, {} dropped",
                        snapshot.name,
                        snapshot.id,
                        snapshot.items_processed,
                        snapshot.item_unit,
                        snapshot.items_dropped
                    );
                    continue;
                }
                Ok(TaskOutcome::Worker(Err(e))) => e,
                Err(e) => {
                    tracing::error!("Task join error: {}", e);
                    continue;
                }
            };

            tracing::error!("Worker failed: {}", error);
            if abort_on_failure {
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                return Err(anyhow::Error::new(error).context("Pipeline aborted after worker failure"));
            }
            failures.push(error.to_string());
        }

        let stats = PipelineStats::collect(&metas, &outcomes, failures, started.elapsed());
        tracing::info!("Pipeline finished in {:.1}s: {}", stats.elapsed.as_secs_f64(), stats);
        Ok(stats)
    }
}
