//! Periodic, read-only progress monitor.

use crate::pipeline::{OutcomeStats, PipelineStats};
use crate::worker::{Role, WorkerMeta, WorkerStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// One worker's line in a [`MonitorFrame`].
#[derive(Debug, Clone)]
pub struct WorkerRow {
    pub role: Role,
    pub name: String,
    pub id: u32,
    pub entity: String,
    pub status: WorkerStatus,
    pub current_item: String,
    pub items_processed: u64,
    pub items_per_sec: f64,
}

/// Source rows read versus transform items completed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    pub total: u64,
    pub completed: u64,
}

impl Progress {
    pub fn percentage(&self) -> f64 {
        if self.total > 0 {
            self.completed as f64 / self.total as f64 * 100.0
        } else {
            0.0
        }
    }
}

/// Everything the monitor shows at one instant.
#[derive(Debug, Clone)]
pub struct MonitorFrame {
    pub rows: Vec<WorkerRow>,
    pub progress: Progress,
    pub outcomes: BTreeMap<String, u64>,
}

impl MonitorFrame {
    /// Single-line summary for periodic logging.
    pub fn summary_line(&self) -> String {
        let running = self
            .rows
            .iter()
            .filter(|r| r.status == WorkerStatus::Running)
            .count();
        let outcomes = self
            .outcomes
            .iter()
            .map(|(label, count)| format!("{}: {}", label, count))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{}/{} done | {}/{} workers running | {}",
            self.progress.completed,
            self.progress.total,
            running,
            self.rows.len(),
            if outcomes.is_empty() { "no outcomes yet" } else { outcomes.as_str() }
        )
    }
}

impl std::fmt::Display for MonitorFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:<16} {:>4}  {:<24} {:<13} {:<32} {:>10}",
            "Task Type", "ID", "Entity", "Status", "Current item", "Speed (/s)"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<16} {:>4}  {:<24} {:<13} {:<32} {:>10.0}",
                row.name, row.id, row.entity, row.status, row.current_item, row.items_per_sec
            )?;
        }
        writeln!(
            f,
            "Progress: {}/{} ({:.1}%)",
            self.progress.completed,
            self.progress.total,
            self.progress.percentage()
        )?;
        for (label, count) in &self.outcomes {
            writeln!(f, "{:<16} {:>8}", label, count)?;
        }
        Ok(())
    }
}

/// Pull-based view over every worker's metadata and the outcome table.
///
/// Never writes to a worker. Values are read field by field, so a frame may
/// mix fields from just before and just after a worker's update.
pub struct Monitor {
    workers: Vec<Arc<WorkerMeta>>,
    outcomes: Arc<OutcomeStats>,
    interval: Duration,
}

impl Monitor {
    pub fn new(workers: Vec<Arc<WorkerMeta>>, outcomes: Arc<OutcomeStats>, interval: Duration) -> Self {
        Self {
            workers,
            outcomes,
            interval,
        }
    }

    /// Whether at least one worker is running.
    pub fn any_running(&self) -> bool {
        self.workers.iter().any(|w| w.is_running())
    }

    /// Whether at least one worker has not started running yet.
    pub fn any_starting(&self) -> bool {
        self.workers.iter().any(|w| w.status().is_starting())
    }

    pub fn progress(&self) -> Progress {
        let mut progress = Progress::default();
        for w in &self.workers {
            match w.role() {
                Role::Source => progress.total += w.items_processed(),
                Role::Transform => progress.completed += w.items_processed(),
                Role::Sink => {}
            }
        }
        progress
    }

    pub fn frame(&self) -> MonitorFrame {
        let rows = self
            .workers
            .iter()
            .map(|w| WorkerRow {
                role: w.role(),
                name: w.name().to_string(),
                id: w.id(),
                entity: w.entity().to_string(),
                status: w.status(),
                current_item: w.current_item().as_ref().clone(),
                items_processed: w.items_processed(),
                items_per_sec: w.items_per_sec(),
            })
            .collect();

        MonitorFrame {
            rows,
            progress: self.progress(),
            outcomes: self.outcomes.snapshot(),
        }
    }

    /// Poll until no worker is running or about to run.
    pub async fn run(self) {
        let mut ticker = interval(self.interval);

        while self.any_running() || self.any_starting() {
            ticker.tick().await;
            if self.any_running() {
                let frame = self.frame();
                tracing::info!("[{:.1}%] {}", frame.progress.percentage(), frame.summary_line());
                tracing::debug!("\n{}", frame);
            }
        }

        let frame = self.frame();
        tracing::info!("Final: {}", frame.summary_line());
    }

    /// Print the final summary after a run.
    pub fn print_summary(&self, stats: &PipelineStats) {
        println!("\n=== Pipeline Summary ===");
        print!("{}", self.frame());
        println!("------------------------");
        println!("Total time: {:.1}s", stats.elapsed.as_secs_f64());
        println!("{}", stats);
        for failure in &stats.failures {
            println!("Worker failure: {}", failure);
        }
        println!("========================\n");
    }
}
