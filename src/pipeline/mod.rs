//! Pipeline orchestration: worker scope, progress monitor, and outcome counters.

mod monitor;
mod orchestrator;
mod outcome;


pub use monitor::{Monitor, MonitorFrame, Progress, WorkerRow};
pub use orchestrator::{Orchestrator, PipelineStats, Replica, ReplicaPlan};
pub use outcome::OutcomeStats;
