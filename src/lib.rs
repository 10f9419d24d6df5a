//! MX Sweep
//!
//! Concurrent pipeline that reads a list of domains, resolves their MX records
//! against one or more nameservers, and reports the domains whose lookup ended
//! in a selected outcome (NXDOMAIN by default).
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Channel**: bounded MPMC queues whose send side closes when the last
//!   sender handle is released
//! - **Worker**: the stage contract, run-loop, lifecycle status and metadata
//! - **I/O**: CSV reader (source) and report writer (sink)
//! - **Transform**: domain validation and MX resolution
//! - **Pipeline**: the orchestrator scope, progress monitor and outcome counters
//!
//! ```text
//! CSVReader ──A──▶ DomainResolver × (workers × nameservers) ──B──▶ CSVWriter
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use mx_sweep::{run_pipeline, Config, StopController};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let stop = StopController::new();
//!     run_pipeline(config, stop.signal()).await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod domain;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod transform;
pub mod worker;

pub use channel::{BoundedChannel, ChannelProbe, ChannelReceiver, ChannelSender};
pub use config::Config;
pub use domain::{Domain, RawRecord};
pub use error::{ChannelError, WorkerError};
pub use io::{CsvReader, ReportWriter};
pub use pipeline::{Monitor, Orchestrator, OutcomeStats, PipelineStats, ReplicaPlan};
pub use transform::{DomainResolver, HickoryFactory, LookupFactory};
pub use worker::{Stage, StopController, StopSignal, Worker, WorkerMeta, WorkerStatus};

use anyhow::Result;
use std::sync::Arc;

/// Wire reader, resolvers and writer into an orchestrator without running it.
///
/// One resolver is created per `(replica, target)` pair. The channel factories
/// are dropped before returning, so only worker handles keep the channels open.
pub fn assemble_pipeline(
    config: &Config,
    targets: &[String],
    factory: Arc<dyn LookupFactory>,
) -> Result<Orchestrator> {
    let plan = ReplicaPlan::new(config.processing.workers, targets);
    if plan.is_empty() {
        anyhow::bail!("No nameservers to resolve against");
    }

    let outcomes = OutcomeStats::new();
    let records = BoundedChannel::<RawRecord>::new(config.processing.source_buffer);
    let results = BoundedChannel::<Domain>::new(config.processing.result_buffer);

    let mut orchestrator = Orchestrator::new(outcomes.clone())
        .abort_on_failure(config.processing.abort_on_worker_failure);
    if config.processing.enable_monitor {
        orchestrator = orchestrator.with_monitor(config.processing.monitor_interval());
    }

    let reader = CsvReader::new(&config.input.path, config.input.sniff_bytes);
    orchestrator.add(Worker::source(0, reader, records.clone_sender()));

    for replica in plan {
        let resolver = DomainResolver::new(replica.target, factory.clone(), outcomes.clone());
        orchestrator.add(Worker::transform(
            replica.index,
            resolver,
            records.clone_receiver(),
            results.clone_sender(),
        ));
    }

    let writer = ReportWriter::new(
        &config.output.report_path,
        config.output.report_outcomes.clone(),
        outcomes,
    );
    orchestrator.add(Worker::sink(0, writer, results.clone_receiver()));

    tracing::debug!(
        "Wired {} workers (A: {} slots, B: {} slots)",
        orchestrator.metas().len(),
        records.capacity(),
        results.capacity()
    );
    Ok(orchestrator)
}

/// Run the full sweep with the given configuration.
pub async fn run_pipeline(config: Config, stop: StopSignal) -> Result<PipelineStats> {
    config.validate()?;

    tracing::info!("Starting MX sweep of {}", config.input.path);

    let targets = if config.resolver.nameservers.is_empty() {
        let targets = transform::system_nameservers()?;
        tracing::info!("Using system nameservers: {}", targets.join(", "));
        targets
    } else {
        config.resolver.nameservers.clone()
    };

    let factory = Arc::new(HickoryFactory {
        timeout: config.resolver.timeout(),
        attempts: config.resolver.attempts,
    });

    let orchestrator = assemble_pipeline(&config, &targets, factory)?;
    let monitor = orchestrator.monitor(config.processing.monitor_interval());
    let stats = orchestrator.run(stop).await?;

    if config.processing.enable_monitor {
        monitor.print_summary(&stats);
    }
    if let Some(ref path) = config.output.stats_path {
        if let Err(e) = stats.save_to_file(path) {
            tracing::warn!("Failed to save stats to {}: {}", path, e);
        }
    }

    tracing::info!("Pipeline complete: {}", stats);
    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
