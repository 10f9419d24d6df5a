//! Worker execution: stage contract, run-loop, and shutdown protocol.
//!
//! A [`Worker`] wraps one [`Stage`] together with its channel endpoints and
//! its [`WorkerMeta`]. The role fixes which endpoints exist:
//!
//! | role      | input                    | output            |
//! |-----------|--------------------------|-------------------|
//! | source    | `Stage::produce`         | channel sender    |
//! | transform | channel receiver         | channel sender    |
//! | sink      | channel receiver         | none              |
//!
//! Lifecycle driven by [`Worker::run`]:
//!
//! 1. `initializing → setting_up`, then `Stage::setup`. A failure closes the
//!    worker's handles, marks it `failed`, and returns [`WorkerError::Setup`].
//! 2. `setting_up → running` (clock reset), then the run-loop: take an item,
//!    `process` it, forward a `Some` result, count it.
//! 3. Cleanup: `Stage::finish`, then close both handle clones. The shared
//!    channel closes only when this was its last sender.
//! 4. `running → done` (or `terminating → done` after a stop request).
//!
//! Only sources watch the [`StopSignal`]. A stopped source releases its
//! sender, the closure travels downstream, and each transform or sink drains
//! its queue before ending. Those workers pass through `terminating` when
//! their input ran dry after a stop was requested.

mod meta;
mod stop;

pub use meta::{InvalidTransition, MetaSnapshot, Role, WorkerMeta, WorkerStatus};
pub use stop::{StopController, StopSignal};

use crate::channel::{ChannelReceiver, ChannelSender};
use crate::error::WorkerError;
use async_trait::async_trait;
use std::sync::Arc;

/// One pipeline stage.
///
/// `process` must not fail: item-level problems are either turned into an
/// output value carrying an outcome label, or reported as a drop (`None`).
#[async_trait]
pub trait Stage: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Name shown by the monitor (e.g. `DomainResolver`).
    fn name(&self) -> &str;

    /// Free-text entity label (file path, server address).
    fn entity(&self) -> String {
        String::new()
    }

    /// Unit shown next to throughput figures.
    fn item_unit(&self) -> &str {
        "items"
    }

    /// One-shot initialization before the run-loop.
    async fn setup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Next self-produced item. Only called on source workers.
    async fn produce(&mut self) -> anyhow::Result<Option<Self::Input>> {
        Ok(None)
    }

    /// Label for the monitor's current-item column; `None` leaves it as is.
    fn describe(&self, _item: &Self::Input) -> Option<String> {
        None
    }

    /// Transform one item. `None` drops it.
    async fn process(&mut self, item: Self::Input) -> Option<Self::Output>;

    /// Flush and release resources after the run-loop.
    async fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Type-erased worker so the orchestrator can hold mixed stages.
#[async_trait]
pub trait Runnable: Send {
    fn meta(&self) -> Arc<WorkerMeta>;

    async fn run(self: Box<Self>, stop: StopSignal) -> Result<MetaSnapshot, WorkerError>;
}

/// Execution unit for one stage.
pub struct Worker<S: Stage> {
    stage: S,
    input: Option<ChannelReceiver<S::Input>>,
    output: Option<ChannelSender<S::Output>>,
    meta: Arc<WorkerMeta>,
}

impl<S: Stage> Worker<S> {
    fn build(
        id: u32,
        role: Role,
        stage: S,
        input: Option<ChannelReceiver<S::Input>>,
        output: Option<ChannelSender<S::Output>>,
    ) -> Self {
        let meta = Arc::new(WorkerMeta::new(
            id,
            role,
            stage.name(),
            stage.entity(),
            stage.item_unit(),
        ));
        Self {
            stage,
            input,
            output,
            meta,
        }
    }

    /// Worker that produces its own items and feeds `output`.
    pub fn source(id: u32, stage: S, output: ChannelSender<S::Output>) -> Self {
        Self::build(id, Role::Source, stage, None, Some(output))
    }

    /// Worker between two channels.
    pub fn transform(
        id: u32,
        stage: S,
        input: ChannelReceiver<S::Input>,
        output: ChannelSender<S::Output>,
    ) -> Self {
        Self::build(id, Role::Transform, stage, Some(input), Some(output))
    }

    /// Terminal worker; `Some` results count as processed and go nowhere.
    pub fn sink(id: u32, stage: S, input: ChannelReceiver<S::Input>) -> Self {
        Self::build(id, Role::Sink, stage, Some(input), None)
    }

    /// Shared read-only view of this worker's progress.
    pub fn meta(&self) -> Arc<WorkerMeta> {
        self.meta.clone()
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    /// Run the worker to completion. Never restarts: `done` is terminal.
    pub async fn run(mut self, mut stop: StopSignal) -> Result<MetaSnapshot, WorkerError> {
        self.change_status(WorkerStatus::SettingUp);
        if let Err(e) = self.stage.setup().await {
            tracing::error!("{} setup failed: {:#}", self.meta, e);
            self.change_status(WorkerStatus::Failed);
            self.close_handles();
            return Err(WorkerError::Setup {
                worker: self.meta.to_string(),
                source: e,
            });
        }
        self.change_status(WorkerStatus::Running);

        let looped = self.run_loop(&mut stop).await;
        let finished = self.cleanup().await;

        match looped.and(finished) {
            Ok(()) => {
                self.change_status(WorkerStatus::Done);
                Ok(self.meta.snapshot())
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.change_status(WorkerStatus::Failed);
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self, stop: &mut StopSignal) -> Result<(), WorkerError> {
        let is_source = self.input.is_none();
        loop {
            let next = tokio::select! {
                biased;
                _ = stop.requested(), if is_source => None,
                next = next_item(&mut self.stage, self.input.as_ref()) => Some(next),
            };
            let Some(next) = next else {
                tracing::info!("{} stop requested, no more items will be produced", self.meta);
                self.change_status(WorkerStatus::Terminating);
                return Ok(());
            };

            let item = match next {
                Ok(Some(item)) => item,
                Ok(None) => {
                    if !is_source && stop.is_requested() {
                        tracing::info!("{} drained its input after a stop", self.meta);
                        self.change_status(WorkerStatus::Terminating);
                    }
                    return Ok(());
                }
                Err(e) => {
                    return Err(WorkerError::Run {
                        worker: self.meta.to_string(),
                        source: e,
                    })
                }
            };

            if let Some(label) = self.stage.describe(&item) {
                self.meta.set_current_item(label);
            }

            let Some(result) = self.stage.process(item).await else {
                self.meta.record_dropped();
                continue;
            };

            if let Some(output) = &self.output {
                output.send(result).await.map_err(|e| WorkerError::Channel {
                    worker: self.meta.to_string(),
                    source: e,
                })?;
            }
            self.meta.record_processed();
        }
    }

    /// Flush the stage, then release this worker's channel clones.
    async fn cleanup(&mut self) -> Result<(), WorkerError> {
        tracing::debug!(
            "{} work is done, {} items processed. Time to clean up.",
            self.meta,
            self.meta.items_processed()
        );
        let finished = self.stage.finish().await.map_err(|e| WorkerError::Run {
            worker: self.meta.to_string(),
            source: e,
        });
        self.close_handles();
        finished
    }

    fn close_handles(&mut self) {
        if let Some(output) = self.output.as_mut() {
            if output.close() {
                tracing::debug!("{} was the last sender, downstream closed", self.meta);
            } else {
                tracing::debug!("{} released its sender, siblings still feeding", self.meta);
            }
        }
        if let Some(input) = self.input.as_mut() {
            input.close();
        }
    }

    fn change_status(&self, next: WorkerStatus) {
        if let Err(e) = self.meta.transition(next) {
            tracing::warn!("{}: {}", self.meta, e);
        }
    }
}

async fn next_item<S: Stage>(
    stage: &mut S,
    input: Option<&ChannelReceiver<S::Input>>,
) -> anyhow::Result<Option<S::Input>> {
    match input {
        Some(rx) => Ok(rx.recv().await),
        None => stage.produce().await,
    }
}

#[async_trait]
impl<S: Stage> Runnable for Worker<S> {
    fn meta(&self) -> Arc<WorkerMeta> {
        self.meta.clone()
    }

    async fn run(self: Box<Self>, stop: StopSignal) -> Result<MetaSnapshot, WorkerError> {
        (*self).run(stop).await
    }
}

impl<S: Stage> std::fmt::Display for Worker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.meta.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::BoundedChannel;
    use crate::error::ChannelError;
    use futures::StreamExt;

    /// Source that yields `0..count`.
    struct Counter {
        next: u32,
        count: u32,
    }

    #[async_trait]
    impl Stage for Counter {
        type Input = u32;
        type Output = u32;

        fn name(&self) -> &str {
            "Counter"
        }

        async fn produce(&mut self) -> anyhow::Result<Option<u32>> {
            if self.next == self.count {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(self.next - 1))
        }

        async fn process(&mut self, item: u32) -> Option<u32> {
            Some(item)
        }
    }

    /// Transform that keeps even numbers, optionally failing setup.
    struct Evens {
        fail_setup: bool,
    }

    #[async_trait]
    impl Stage for Evens {
        type Input = u32;
        type Output = u32;

        fn name(&self) -> &str {
            "Evens"
        }

        async fn setup(&mut self) -> anyhow::Result<()> {
            if self.fail_setup {
                anyhow::bail!("no upstream");
            }
            Ok(())
        }

        fn describe(&self, item: &u32) -> Option<String> {
            Some(format!("#{}", item))
        }

        async fn process(&mut self, item: u32) -> Option<u32> {
            (item % 2 == 0).then_some(item)
        }
    }

    #[tokio::test]
    async fn test_source_forwards_everything() {
        let chan = BoundedChannel::new(4);
        let rx = chan.clone_receiver();
        let worker = Worker::source(0, Counter { next: 0, count: 10 }, chan.clone_sender());
        drop(chan);
        let meta = worker.meta();

        let (report, items) = tokio::join!(
            worker.run(StopSignal::never()),
            rx.into_stream().collect::<Vec<_>>()
        );

        let report = report.unwrap();
        assert_eq!(items, (0..10).collect::<Vec<_>>());
        assert_eq!(report.items_processed, 10);
        assert_eq!(meta.status(), WorkerStatus::Done);
        assert_eq!(meta.role(), Role::Source);
    }

    #[tokio::test]
    async fn test_transform_counts_only_forwarded_items() {
        let upstream = BoundedChannel::new(16);
        let downstream = BoundedChannel::new(16);
        let tx = upstream.clone_sender();
        let out = downstream.clone_receiver();
        let worker = Worker::transform(
            1,
            Evens { fail_setup: false },
            upstream.clone_receiver(),
            downstream.clone_sender(),
        );
        drop(upstream);
        drop(downstream);
        let meta = worker.meta();

        let feeder = async move {
            let mut tx = tx;
            for i in 0..9 {
                tx.send(i).await.unwrap();
            }
            tx.close();
        };
        let (report, _, forwarded) = tokio::join!(
            worker.run(StopSignal::never()),
            feeder,
            out.into_stream().collect::<Vec<_>>()
        );

        assert_eq!(forwarded, vec![0, 2, 4, 6, 8]);
        let report = report.unwrap();
        assert_eq!(report.items_processed, 5);
        assert_eq!(report.items_dropped, 4);
        assert_eq!(meta.current_item().as_str(), "#8");
    }

    #[tokio::test]
    async fn test_empty_input_processes_nothing() {
        let upstream = BoundedChannel::<u32>::new(1);
        let downstream = BoundedChannel::<u32>::new(1);
        let mut tx = upstream.clone_sender();
        let worker = Worker::transform(
            0,
            Evens { fail_setup: false },
            upstream.clone_receiver(),
            downstream.clone_sender(),
        );
        tx.close();

        let report = worker.run(StopSignal::never()).await.unwrap();
        assert_eq!(report.items_processed, 0);
        assert_eq!(report.status, WorkerStatus::Done);
    }

    #[tokio::test]
    async fn test_setup_failure_closes_handles_and_fails() {
        let upstream = BoundedChannel::<u32>::new(1);
        let downstream = BoundedChannel::<u32>::new(1);
        let up_probe = upstream.probe();
        let down_probe = downstream.probe();
        let worker = Worker::transform(
            2,
            Evens { fail_setup: true },
            upstream.clone_receiver(),
            downstream.clone_sender(),
        );
        let meta = worker.meta();

        let err = worker.run(StopSignal::never()).await.unwrap_err();
        assert!(err.is_setup());
        assert!(err.to_string().contains("no upstream"));
        assert_eq!(meta.status(), WorkerStatus::Failed);
        assert_eq!(meta.items_processed(), 0);
        assert_eq!(up_probe.live_receivers(), 0);
        assert!(down_probe.is_send_closed());
    }

    #[tokio::test]
    async fn test_sink_without_output_counts_results() {
        let chan = BoundedChannel::new(8);
        let mut tx = chan.clone_sender();
        let worker = Worker::sink(0, Evens { fail_setup: false }, chan.clone_receiver());
        for i in 0..6 {
            tx.send(i).await.unwrap();
        }
        tx.close();

        let report = worker.run(StopSignal::never()).await.unwrap();
        assert_eq!(report.items_processed, 3);
        assert_eq!(report.role, Role::Sink);
    }

    #[tokio::test]
    async fn test_closed_downstream_fails_worker() {
        let downstream = BoundedChannel::<u32>::new(1);
        let mut rx = downstream.clone_receiver();
        let worker = Worker::source(0, Counter { next: 0, count: 3 }, downstream.clone_sender());
        rx.close();

        let err = worker.run(StopSignal::never()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Channel {
                source: ChannelError::Closed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stop_request_terminates_source_then_done() {
        let chan = BoundedChannel::<u32>::new(4);
        let rx = chan.clone_receiver();
        let worker = Worker::source(0, Counter { next: 0, count: u32::MAX }, chan.clone_sender());
        drop(chan);
        let meta = worker.meta();
        let controller = StopController::new();
        let handle = tokio::spawn(worker.run(controller.signal()));

        let mut received = 0u64;
        while received < 10 {
            rx.recv().await.unwrap();
            received += 1;
        }
        controller.stop();
        while rx.recv().await.is_some() {
            received += 1;
        }

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.status, WorkerStatus::Done);
        assert_eq!(report.items_processed, received);
        assert!(meta.stop_time() >= meta.start_time());
    }

    #[tokio::test]
    async fn test_transform_ignores_stop_until_input_closes() {
        let upstream = BoundedChannel::<u32>::new(8);
        let downstream = BoundedChannel::<u32>::new(8);
        let mut tx = upstream.clone_sender();
        let out = downstream.clone_receiver();
        let worker = Worker::transform(
            0,
            Evens { fail_setup: false },
            upstream.clone_receiver(),
            downstream.clone_sender(),
        );
        drop(upstream);
        drop(downstream);
        let meta = worker.meta();

        for i in 0..6 {
            tx.send(i).await.unwrap();
        }
        let controller = StopController::new();
        controller.stop();
        let handle = tokio::spawn(worker.run(controller.signal()));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "upstream is still open");
        tx.close();

        let report = handle.await.unwrap().unwrap();
        let forwarded = out.into_stream().collect::<Vec<_>>().await;
        assert_eq!(forwarded, vec![0, 2, 4]);
        assert_eq!(report.items_processed, 3);
        assert_eq!(report.items_dropped, 3);
        assert_eq!(report.status, WorkerStatus::Done);
        assert!(meta.stop_time() >= meta.start_time());
    }
}
