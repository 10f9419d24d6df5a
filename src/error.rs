//! Error types for channels and workers.
//!
//! Item-level failures never show up here: they are turned into outcome
//! labels by the stage that hit them. These types cover the failures that
//! end a worker.

use thiserror::Error;

/// Channel errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The send side is fully closed, the handle was already closed, or no
    /// receiver is left to drain the queue.
    #[error("channel closed")]
    Closed,
}

/// Errors that terminate a single worker.
///
/// `worker` is the worker's display label (`<name[id] entity>`).
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The one-shot setup step failed; no item was processed.
    #[error("{worker} setup failed: {source:#}")]
    Setup {
        worker: String,
        #[source]
        source: anyhow::Error,
    },

    /// The run-loop failed after setup (e.g. the input file became unreadable).
    #[error("{worker} failed while running: {source:#}")]
    Run {
        worker: String,
        #[source]
        source: anyhow::Error,
    },

    /// Forwarding to the downstream channel failed.
    #[error("{worker} could not forward item: {source}")]
    Channel {
        worker: String,
        #[source]
        source: ChannelError,
    },

    /// The worker task panicked or was aborted.
    #[error("{worker} panicked or was aborted")]
    Panicked { worker: String },
}

impl WorkerError {
    /// Label of the worker that failed.
    pub fn worker(&self) -> &str {
        match self {
            WorkerError::Setup { worker, .. }
            | WorkerError::Run { worker, .. }
            | WorkerError::Channel { worker, .. }
            | WorkerError::Panicked { worker } => worker,
        }
    }

    /// Whether the failure happened before any item was processed.
    pub fn is_setup(&self) -> bool {
        matches!(self, WorkerError::Setup { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChannelError::Closed;
        assert_eq!(err.to_string(), "channel closed");

        let err = WorkerError::Setup {
            worker: "<DomainResolver[0] 10.0.0.1>".into(),
            source: anyhow::anyhow!("invalid nameserver"),
        };
        assert!(err.to_string().contains("setup failed"));
        assert!(err.to_string().contains("invalid nameserver"));
        assert!(err.is_setup());

        let err = WorkerError::Channel {
            worker: "<CSVReader[0]>".into(),
            source: ChannelError::Closed,
        };
        assert!(err.to_string().contains("channel closed"));
        assert_eq!(err.worker(), "<CSVReader[0]>");
        assert!(!err.is_setup());
    }
}
