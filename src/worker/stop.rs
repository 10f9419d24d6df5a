//! Early-stop signalling for workers.

use tokio::sync::watch;

/// Requests an early stop of the pipeline.
///
/// Only source workers act on the request: they stop producing and release
/// their senders. Downstream workers drain what is already queued and end
/// when their input closes.
#[derive(Debug)]
pub struct StopController {
    tx: watch::Sender<bool>,
}

impl StopController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// New signal bound to this controller.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Ask sources to stop after their current item.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for StopController {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`StopController`].
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl StopSignal {
    /// Signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Resolves once a stop has been requested. Pends forever if the
    /// controller is gone without requesting one.
    pub async fn requested(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            if rx.wait_for(|stop| *stop).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }

    pub fn is_requested(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_stop_reaches_every_signal() {
        let controller = StopController::new();
        let mut a = controller.signal();
        let mut b = a.clone();
        assert!(!a.is_requested());

        controller.stop();
        assert!(controller.is_stopped());
        timeout(Duration::from_millis(100), a.requested()).await.unwrap();
        timeout(Duration::from_millis(100), b.requested()).await.unwrap();
        assert!(b.is_requested());
    }

    #[tokio::test]
    async fn test_signal_issued_after_stop_fires() {
        let controller = StopController::new();
        controller.stop();
        let mut late = controller.signal();
        timeout(Duration::from_millis(100), late.requested()).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_controller_never_fires() {
        let controller = StopController::new();
        let mut signal = controller.signal();
        drop(controller);
        assert!(timeout(Duration::from_millis(50), signal.requested()).await.is_err());
        assert!(timeout(Duration::from_millis(50), StopSignal::never().requested()).await.is_err());
    }
}
