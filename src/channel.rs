//! Bounded MPMC channel with per-handle, reference-counted closure.
//!
//! ```text
//!                    ┌──────────────────────────┐
//!  ChannelSender ──▶ │                          │ ──▶ ChannelReceiver
//!  ChannelSender ──▶ │  async_channel (cap C)   │ ──▶ ChannelReceiver
//!  ChannelSender ──▶ │                          │
//!                    └──────────────────────────┘
//!                          HandleCounts
//!                   senders: 3   receivers: 2
//! ```
//!
//! Every handle is an independent clone that must be closed (or dropped)
//! on its own. The queue becomes closed-for-send only when the last live
//! sender closes; items already queued stay drainable, and receivers then
//! observe end-of-stream instead of hanging. Several transform workers can
//! therefore feed one downstream channel without any of them cutting off
//! its siblings.
//!
//! [`BoundedChannel`] is the factory the orchestrator creates. It is not a
//! handle itself: its endpoints are never counted, so the channel's life
//! is decided solely by the clones handed to workers.

use crate::error::ChannelError;
use futures::stream::{self, Stream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Live handle bookkeeping shared by every clone of one channel.
#[derive(Debug)]
struct HandleCounts {
    senders: AtomicUsize,
    receivers: AtomicUsize,
    send_closed: AtomicBool,
    /// Set once the first handle of either side is cloned out.
    opened: AtomicBool,
    capacity: usize,
}

impl HandleCounts {
    fn new(capacity: usize) -> Self {
        Self {
            senders: AtomicUsize::new(0),
            receivers: AtomicUsize::new(0),
            send_closed: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            capacity,
        }
    }
}

/// Fixed-capacity FIFO channel factory.
pub struct BoundedChannel<T> {
    tx: async_channel::Sender<T>,
    rx: async_channel::Receiver<T>,
    counts: Arc<HandleCounts>,
}

impl<T> BoundedChannel<T> {
    /// Create a channel holding at most `capacity` queued items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedChannel requires a capacity of at least 1");
        let (tx, rx) = async_channel::bounded(capacity);
        Self {
            tx,
            rx,
            counts: Arc::new(HandleCounts::new(capacity)),
        }
    }

    /// Hand out a new counted send handle.
    pub fn clone_sender(&self) -> ChannelSender<T> {
        ChannelSender::register(self.tx.clone(), self.counts.clone())
    }

    /// Hand out a new counted receive handle.
    pub fn clone_receiver(&self) -> ChannelReceiver<T> {
        ChannelReceiver::register(self.rx.clone(), self.counts.clone())
    }

    /// Observer that holds no counted endpoint.
    pub fn probe(&self) -> ChannelProbe<T> {
        ChannelProbe {
            rx: self.rx.clone(),
            counts: self.counts.clone(),
        }
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.counts.capacity
    }
}

impl<T> std::fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedChannel")
            .field("capacity", &self.counts.capacity)
            .field("senders", &self.counts.senders.load(Ordering::Acquire))
            .field("receivers", &self.counts.receivers.load(Ordering::Acquire))
            .field("queued", &self.rx.len())
            .finish()
    }
}

/// Counted send endpoint.
pub struct ChannelSender<T> {
    inner: async_channel::Sender<T>,
    counts: Arc<HandleCounts>,
    closed: bool,
}

impl<T> ChannelSender<T> {
    fn register(inner: async_channel::Sender<T>, counts: Arc<HandleCounts>) -> Self {
        counts.senders.fetch_add(1, Ordering::AcqRel);
        counts.opened.store(true, Ordering::Release);
        Self {
            inner,
            counts,
            closed: false,
        }
    }

    /// Enqueue `item`, suspending while the queue is at capacity.
    pub async fn send(&self, item: T) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.inner.send(item).await.map_err(|_| ChannelError::Closed)
    }

    /// Close this handle.
    ///
    /// Returns `true` when this was the last live sender, in which case the
    /// queue is now closed-for-send. Closing twice is a no-op.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        let last = self.counts.senders.fetch_sub(1, Ordering::AcqRel) == 1;
        if last {
            self.counts.send_closed.store(true, Ordering::Release);
            self.inner.close();
        }
        last
    }

    /// Whether sends through this handle can no longer succeed.
    pub fn is_closed(&self) -> bool {
        self.closed || self.inner.is_closed()
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.counts.capacity
    }
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        ChannelSender::register(self.inner.clone(), self.counts.clone())
    }
}

impl<T> Drop for ChannelSender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for ChannelSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSender")
            .field("closed", &self.is_closed())
            .field("queued", &self.len())
            .finish()
    }
}

/// Counted receive endpoint.
pub struct ChannelReceiver<T> {
    inner: async_channel::Receiver<T>,
    counts: Arc<HandleCounts>,
    closed: bool,
}

impl<T> ChannelReceiver<T> {
    fn register(inner: async_channel::Receiver<T>, counts: Arc<HandleCounts>) -> Self {
        counts.receivers.fetch_add(1, Ordering::AcqRel);
        counts.opened.store(true, Ordering::Release);
        Self {
            inner,
            counts,
            closed: false,
        }
    }

    /// Next item, suspending while the queue is empty and still open.
    ///
    /// Returns `None` at end-of-stream: the queue is empty and every sender
    /// has closed, or this handle was closed.
    pub async fn recv(&self) -> Option<T> {
        if self.closed {
            return None;
        }
        self.inner.recv().await.ok()
    }

    /// Consume the handle as a single-pass stream of items.
    pub fn into_stream(self) -> impl Stream<Item = T> {
        stream::unfold(self, |rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
    }

    /// Close this handle.
    ///
    /// Returns `true` when this was the last live receiver. With nobody left
    /// to drain the queue the channel is closed, so senders fail fast with
    /// [`ChannelError::Closed`] instead of blocking at capacity forever.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        let last = self.counts.receivers.fetch_sub(1, Ordering::AcqRel) == 1;
        if last {
            self.inner.close();
        }
        last
    }

    /// Whether the handle is closed, or the queue is drained and closed-for-send.
    pub fn is_finished(&self) -> bool {
        self.closed || (self.inner.is_closed() && self.inner.is_empty())
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T> Clone for ChannelReceiver<T> {
    fn clone(&self) -> Self {
        ChannelReceiver::register(self.inner.clone(), self.counts.clone())
    }
}

impl<T> Drop for ChannelReceiver<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for ChannelReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelReceiver")
            .field("closed", &self.closed)
            .field("queued", &self.len())
            .finish()
    }
}

/// Read-only view of a channel's handle counts and queue depth.
///
/// Holds an uncounted endpoint that is only used to read the queue length;
/// it never receives.
pub struct ChannelProbe<T> {
    rx: async_channel::Receiver<T>,
    counts: Arc<HandleCounts>,
}

impl<T> ChannelProbe<T> {
    pub fn live_senders(&self) -> usize {
        self.counts.senders.load(Ordering::Acquire)
    }

    pub fn live_receivers(&self) -> usize {
        self.counts.receivers.load(Ordering::Acquire)
    }

    /// Whether the last sender has closed.
    pub fn is_send_closed(&self) -> bool {
        self.counts.send_closed.load(Ordering::Acquire)
    }

    /// Handles were cloned out and both sides have released every one.
    /// A channel that never had a handle is not torn down.
    pub fn is_torn_down(&self) -> bool {
        self.counts.opened.load(Ordering::Acquire)
            && self.live_senders() == 0
            && self.live_receivers() == 0
    }

    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.counts.capacity
    }
}

impl<T> Clone for ChannelProbe<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            counts: self.counts.clone(),
        }
    }
}
