//! Worker status state machine and progress record.
//!
//! [`WorkerMeta`] is written only by the worker that owns it and read
//! concurrently by the monitor. Every mutable field is an independently
//! replaceable scalar (atomics, plus an `ArcSwap` for the current-item
//! label), so reads never take a lock and never block the worker.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Pipeline role of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Source,
    Transform,
    Sink,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Source => "source",
            Role::Transform => "transform",
            Role::Sink => "sink",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a worker.
///
/// ```text
/// initializing ─▶ setting_up ─▶ running ─▶ done
///                     │            │  ▲
///                     │            ▼  │
///                     │        terminating
///                     ▼            │
///                   failed ◀───────┘ (also from running)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerStatus {
    Initializing = 0,
    SettingUp = 1,
    Running = 2,
    Terminating = 3,
    Done = 4,
    Failed = 5,
}

impl WorkerStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerStatus::Initializing,
            1 => WorkerStatus::SettingUp,
            2 => WorkerStatus::Running,
            3 => WorkerStatus::Terminating,
            4 => WorkerStatus::Done,
            _ => WorkerStatus::Failed,
        }
    }

    /// Whether `next` directly follows `self`.
    pub fn can_transition_to(self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        matches!(
            (self, next),
            (Initializing, SettingUp)
                | (SettingUp, Running)
                | (SettingUp, Failed)
                | (Running, Terminating)
                | (Running, Done)
                | (Running, Failed)
                | (Terminating, Done)
                | (Terminating, Failed)
        )
    }

    /// `done` and `failed` are never left.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerStatus::Done | WorkerStatus::Failed)
    }

    /// Not yet running, but will be.
    pub fn is_starting(self) -> bool {
        matches!(self, WorkerStatus::Initializing | WorkerStatus::SettingUp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Initializing => "initializing",
            WorkerStatus::SettingUp => "setting up",
            WorkerStatus::Running => "running",
            WorkerStatus::Terminating => "terminating",
            WorkerStatus::Done => "done",
            WorkerStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: WorkerStatus,
    pub to: WorkerStatus,
}

fn now_micros() -> u64 {
    to_micros(SystemTime::now())
}

fn to_micros(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_micros() as u64)
}

fn from_micros(micros: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_micros(micros)
}

/// Progress record of one worker.
#[derive(Debug)]
pub struct WorkerMeta {
    id: u32,
    role: Role,
    name: String,
    entity: String,
    item_unit: String,

    status: AtomicU8,
    /// Microseconds since the Unix epoch
    start_us: AtomicU64,
    /// Microseconds since the Unix epoch
    stop_us: AtomicU64,
    items_processed: AtomicU64,
    items_dropped: AtomicU64,
    current_item: ArcSwap<String>,
}

impl WorkerMeta {
    /// Create metadata in the `initializing` state. Both clock fields start
    /// at the creation time.
    pub fn new(
        id: u32,
        role: Role,
        name: impl Into<String>,
        entity: impl Into<String>,
        item_unit: impl Into<String>,
    ) -> Self {
        let now = now_micros();
        Self {
            id,
            role,
            name: name.into(),
            entity: entity.into(),
            item_unit: item_unit.into(),
            status: AtomicU8::new(WorkerStatus::Initializing as u8),
            start_us: AtomicU64::new(now),
            stop_us: AtomicU64::new(now),
            items_processed: AtomicU64::new(0),
            items_dropped: AtomicU64::new(0),
            current_item: ArcSwap::from_pointee(String::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-text label such as a file path or server address.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn item_unit(&self) -> &str {
        &self.item_unit
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.status() == WorkerStatus::Running
    }

    pub fn start_time(&self) -> SystemTime {
        from_micros(self.start_us.load(Ordering::Acquire))
    }

    pub fn stop_time(&self) -> SystemTime {
        from_micros(self.stop_us.load(Ordering::Acquire))
    }

    pub fn items_processed(&self) -> u64 {
        self.items_processed.load(Ordering::Acquire)
    }

    pub fn items_dropped(&self) -> u64 {
        self.items_dropped.load(Ordering::Acquire)
    }

    pub fn current_item(&self) -> Arc<String> {
        self.current_item.load_full()
    }

    /// Throughput since the clock was last reset.
    ///
    /// Zero while not running and when no time has elapsed.
    pub fn items_per_sec(&self) -> f64 {
        self.items_per_sec_at(SystemTime::now())
    }

    /// Throughput as seen at `now`.
    pub fn items_per_sec_at(&self, now: SystemTime) -> f64 {
        if !self.is_running() {
            return 0.0;
        }
        let elapsed = now
            .duration_since(self.start_time())
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        if elapsed > 0.0 {
            self.items_processed() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Move to `next`. Entering `running` resets the clock, entering
    /// `terminating` stops it.
    pub(crate) fn transition(&self, next: WorkerStatus) -> Result<(), InvalidTransition> {
        let current = self.status();
        if !current.can_transition_to(next) {
            return Err(InvalidTransition {
                from: current,
                to: next,
            });
        }
        tracing::debug!("{} changing state to: {}", self, next);
        match next {
            WorkerStatus::Running => self.reset_clock(),
            WorkerStatus::Terminating => self.stop_clock(),
            _ => {}
        }
        self.status.store(next as u8, Ordering::Release);
        Ok(())
    }

    fn reset_clock(&self) {
        self.start_us.store(now_micros(), Ordering::Release);
    }

    fn stop_clock(&self) {
        self.stop_us.store(now_micros(), Ordering::Release);
    }

    pub(crate) fn record_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_dropped(&self) {
        self.items_dropped.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn set_current_item(&self, label: String) {
        self.current_item.store(Arc::new(label));
    }

    /// Point-in-time copy of every field.
    pub fn snapshot(&self) -> MetaSnapshot {
        MetaSnapshot {
            id: self.id,
            role: self.role,
            name: self.name.clone(),
            entity: self.entity.clone(),
            status: self.status(),
            items_processed: self.items_processed(),
            items_dropped: self.items_dropped(),
            item_unit: self.item_unit.clone(),
            current_item: self.current_item().as_ref().clone(),
            items_per_sec: self.items_per_sec(),
            start_time_secs: self.start_us.load(Ordering::Acquire) as f64 / 1_000_000.0,
            stop_time_secs: self.stop_us.load(Ordering::Acquire) as f64 / 1_000_000.0,
        }
    }
}

impl std::fmt::Display for WorkerMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.entity.is_empty() {
            write!(f, "<{}[{}]>", self.name, self.id)
        } else {
            write!(f, "<{}[{}] {}>", self.name, self.id, self.entity)
        }
    }
}

/// Copy of a [`WorkerMeta`] taken at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct MetaSnapshot {
    pub id: u32,
    pub role: Role,
    pub name: String,
    pub entity: String,
    pub status: WorkerStatus,
    pub items_processed: u64,
    pub items_dropped: u64,
    pub item_unit: String,
    pub current_item: String,
    pub items_per_sec: f64,
    /// Seconds since the Unix epoch
    pub start_time_secs: f64,
    /// Seconds since the Unix epoch
    pub stop_time_secs: f64,
}
