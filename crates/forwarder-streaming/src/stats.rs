//! # Forwarder Statistics
//!
//! Lock-free counters a running loop publishes for health and metrics
//! endpoints.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};

/// Lifecycle of a forwarding loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    /// Polling and forwarding batches
    Running,
    /// Shutdown observed, releasing the consumer
    Draining,
    /// Not running
    Stopped,
}

impl LoopState {
    fn to_u8(self) -> u8 {
        match self {
            LoopState::Running => 0,
            LoopState::Draining => 1,
            LoopState::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::Running,
            1 => LoopState::Draining,
            _ => LoopState::Stopped,
        }
    }
}

/// Counters shared between a loop and its observers
#[derive(Debug)]
pub struct ForwarderStats {
    state: AtomicU8,
    batches_polled: AtomicU64,
    batches_committed: AtomicU64,
    messages_forwarded: AtomicU64,
    messages_skipped: AtomicU64,
    fatal_errors: AtomicU64,
    last_commit_ms: AtomicI64,
    started_at: DateTime<Utc>,
}

/// Point-in-time copy of [`ForwarderStats`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub state: LoopState,
    pub batches_polled: u64,
    pub batches_committed: u64,
    pub messages_forwarded: u64,
    pub messages_skipped: u64,
    pub fatal_errors: u64,
    pub last_commit: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

impl Default for ForwarderStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwarderStats {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LoopState::Stopped.to_u8()),
            batches_polled: AtomicU64::new(0),
            batches_committed: AtomicU64::new(0),
            messages_forwarded: AtomicU64::new(0),
            messages_skipped: AtomicU64::new(0),
            fatal_errors: AtomicU64::new(0),
            last_commit_ms: AtomicI64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: LoopState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    pub fn record_poll(&self) {
        self.batches_polled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.messages_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.messages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.last_commit_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_fatal_error(&self) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last_commit_ms = self.last_commit_ms.load(Ordering::Relaxed);

        StatsSnapshot {
            state: self.state(),
            batches_polled: self.batches_polled.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            messages_forwarded: self.messages_forwarded.load(Ordering::Relaxed),
            messages_skipped: self.messages_skipped.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
            last_commit: (last_commit_ms > 0)
                .then(|| Utc.timestamp_millis_opt(last_commit_ms).single())
                .flatten(),
            started_at: self.started_at,
        }
    }
}
