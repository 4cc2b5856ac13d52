// SPDX-License-Identifier: Apache-2.0

//! Per-session statistics counters.
//!
//! Updated lock-free from the producer path and the command task; snapshots
//! are serializable for operator diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters for one session. All increments are relaxed; these are
/// diagnostics, not synchronization.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Events successfully enqueued to the streaming queue.
    pub enqueued: AtomicU64,
    /// Enqueue attempts rejected (queue full or malformed event).
    pub enqueue_failures: AtomicU64,
    /// Events handed out via the copy-event fast path.
    pub copied: AtomicU64,
    /// Notifications delivered to the consumer.
    pub notifications: AtomicU64,
    /// Full-queue notifications suppressed by configuration.
    pub suppressed_full: AtomicU64,
}

impl SessionStats {
    pub fn record_enqueue(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueue_failure(&self) {
        self.enqueue_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_copy(&self) {
        self.copied.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot for reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            copied: self.copied.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            suppressed_full: self.suppressed_full.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of session statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub enqueue_failures: u64,
    pub copied: u64,
    pub notifications: u64,
    pub suppressed_full: u64,
}
