//! Counters for the sync engine.
//!
//! Every counter is a relaxed `AtomicU64`: writers are the ingestion tasks,
//! readers are logs and tests, and nothing orders on these values.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-symbol counters
#[derive(Debug, Default)]
pub struct SymbolMetrics {
    diffs_received: AtomicU64,
    diffs_applied: AtomicU64,
    diffs_buffered: AtomicU64,
    diffs_stale: AtomicU64,
    gaps: AtomicU64,
    snapshots_installed: AtomicU64,
    crossed_repairs: AtomicU64,
    trades_received: AtomicU64,
    messages_since_flush: AtomicU64,
}

/// Point-in-time copy of [`SymbolMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolMetricsSnapshot {
    /// Diffs routed to this symbol
    pub diffs_received: u64,
    /// Diffs applied to a synced book, including bootstrap replay
    pub diffs_applied: u64,
    /// Diffs queued while bootstrapping
    pub diffs_buffered: u64,
    /// Diffs discarded as already covered
    pub diffs_stale: u64,
    /// Sequence gaps detected
    pub gaps: u64,
    /// Snapshots installed
    pub snapshots_installed: u64,
    /// Crossed-book repairs
    pub crossed_repairs: u64,
    /// Trades recorded
    pub trades_received: u64,
    /// Diffs and trades since the last drain
    pub messages_since_flush: u64,
}

impl SymbolMetrics {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_diffs_received(&self) {
        self.diffs_received.fetch_add(1, Ordering::Relaxed);
        self.messages_since_flush.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_diffs_applied(&self, n: u64) {
        self.diffs_applied.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_diffs_buffered(&self) {
        self.diffs_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_diffs_stale(&self, n: u64) {
        self.diffs_stale.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_gaps(&self) {
        self.gaps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_snapshots_installed(&self) {
        self.snapshots_installed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_crossed_repairs(&self, n: u64) {
        self.crossed_repairs.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_trades_received(&self) {
        self.trades_received.fetch_add(1, Ordering::Relaxed);
        self.messages_since_flush.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset the since-flush counter, returning its previous value
    pub(crate) fn take_messages_since_flush(&self) -> u64 {
        self.messages_since_flush.swap(0, Ordering::Relaxed)
    }

    /// Copy all counters
    #[must_use]
    pub fn snapshot(&self) -> SymbolMetricsSnapshot {
        SymbolMetricsSnapshot {
            diffs_received: self.diffs_received.load(Ordering::Relaxed),
            diffs_applied: self.diffs_applied.load(Ordering::Relaxed),
            diffs_buffered: self.diffs_buffered.load(Ordering::Relaxed),
            diffs_stale: self.diffs_stale.load(Ordering::Relaxed),
            gaps: self.gaps.load(Ordering::Relaxed),
            snapshots_installed: self.snapshots_installed.load(Ordering::Relaxed),
            crossed_repairs: self.crossed_repairs.load(Ordering::Relaxed),
            trades_received: self.trades_received.load(Ordering::Relaxed),
            messages_since_flush: self.messages_since_flush.load(Ordering::Relaxed),
        }
    }
}

/// Engine-wide counters not tied to a registered symbol
#[derive(Debug, Default)]
pub struct SyncMetrics {
    unknown_symbol_messages: AtomicU64,
    flushes: AtomicU64,
}

impl SyncMetrics {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_unknown_symbol_messages(&self) {
        self.unknown_symbol_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_flushes(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages dropped because their symbol was not registered
    pub fn unknown_symbol_messages(&self) -> u64 {
        self.unknown_symbol_messages.load(Ordering::Relaxed)
    }

    /// Periodic and final flushes written, each covering every symbol
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}
