//! Coordinator owning every tracked symbol's book and buffers.
//!
//! [`OrderBookSync`] routes incoming diffs and trades to the state of their
//! symbol, drives bootstrap and resync, and hands batches to the flush
//! scheduler.
//!
//! # Locking
//!
//! The symbol map sits behind one `parking_lot::RwLock` that is only written
//! on register/deregister. Each symbol has its own `RwLock` around the book,
//! so ingestion for different symbols never contends. Applied diffs are
//! appended to the update log while the book lock is still held, which keeps
//! the log in application order.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use super::accumulator::{TradeAccumulator, UpdateLog};
use super::book::{ApplyOutcome, BookView, OrderBookState, RepairReport, SyncState, DEFAULT_MAX_PENDING};
use crate::metrics::{SymbolMetrics, SymbolMetricsSnapshot, SyncMetrics};
use crate::types::{BookSnapshot, DiffMessage, TradeMessage, UpdateId};

/// What the coordinator did with a message or snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Diff applied to a synced book
    Applied {
        /// A crossed-book repair ran after the apply
        repaired: bool,
    },
    /// Diff queued behind a bootstrap already in progress
    Buffered,
    /// Diff queued and a bootstrap started; fetch a snapshot
    NeedSnapshot,
    /// Diff already covered by the book
    Stale,
    /// Gap detected; the book is buffering again and needs a snapshot
    Resync {
        /// Expected first update id
        expected: UpdateId,
        /// First update id received
        got: UpdateId,
    },
    /// Trade appended to the accumulator
    Recorded,
    /// Symbol is not registered; message dropped
    UnknownSymbol,
    /// Snapshot installed and buffer replayed
    Synced {
        /// Buffered diffs covered by the snapshot
        discarded: usize,
        /// Buffered diffs replayed on top of it
        replayed: usize,
    },
    /// Snapshot arrived while the book was not buffering
    Ignored,
}

impl SyncAction {
    /// Whether the caller must fetch and install a snapshot
    #[must_use]
    pub const fn needs_snapshot(&self) -> bool {
        matches!(self, SyncAction::NeedSnapshot | SyncAction::Resync { .. })
    }
}

/// Everything drained from one symbol by a flush
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushBatch {
    /// Diffs applied since the previous drain, in application order
    pub updates: Vec<DiffMessage>,
    /// Trades received since the previous drain, in arrival order
    pub trades: Vec<TradeMessage>,
    /// Diffs and trades routed to the symbol since the previous drain
    pub messages: u64,
}

#[derive(Debug)]
struct SymbolEntry {
    book: RwLock<OrderBookState>,
    trades: TradeAccumulator,
    updates: UpdateLog,
    metrics: SymbolMetrics,
}

impl SymbolEntry {
    fn new(symbol: &str, max_pending: usize) -> Self {
        Self {
            book: RwLock::new(OrderBookState::with_max_pending(symbol, max_pending)),
            trades: TradeAccumulator::new(),
            updates: UpdateLog::new(),
            metrics: SymbolMetrics::new(),
        }
    }

    fn record_repairs(&self, symbol: &str, repairs: &[RepairReport]) {
        for repair in repairs {
            warn!(
                symbol,
                best_bid = %repair.best_bid,
                best_ask = %repair.best_ask,
                removed_bids = repair.removed_bids,
                removed_asks = repair.removed_asks,
                "Crossed book repaired"
            );
        }
        self.metrics.add_crossed_repairs(repairs.len() as u64);
    }
}

/// Coordinator for all tracked symbols.
///
/// Safe to share across tasks via `Arc<OrderBookSync>`.
///
/// # Example
///
/// ```rust
/// use depth_recorder::orderbook::{OrderBookSync, SyncAction};
/// use depth_recorder::types::{BookSnapshot, DiffMessage};
///
/// let sync = OrderBookSync::new();
/// sync.register("BTCUSDT");
///
/// // The first diff starts a bootstrap
/// let action = sync.on_diff(DiffMessage::new("BTCUSDT", 101, 105));
/// assert!(action.needs_snapshot());
///
/// let snapshot = BookSnapshot::new(100, vec![], vec![]);
/// let action = sync.install_snapshot("BTCUSDT", &snapshot);
/// assert_eq!(action, SyncAction::Synced { discarded: 0, replayed: 1 });
/// ```
#[derive(Debug)]
pub struct OrderBookSync {
    books: RwLock<FxHashMap<String, Arc<SymbolEntry>>>,
    max_pending: usize,
    metrics: SyncMetrics,
}

impl Default for OrderBookSync {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBookSync {
    /// Create an empty coordinator
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }

    /// Create an empty coordinator whose books buffer at most `max_pending`
    /// diffs while bootstrapping
    #[must_use]
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            books: RwLock::new(FxHashMap::default()),
            max_pending,
            metrics: SyncMetrics::new(),
        }
    }

    /// Start tracking a symbol.
    ///
    /// Returns `false` if it was already registered.
    pub fn register(&self, symbol: &str) -> bool {
        let symbol = symbol.to_ascii_uppercase();
        let mut books = self.books.write();
        if books.contains_key(&symbol) {
            return false;
        }
        debug!(symbol = %symbol, "Registered symbol");
        let entry = Arc::new(SymbolEntry::new(&symbol, self.max_pending));
        books.insert(symbol, entry);
        true
    }

    /// Stop tracking a symbol, discarding its state.
    ///
    /// Returns `false` if it was not registered.
    pub fn deregister(&self, symbol: &str) -> bool {
        let removed = self.books.write().remove(&symbol.to_ascii_uppercase());
        if removed.is_some() {
            debug!(symbol, "Deregistered symbol");
        }
        removed.is_some()
    }

    /// Registered symbols, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.books.read().keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }

    /// Number of registered symbols
    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    /// Whether no symbol is registered
    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    /// Route one diff to its book
    pub fn on_diff(&self, diff: DiffMessage) -> SyncAction {
        let Some(entry) = self.entry(&diff.symbol) else {
            return self.unknown_symbol(&diff.symbol, "diff");
        };
        entry.metrics.inc_diffs_received();

        let mut book = entry.book.write();
        match book.apply(diff) {
            ApplyOutcome::Applied { diff, repair } => {
                entry.updates.append(diff);
                entry.metrics.add_diffs_applied(1);
                let repaired = repair.is_some();
                if let Some(repair) = repair {
                    entry.record_repairs(book.symbol(), &[repair]);
                }
                SyncAction::Applied { repaired }
            }
            ApplyOutcome::Buffered { bootstrap_started } => {
                entry.metrics.inc_diffs_buffered();
                if bootstrap_started {
                    debug!(symbol = book.symbol(), "First diff received, bootstrapping");
                    SyncAction::NeedSnapshot
                } else {
                    SyncAction::Buffered
                }
            }
            ApplyOutcome::Stale => {
                entry.metrics.add_diffs_stale(1);
                debug!(symbol = book.symbol(), "Discarded stale diff");
                SyncAction::Stale
            }
            ApplyOutcome::Gap { expected, got } => {
                entry.metrics.inc_gaps();
                warn!(symbol = book.symbol(), expected, got, "Sequence gap, resyncing");
                book.begin_bootstrap();
                SyncAction::Resync { expected, got }
            }
        }
    }

    /// Append one trade to its symbol's accumulator
    pub fn on_trade(&self, trade: TradeMessage) -> SyncAction {
        let Some(entry) = self.entry(&trade.symbol) else {
            return self.unknown_symbol(&trade.symbol, "trade");
        };
        entry.metrics.inc_trades_received();
        entry.trades.append(trade);
        SyncAction::Recorded
    }

    /// Install a fetched snapshot and replay the symbol's buffered diffs
    pub fn install_snapshot(&self, symbol: &str, snapshot: &BookSnapshot) -> SyncAction {
        let Some(entry) = self.entry(symbol) else {
            return self.unknown_symbol(symbol, "snapshot");
        };

        let mut book = entry.book.write();
        let Some(report) = book.install_snapshot(snapshot) else {
            debug!(
                symbol,
                state = ?book.sync_state(),
                "Ignoring snapshot, book is not bootstrapping"
            );
            return SyncAction::Ignored;
        };

        entry.metrics.inc_snapshots_installed();
        entry.metrics.add_diffs_stale(report.discarded as u64);
        entry.metrics.add_diffs_applied(report.applied.len() as u64);
        entry.record_repairs(book.symbol(), &report.repairs);

        let replayed = report.applied.len();
        for diff in report.applied {
            entry.updates.append(diff);
        }

        if let Some((expected, got)) = report.gap {
            entry.metrics.inc_gaps();
            warn!(
                symbol,
                snapshot_id = snapshot.last_update_id,
                expected,
                got,
                "Buffered diffs do not connect to snapshot, resyncing"
            );
            book.begin_bootstrap();
            return SyncAction::Resync { expected, got };
        }

        info!(
            symbol,
            last_update_id = ?book.last_update_id(),
            discarded = report.discarded,
            replayed,
            "Book synced"
        );
        SyncAction::Synced {
            discarded: report.discarded,
            replayed,
        }
    }

    /// Copy of a symbol's book
    pub fn view(&self, symbol: &str) -> Option<BookView> {
        self.entry(symbol).map(|e| e.book.read().view())
    }

    /// Copy of the best `depth` levels of a symbol's book
    pub fn view_depth(&self, symbol: &str, depth: usize) -> Option<BookView> {
        self.entry(symbol)
            .map(|e| e.book.read().view_depth(Some(depth)))
    }

    /// Synchronization state of a symbol
    pub fn sync_state(&self, symbol: &str) -> Option<SyncState> {
        self.entry(symbol).map(|e| e.book.read().sync_state())
    }

    /// Symbols whose book is not synced
    pub fn symbols_needing_snapshot(&self) -> Vec<String> {
        let books = self.books.read();
        let mut symbols: Vec<String> = books
            .iter()
            .filter(|(_, entry)| !entry.book.read().sync_state().is_synced())
            .map(|(symbol, _)| symbol.clone())
            .collect();
        symbols.sort_unstable();
        symbols
    }

    /// Take the update log and trades accumulated for a symbol
    pub fn drain(&self, symbol: &str) -> Option<FlushBatch> {
        let entry = self.entry(symbol)?;
        Some(FlushBatch {
            updates: entry.updates.drain(),
            trades: entry.trades.drain(),
            messages: entry.metrics.take_messages_since_flush(),
        })
    }

    /// Counters for one symbol
    pub fn metrics(&self, symbol: &str) -> Option<SymbolMetricsSnapshot> {
        self.entry(symbol).map(|e| e.metrics.snapshot())
    }

    /// Engine-wide counters
    pub fn sync_metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    fn entry(&self, symbol: &str) -> Option<Arc<SymbolEntry>> {
        let books = self.books.read();
        if let Some(entry) = books.get(symbol) {
            return Some(Arc::clone(entry));
        }
        books.get(&symbol.to_ascii_uppercase()).cloned()
    }

    fn unknown_symbol(&self, symbol: &str, kind: &'static str) -> SyncAction {
        self.metrics.inc_unknown_symbol_messages();
        warn!(symbol, kind, "Dropping message for unregistered symbol");
        SyncAction::UnknownSymbol
    }
}
