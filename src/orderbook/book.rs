//! Per-symbol order book with the depth-diff synchronization state machine.
//!
//! ```text
//! Uninitialized ──first diff──▶ Buffering ──snapshot──▶ Synced
//!                                   ▲                      │ gap
//!                                   └──── Resyncing ◀──────┘
//! ```
//!
//! While buffering, diffs are queued instead of applied. A snapshot replaces
//! both sides, buffered diffs already covered by it are discarded, and the
//! rest are replayed in ascending `first_update_id` order. Once synced, every
//! diff must start exactly at `last_update_id + 1`.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use tracing::warn;

use super::levels::PriceLevelMap;
use crate::types::{BookSnapshot, DiffMessage, Price, PriceLevel, Side, UpdateId};

/// Default bound on diffs queued while waiting for a snapshot
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// Synchronization state of a book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// No diff or snapshot seen yet
    Uninitialized,
    /// Queueing diffs until a snapshot is installed
    Buffering,
    /// Applying diffs as they arrive
    Synced,
    /// Gap detected, waiting for bootstrap to restart
    Resyncing,
}

impl SyncState {
    /// Whether the book can be trusted by readers
    #[must_use]
    pub const fn is_synced(self) -> bool {
        matches!(self, SyncState::Synced)
    }
}

/// Levels removed by one crossed-book repair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairReport {
    /// Best bid before the repair
    pub best_bid: Price,
    /// Best ask before the repair
    pub best_ask: Price,
    /// Bids removed (priced at or above `best_ask`)
    pub removed_bids: usize,
    /// Asks removed (priced at or below `best_bid`)
    pub removed_asks: usize,
}

/// Result of feeding one diff to a book
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Diff applied; handed back for the update log
    Applied {
        /// The applied diff
        diff: DiffMessage,
        /// Crossed-book repair triggered by this diff
        repair: Option<RepairReport>,
    },
    /// Diff queued for replay after the next snapshot
    Buffered {
        /// This diff started a bootstrap, a snapshot must be fetched
        bootstrap_started: bool,
    },
    /// Diff already covered by the book, dropped
    Stale,
    /// Diff skipped ids; the book moved to [`SyncState::Resyncing`]
    Gap {
        /// Expected first update id
        expected: UpdateId,
        /// First update id received
        got: UpdateId,
    },
}

/// What happened while installing a snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootstrapReport {
    /// Buffered diffs dropped because the snapshot already covers them
    pub discarded: usize,
    /// Buffered diffs replayed on top of the snapshot, in order
    pub applied: Vec<DiffMessage>,
    /// Crossed-book repairs performed during install and replay
    pub repairs: Vec<RepairReport>,
    /// `(expected, got)` when the buffer does not connect to the snapshot
    pub gap: Option<(UpdateId, UpdateId)>,
}

/// Immutable copy of a book for readers
#[derive(Debug, Clone, PartialEq)]
pub struct BookView {
    /// Symbol
    pub symbol: String,
    /// State at the time of the copy
    pub sync_state: SyncState,
    /// Last applied update id
    pub last_update_id: Option<UpdateId>,
    /// Bids, highest price first
    pub bids: Vec<PriceLevel>,
    /// Asks, lowest price first
    pub asks: Vec<PriceLevel>,
}

impl BookView {
    /// Best (highest) bid
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    /// Best (lowest) ask
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// Average of best bid and best ask
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some((bid.price + ask.price) / Decimal::TWO)
    }

    /// Best ask minus best bid
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some(ask.price - bid.price)
    }

    /// Whether best bid >= best ask
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }
}

/// Order book for a single symbol.
///
/// # Thread Safety
///
/// Not internally synchronized. [`OrderBookSync`](super::OrderBookSync)
/// keeps each book behind its own `parking_lot::RwLock`.
#[derive(Debug, Clone)]
pub struct OrderBookState {
    symbol: String,
    bids: PriceLevelMap,
    asks: PriceLevelMap,
    /// Set by every snapshot install, advanced by every applied diff
    last_update_id: Option<UpdateId>,
    state: SyncState,
    /// Diffs waiting for a snapshot, in arrival order
    pending: VecDeque<DiffMessage>,
    max_pending: usize,
    pending_dropped: u64,
}

impl OrderBookState {
    /// Create an uninitialized book
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self::with_max_pending(symbol, DEFAULT_MAX_PENDING)
    }

    /// Create an uninitialized book with a custom bootstrap buffer bound
    #[must_use]
    pub fn with_max_pending(symbol: impl Into<String>, max_pending: usize) -> Self {
        Self {
            symbol: symbol.into(),
            bids: PriceLevelMap::new(Side::Bid),
            asks: PriceLevelMap::new(Side::Ask),
            last_update_id: None,
            state: SyncState::Uninitialized,
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            pending_dropped: 0,
        }
    }

    /// Symbol this book tracks
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Current synchronization state
    #[must_use]
    pub const fn sync_state(&self) -> SyncState {
        self.state
    }

    /// Last applied update id
    #[must_use]
    pub const fn last_update_id(&self) -> Option<UpdateId> {
        self.last_update_id
    }

    /// Number of diffs waiting for a snapshot
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Diffs dropped because the bootstrap buffer was full
    #[must_use]
    pub const fn pending_dropped(&self) -> u64 {
        self.pending_dropped
    }

    /// Enter [`SyncState::Buffering`] from `Uninitialized` or `Resyncing`.
    ///
    /// Returns `true` when the caller must now fetch a snapshot.
    pub fn begin_bootstrap(&mut self) -> bool {
        match self.state {
            SyncState::Uninitialized | SyncState::Resyncing => {
                self.state = SyncState::Buffering;
                true
            }
            SyncState::Buffering | SyncState::Synced => false,
        }
    }

    /// Feed one diff to the book
    pub fn apply(&mut self, diff: DiffMessage) -> ApplyOutcome {
        match self.state {
            SyncState::Uninitialized => {
                self.state = SyncState::Buffering;
                self.buffer(diff);
                ApplyOutcome::Buffered {
                    bootstrap_started: true,
                }
            }
            SyncState::Buffering | SyncState::Resyncing => {
                self.buffer(diff);
                ApplyOutcome::Buffered {
                    bootstrap_started: false,
                }
            }
            SyncState::Synced => {
                // Nothing can follow an id of u64::MAX
                let Some(expected) = self.last_update_id.unwrap_or_default().checked_add(1) else {
                    return ApplyOutcome::Stale;
                };
                if diff.first_update_id < expected {
                    return ApplyOutcome::Stale;
                }
                if diff.first_update_id > expected {
                    let got = diff.first_update_id;
                    self.state = SyncState::Resyncing;
                    self.pending.clear();
                    self.buffer(diff);
                    return ApplyOutcome::Gap { expected, got };
                }

                self.apply_levels(&diff);
                self.last_update_id = Some(diff.final_update_id);
                let repair = self.repair_crossed();
                ApplyOutcome::Applied { diff, repair }
            }
        }
    }

    /// Install a snapshot and replay the bootstrap buffer.
    ///
    /// Returns `None` when the book is not buffering (the snapshot is stale
    /// news and is ignored). Otherwise both sides are replaced, buffered diffs
    /// with `final_update_id <= snapshot.last_update_id` are discarded and the
    /// rest replayed in ascending `first_update_id` order. The first replayed
    /// diff may straddle the snapshot id; later ones overlapping the last
    /// applied id are discarded, as a synced book drops them as stale. A hole
    /// sends the book to [`SyncState::Resyncing`] with the unreplayed diffs
    /// kept queued.
    pub fn install_snapshot(&mut self, snapshot: &BookSnapshot) -> Option<BootstrapReport> {
        if self.state != SyncState::Buffering {
            return None;
        }

        let mut report = BootstrapReport::default();
        self.bids.replace(snapshot.bids.iter().copied());
        self.asks.replace(snapshot.asks.iter().copied());
        let mut last = snapshot.last_update_id;
        self.last_update_id = Some(last);
        report.repairs.extend(self.repair_crossed());

        let mut buffered: Vec<DiffMessage> = std::mem::take(&mut self.pending).into();
        buffered.sort_by_key(|diff| diff.first_update_id);

        let mut replay = buffered.into_iter();
        while let Some(diff) = replay.next() {
            let overlaps = !report.applied.is_empty() && diff.first_update_id <= last;
            if diff.final_update_id <= last || overlaps {
                report.discarded += 1;
                continue;
            }
            let expected = last.saturating_add(1);
            if diff.first_update_id > expected {
                report.gap = Some((expected, diff.first_update_id));
                self.state = SyncState::Resyncing;
                self.pending.push_back(diff);
                self.pending.extend(replay.by_ref());
                return Some(report);
            }

            self.apply_levels(&diff);
            last = diff.final_update_id;
            self.last_update_id = Some(last);
            report.repairs.extend(self.repair_crossed());
            report.applied.push(diff);
        }

        self.state = SyncState::Synced;
        Some(report)
    }

    /// Copy the whole book
    #[must_use]
    pub fn view(&self) -> BookView {
        self.view_depth(None)
    }

    /// Copy the best `depth` levels of each side (all when `None`)
    #[must_use]
    pub fn view_depth(&self, depth: Option<usize>) -> BookView {
        BookView {
            symbol: self.symbol.clone(),
            sync_state: self.state,
            last_update_id: self.last_update_id,
            bids: self.bids.to_vec(depth),
            asks: self.asks.to_vec(depth),
        }
    }

    /// Best (highest) bid
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.best()
    }

    /// Best (lowest) ask
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.best()
    }

    /// Whether best bid >= best ask
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    /// Number of levels per side as `(bids, asks)`
    #[must_use]
    pub fn num_levels(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Drop all levels and pending diffs and return to `Uninitialized`
    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.pending.clear();
        self.last_update_id = None;
        self.state = SyncState::Uninitialized;
    }

    fn buffer(&mut self, diff: DiffMessage) {
        if self.pending.len() >= self.max_pending {
            self.pending.pop_front();
            self.pending_dropped += 1;
            warn!(
                symbol = %self.symbol,
                capacity = self.max_pending,
                "Bootstrap buffer full, dropping oldest diff"
            );
        }
        self.pending.push_back(diff);
    }

    fn apply_levels(&mut self, diff: &DiffMessage) {
        for &(price, size) in &diff.bid_updates {
            self.bids.apply(price, size);
        }
        for &(price, size) in &diff.ask_updates {
            self.asks.apply(price, size);
        }
    }

    /// Uncross the book in a single pass.
    ///
    /// Both thresholds are read once before anything is removed: every bid at
    /// or above the original best ask and every ask at or below the original
    /// best bid goes. Surviving bids are then below the old best ask and
    /// surviving asks above the old best bid, so the book cannot stay crossed.
    fn repair_crossed(&mut self) -> Option<RepairReport> {
        let best_bid = self.bids.best()?.price;
        let best_ask = self.asks.best()?.price;
        if best_bid < best_ask {
            return None;
        }

        let removed_bids = self.bids.remove_at_or_above(best_ask);
        let removed_asks = self.asks.remove_at_or_below(best_bid);
        debug_assert!(!self.is_crossed());

        Some(RepairReport {
            best_bid,
            best_ask,
            removed_bids,
            removed_asks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn synced_book(
        last_update_id: UpdateId,
        bids: &[(Decimal, Decimal)],
        asks: &[(Decimal, Decimal)],
    ) -> OrderBookState {
        let mut book = OrderBookState::new("BTCUSDT");
        assert!(book.begin_bootstrap());
        let snapshot = BookSnapshot::new(last_update_id, bids.to_vec(), asks.to_vec());
        let report = book.install_snapshot(&snapshot).unwrap();
        assert!(report.gap.is_none());
        assert_eq!(book.sync_state(), SyncState::Synced);
        book
    }

    fn prices(levels: &[PriceLevel]) -> Vec<Decimal> {
        levels.iter().map(|l| l.price).collect()
    }

    #[test]
    fn test_new_book_is_uninitialized() {
        let book = OrderBookState::new("BTCUSDT");
        assert_eq!(book.symbol(), "BTCUSDT");
        assert_eq!(book.sync_state(), SyncState::Uninitialized);
        assert_eq!(book.last_update_id(), None);
        assert_eq!(book.num_levels(), (0, 0));
    }

    #[test]
    fn test_first_diff_starts_bootstrap() {
        let mut book = OrderBookState::new("BTCUSDT");
        let outcome = book.apply(DiffMessage::new("BTCUSDT", 10, 12));
        assert_eq!(
            outcome,
            ApplyOutcome::Buffered {
                bootstrap_started: true
            }
        );
        assert_eq!(book.sync_state(), SyncState::Buffering);

        let outcome = book.apply(DiffMessage::new("BTCUSDT", 13, 15));
        assert_eq!(
            outcome,
            ApplyOutcome::Buffered {
                bootstrap_started: false
            }
        );
        assert_eq!(book.pending_len(), 2);
        assert_eq!(book.num_levels(), (0, 0));
    }

    #[test]
    fn test_zero_size_removes_bid() {
        let mut book = synced_book(100, &[(dec!(10), dec!(5))], &[(dec!(11), dec!(1))]);
        let diff = DiffMessage::new("BTCUSDT", 101, 101).with_bid(dec!(10), dec!(0));

        assert!(matches!(book.apply(diff), ApplyOutcome::Applied { .. }));
        assert!(book.view().bids.is_empty());
        assert_eq!(book.last_update_id(), Some(101));
    }

    #[test]
    fn test_gap_moves_to_resyncing_without_mutating() {
        let mut book = synced_book(100, &[(dec!(10), dec!(5))], &[(dec!(11), dec!(1))]);
        let before = book.view();

        let diff = DiffMessage::new("BTCUSDT", 105, 106).with_bid(dec!(10.5), dec!(9));
        assert_eq!(
            book.apply(diff),
            ApplyOutcome::Gap {
                expected: 101,
                got: 105
            }
        );
        assert_eq!(book.sync_state(), SyncState::Resyncing);

        let after = book.view();
        assert_eq!(after.bids, before.bids);
        assert_eq!(after.asks, before.asks);
        assert_eq!(book.last_update_id(), Some(100));
        // The gapped diff waits for the next snapshot
        assert_eq!(book.pending_len(), 1);
    }

    #[test]
    fn test_stale_replay_is_discarded() {
        let mut book = synced_book(100, &[(dec!(10), dec!(5))], &[]);
        let replay = DiffMessage::new("BTCUSDT", 95, 100).with_bid(dec!(10), dec!(0));

        assert_eq!(book.apply(replay), ApplyOutcome::Stale);
        assert_eq!(book.best_bid(), Some(PriceLevel::new(dec!(10), dec!(5))));
        assert_eq!(book.sync_state(), SyncState::Synced);
    }

    #[test]
    fn test_bootstrap_discards_covered_diffs() {
        let mut book = OrderBookState::new("BTCUSDT");
        book.apply(DiffMessage::new("BTCUSDT", 140, 150).with_bid(dec!(1), dec!(1)));
        book.apply(DiffMessage::new("BTCUSDT", 201, 250).with_bid(dec!(2), dec!(2)));

        let snapshot = BookSnapshot::new(200, vec![(dec!(1.5), dec!(3))], vec![(dec!(5), dec!(1))]);
        let report = book.install_snapshot(&snapshot).unwrap();

        assert_eq!(report.discarded, 1);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].final_update_id, 250);
        assert_eq!(book.sync_state(), SyncState::Synced);
        assert_eq!(book.last_update_id(), Some(250));
        assert_eq!(prices(&book.view().bids), vec![dec!(2), dec!(1.5)]);
    }

    #[test]
    fn test_bootstrap_accepts_straddling_first_diff() {
        let mut book = OrderBookState::new("BTCUSDT");
        book.apply(DiffMessage::new("BTCUSDT", 195, 210).with_ask(dec!(7), dec!(1)));
        book.apply(DiffMessage::new("BTCUSDT", 211, 220).with_ask(dec!(8), dec!(1)));

        let report = book
            .install_snapshot(&BookSnapshot::new(200, vec![], vec![]))
            .unwrap();
        assert_eq!(report.applied.len(), 2);
        assert_eq!(book.last_update_id(), Some(220));
        assert_eq!(book.sync_state(), SyncState::Synced);
    }

    #[test]
    fn test_bootstrap_discards_overlap_after_first_diff() {
        let mut book = OrderBookState::new("BTCUSDT");
        book.apply(DiffMessage::new("BTCUSDT", 195, 210).with_bid(dec!(1), dec!(1)));
        book.apply(DiffMessage::new("BTCUSDT", 205, 215).with_bid(dec!(1), dec!(9)));
        book.apply(DiffMessage::new("BTCUSDT", 211, 212).with_bid(dec!(2), dec!(1)));

        let report = book
            .install_snapshot(&BookSnapshot::new(200, vec![], vec![]))
            .unwrap();
        let replayed: Vec<_> = report.applied.iter().map(|d| d.first_update_id).collect();
        assert_eq!(replayed, vec![195, 211]);
        assert_eq!(report.discarded, 1);
        assert_eq!(book.last_update_id(), Some(212));
        assert_eq!(book.best_bid(), Some(PriceLevel::new(dec!(2), dec!(1))));
        assert_eq!(prices(&book.view().bids), vec![dec!(2), dec!(1)]);
        assert_eq!(book.view().bids[1].size, dec!(1));

        // A synced book treats the same overlap as stale
        let overlap = DiffMessage::new("BTCUSDT", 212, 215).with_bid(dec!(1), dec!(9));
        assert_eq!(book.apply(overlap), ApplyOutcome::Stale);
    }

    #[test]
    fn test_max_update_id_does_not_overflow() {
        let mut book = synced_book(u64::MAX, &[(dec!(10), dec!(5))], &[]);
        let diff = DiffMessage::new("BTCUSDT", u64::MAX, u64::MAX).with_bid(dec!(10), dec!(0));
        assert_eq!(book.apply(diff), ApplyOutcome::Stale);
        assert_eq!(book.last_update_id(), Some(u64::MAX));

        let mut book = OrderBookState::new("BTCUSDT");
        book.apply(DiffMessage::new("BTCUSDT", u64::MAX - 1, u64::MAX));
        let report = book
            .install_snapshot(&BookSnapshot::new(u64::MAX, vec![], vec![]))
            .unwrap();
        assert_eq!(report.discarded, 1);
        assert_eq!(book.sync_state(), SyncState::Synced);
    }

    #[test]
    fn test_bootstrap_replays_in_first_update_id_order() {
        let mut book = OrderBookState::new("BTCUSDT");
        book.apply(DiffMessage::new("BTCUSDT", 206, 210).with_bid(dec!(1), dec!(2)));
        book.apply(DiffMessage::new("BTCUSDT", 201, 205).with_bid(dec!(1), dec!(1)));

        let report = book
            .install_snapshot(&BookSnapshot::new(200, vec![], vec![]))
            .unwrap();
        let order: Vec<_> = report.applied.iter().map(|d| d.first_update_id).collect();
        assert_eq!(order, vec![201, 206]);
        assert_eq!(book.best_bid(), Some(PriceLevel::new(dec!(1), dec!(2))));
    }

    #[test]
    fn test_bootstrap_gap_requeues_remaining_diffs() {
        let mut book = OrderBookState::new("BTCUSDT");
        book.apply(DiffMessage::new("BTCUSDT", 300, 310));
        book.apply(DiffMessage::new("BTCUSDT", 311, 320));

        let report = book
            .install_snapshot(&BookSnapshot::new(200, vec![(dec!(1), dec!(1))], vec![]))
            .unwrap();
        assert_eq!(report.gap, Some((201, 300)));
        assert_eq!(book.sync_state(), SyncState::Resyncing);
        assert_eq!(book.pending_len(), 2);

        // Second attempt with a fresher snapshot succeeds
        assert!(book.begin_bootstrap());
        let report = book
            .install_snapshot(&BookSnapshot::new(305, vec![], vec![]))
            .unwrap();
        assert!(report.gap.is_none());
        assert_eq!(report.applied.len(), 2);
        assert_eq!(book.last_update_id(), Some(320));
    }

    #[test]
    fn test_snapshot_ignored_when_not_buffering() {
        let mut book = synced_book(100, &[], &[]);
        assert!(book
            .install_snapshot(&BookSnapshot::new(500, vec![], vec![]))
            .is_none());
        assert_eq!(book.last_update_id(), Some(100));
    }

    #[test]
    fn test_snapshot_replaces_previous_levels() {
        let mut book = synced_book(100, &[(dec!(10), dec!(5))], &[(dec!(11), dec!(1))]);
        book.apply(DiffMessage::new("BTCUSDT", 150, 151));
        assert!(book.begin_bootstrap());

        book.install_snapshot(&BookSnapshot::new(160, vec![(dec!(20), dec!(1))], vec![]))
            .unwrap();
        assert_eq!(prices(&book.view().bids), vec![dec!(20)]);
        assert!(book.view().asks.is_empty());
    }

    #[test]
    fn test_crossed_book_single_pass_repair() {
        let mut book = synced_book(
            100,
            &[(dec!(10), dec!(5)), (dec!(9), dec!(3))],
            &[(dec!(10.5), dec!(2))],
        );

        let stray = DiffMessage::new("BTCUSDT", 101, 101).with_ask(dec!(9.5), dec!(1));
        let repair = match book.apply(stray) {
            ApplyOutcome::Applied { repair, .. } => repair.unwrap(),
            other => panic!("Expected Applied, got {other:?}"),
        };

        assert_eq!(repair.best_bid, dec!(10));
        assert_eq!(repair.best_ask, dec!(9.5));
        assert_eq!(repair.removed_bids, 1);
        assert_eq!(repair.removed_asks, 1);

        let view = book.view();
        assert_eq!(view.bids, vec![PriceLevel::new(dec!(9), dec!(3))]);
        assert_eq!(view.asks, vec![PriceLevel::new(dec!(10.5), dec!(2))]);
        assert!(!view.is_crossed());
    }

    #[test]
    fn test_repair_uses_original_thresholds() {
        // bids 10, 9.8 / asks 9.7, 9.9, 11 after the stray diff.
        // Thresholds: best bid 10, best ask 9.7.
        let mut book = synced_book(
            1,
            &[(dec!(10), dec!(1)), (dec!(9.8), dec!(1)), (dec!(9), dec!(1))],
            &[(dec!(11), dec!(1))],
        );
        let stray = DiffMessage::new("BTCUSDT", 2, 2)
            .with_ask(dec!(9.7), dec!(1))
            .with_ask(dec!(9.9), dec!(1));
        book.apply(stray);

        let view = book.view();
        assert_eq!(prices(&view.bids), vec![dec!(9)]);
        assert_eq!(prices(&view.asks), vec![dec!(11)]);
    }

    #[test]
    fn test_repair_can_empty_a_side() {
        let mut book = synced_book(1, &[(dec!(10), dec!(1))], &[(dec!(11), dec!(1))]);
        let stray = DiffMessage::new("BTCUSDT", 2, 2).with_bid(dec!(12), dec!(1));
        book.apply(stray);

        let view = book.view();
        // Bids >= 11 go (12), asks <= 12 go (11)
        assert_eq!(prices(&view.bids), vec![dec!(10)]);
        assert!(view.asks.is_empty());
    }

    #[test]
    fn test_sequential_diffs_match_concatenated_diff() {
        let d1 = DiffMessage::new("BTCUSDT", 101, 102)
            .with_bid(dec!(10), dec!(1))
            .with_ask(dec!(12), dec!(4));
        let d2 = DiffMessage::new("BTCUSDT", 103, 103)
            .with_bid(dec!(10), dec!(2))
            .with_bid(dec!(9), dec!(7));
        let d3 = DiffMessage::new("BTCUSDT", 104, 110)
            .with_bid(dec!(9), dec!(0))
            .with_ask(dec!(13), dec!(1));

        let mut sequential = synced_book(100, &[(dec!(8), dec!(1))], &[(dec!(14), dec!(1))]);
        for diff in [d1.clone(), d2.clone(), d3.clone()] {
            assert!(matches!(sequential.apply(diff), ApplyOutcome::Applied { .. }));
        }

        let mut merged = DiffMessage::new("BTCUSDT", 101, 110);
        for diff in [&d1, &d2, &d3] {
            merged.bid_updates.extend(diff.bid_updates.iter().copied());
            merged.ask_updates.extend(diff.ask_updates.iter().copied());
        }
        let mut batched = synced_book(100, &[(dec!(8), dec!(1))], &[(dec!(14), dec!(1))]);
        assert!(matches!(batched.apply(merged), ApplyOutcome::Applied { .. }));

        assert_eq!(sequential.view(), batched.view());
    }

    #[test]
    fn test_invariant_holds_under_noisy_updates() {
        let mut book = synced_book(0, &[(dec!(100), dec!(1))], &[(dec!(101), dec!(1))]);
        // Deterministic LCG so the sequence is reproducible
        let mut seed: u64 = 0x5eed;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            seed >> 33
        };

        for id in 1..=2_000u64 {
            let price = Decimal::from(90 + next() % 20);
            let size = Decimal::from(next() % 4);
            let diff = if next() % 2 == 0 {
                DiffMessage::new("BTCUSDT", id, id).with_bid(price, size)
            } else {
                DiffMessage::new("BTCUSDT", id, id).with_ask(price, size)
            };
            assert!(matches!(book.apply(diff), ApplyOutcome::Applied { .. }));
            assert!(!book.is_crossed(), "crossed after update {id}");
        }
    }

    #[test]
    fn test_view_is_detached_copy() {
        let mut book = synced_book(1, &[(dec!(10), dec!(1))], &[(dec!(11), dec!(1))]);
        let view = book.view();

        book.apply(DiffMessage::new("BTCUSDT", 2, 2).with_bid(dec!(10), dec!(0)));

        assert_eq!(view.bids, vec![PriceLevel::new(dec!(10), dec!(1))]);
        assert!(book.view().bids.is_empty());
    }

    #[test]
    fn test_view_orders_and_helpers() {
        let book = synced_book(
            1,
            &[(dec!(9), dec!(1)), (dec!(10), dec!(2))],
            &[(dec!(12), dec!(1)), (dec!(11), dec!(3))],
        );
        let view = book.view();
        assert_eq!(prices(&view.bids), vec![dec!(10), dec!(9)]);
        assert_eq!(prices(&view.asks), vec![dec!(11), dec!(12)]);
        assert_eq!(view.mid_price(), Some(dec!(10.5)));
        assert_eq!(view.spread(), Some(dec!(1)));

        let top = book.view_depth(Some(1));
        assert_eq!(top.bids.len(), 1);
        assert_eq!(top.asks.len(), 1);
    }

    #[test]
    fn test_pending_buffer_is_bounded() {
        let mut book = OrderBookState::with_max_pending("BTCUSDT", 2);
        for id in 1..=3 {
            book.apply(DiffMessage::new("BTCUSDT", id, id));
        }
        assert_eq!(book.pending_len(), 2);
        assert_eq!(book.pending_dropped(), 1);
    }

    #[test]
    fn test_reset() {
        let mut book = synced_book(5, &[(dec!(1), dec!(1))], &[]);
        book.reset();
        assert_eq!(book.sync_state(), SyncState::Uninitialized);
        assert_eq!(book.num_levels(), (0, 0));
        assert_eq!(book.last_update_id(), None);
    }
}
