//! Append-only buffers drained by the flush scheduler.

use std::mem;

use parking_lot::Mutex;

use crate::types::{DiffMessage, TradeMessage};

/// Append-only buffer with an atomic drain.
///
/// `drain` swaps the contents out under the lock, so an item appended
/// concurrently lands either in the returned batch or in the next one, never
/// in both and never lost.
#[derive(Debug)]
pub struct DrainBuffer<T> {
    items: Mutex<Vec<T>>,
}

/// Trades received since the last flush
pub type TradeAccumulator = DrainBuffer<TradeMessage>;

/// Diffs applied to a synced book since the last flush
pub type UpdateLog = DrainBuffer<DiffMessage>;

impl<T> Default for DrainBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DrainBuffer<T> {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Append one item
    pub fn append(&self, item: T) {
        self.items.lock().push(item);
    }

    /// Take everything appended so far, leaving the buffer empty
    pub fn drain(&self) -> Vec<T> {
        mem::take(&mut *self.items.lock())
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
