//! One side of an order book.
//!
//! Levels live in a `BTreeMap` keyed by price, which gives:
//!
//! - O(log n) upsert and removal
//! - O(log n) access to the best level (`last_key_value` for bids,
//!   `first_key_value` for asks)
//! - range splits for the crossed-book repair

use std::collections::BTreeMap;

use crate::types::{Price, PriceLevel, Quantity, Side};

/// Price to size mapping for one side of the book.
///
/// Never stores a zero size: applying a zero removes the level.
#[derive(Debug, Clone)]
pub struct PriceLevelMap {
    side: Side,
    /// Sorted ascending by price regardless of side
    levels: BTreeMap<Price, Quantity>,
}

impl PriceLevelMap {
    /// Create an empty side
    #[must_use]
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    /// Which side of the book this map holds
    #[must_use]
    pub const fn side(&self) -> Side {
        self.side
    }

    /// Upsert `size` at `price`, or remove the level when `size` is zero
    pub fn apply(&mut self, price: Price, size: Quantity) {
        if size.is_zero() {
            self.levels.remove(&price);
        } else {
            self.levels.insert(price, size);
        }
    }

    /// Replace all levels, skipping zero sizes
    pub fn replace<I>(&mut self, levels: I)
    where
        I: IntoIterator<Item = (Price, Quantity)>,
    {
        self.levels.clear();
        for (price, size) in levels {
            self.apply(price, size);
        }
    }

    /// Size resting at `price`
    #[must_use]
    pub fn get(&self, price: &Price) -> Option<Quantity> {
        self.levels.get(price).copied()
    }

    /// Best level: highest bid or lowest ask
    #[must_use]
    pub fn best(&self) -> Option<PriceLevel> {
        let entry = match self.side {
            Side::Bid => self.levels.last_key_value(),
            Side::Ask => self.levels.first_key_value(),
        };
        entry.map(|(&price, &size)| PriceLevel::new(price, size))
    }

    /// Remove every level priced at or above `threshold`.
    ///
    /// Returns the number of levels removed.
    pub fn remove_at_or_above(&mut self, threshold: Price) -> usize {
        let removed = self.levels.split_off(&threshold);
        removed.len()
    }

    /// Remove every level priced at or below `threshold`.
    ///
    /// Returns the number of levels removed.
    pub fn remove_at_or_below(&mut self, threshold: Price) -> usize {
        let mut kept = self.levels.split_off(&threshold);
        let mut removed = self.levels.len();
        if kept.remove(&threshold).is_some() {
            removed += 1;
        }
        self.levels = kept;
        removed
    }

    /// Levels ordered best first (descending bids, ascending asks)
    pub fn iter_best_first(&self) -> Box<dyn Iterator<Item = PriceLevel> + '_> {
        let iter = self
            .levels
            .iter()
            .map(|(&price, &size)| PriceLevel::new(price, size));
        match self.side {
            Side::Bid => Box::new(iter.rev()),
            Side::Ask => Box::new(iter),
        }
    }

    /// Copy the best `depth` levels (all levels when `None`)
    #[must_use]
    pub fn to_vec(&self, depth: Option<usize>) -> Vec<PriceLevel> {
        let depth = depth.unwrap_or(self.levels.len());
        self.iter_best_first().take(depth).collect()
    }

    /// Total resting size
    #[must_use]
    pub fn total_size(&self) -> Quantity {
        self.levels.values().sum()
    }

    /// Number of price levels
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether this side has no levels
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Remove all levels
    pub fn clear(&mut self) {
        self.levels.clear();
    }
}
