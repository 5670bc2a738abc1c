//! Market data types for the depth and trade feeds.
//!
//! - [`messages`] - WebSocket stream events and the validated
//!   [`DiffMessage`] / [`TradeMessage`] forms used by the engine
//! - [`snapshot`] - Full order-book snapshot returned by the REST API

pub mod messages;
pub mod snapshot;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use messages::{DiffMessage, StreamEnvelope, StreamEvent, TradeMessage};
pub use snapshot::BookSnapshot;

/// Price of a level.
///
/// The exchange sends prices as decimal strings; `Decimal` keeps them exact
/// so that equal prices always hit the same map key.
pub type Price = Decimal;

/// Size resting at a price level, or traded quantity
pub type Quantity = Decimal;

/// Exchange-assigned depth update id
pub type UpdateId = u64;

/// Timestamp in milliseconds since Unix epoch
pub type TimestampMs = u64;

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy side, best price is the highest
    Bid,
    /// Sell side, best price is the lowest
    Ask,
}

/// A single `(price, size)` level as exposed in read views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price
    pub price: Price,
    /// Resting size, never zero
    pub size: Quantity,
}

impl PriceLevel {
    /// Create a new price level
    #[must_use]
    pub const fn new(price: Price, size: Quantity) -> Self {
        Self { price, size }
    }
}

impl From<(Price, Quantity)> for PriceLevel {
    fn from((price, size): (Price, Quantity)) -> Self {
        Self { price, size }
    }
}
