//! Full order-book snapshot.
//!
//! Mirrors the `GET /api/v3/depth` response body, so the same value is used
//! to bootstrap a book and as the payload of a `_snapshot.json` file.

use serde::{Deserialize, Serialize};

use super::{Price, Quantity, UpdateId};

/// Order book snapshot as returned by the snapshot provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Id of the last update reflected in this snapshot
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: UpdateId,
    /// Bid levels: [[price, quantity], ...]
    pub bids: Vec<(Price, Quantity)>,
    /// Ask levels: [[price, quantity], ...]
    pub asks: Vec<(Price, Quantity)>,
}

impl BookSnapshot {
    /// Create a snapshot
    #[must_use]
    pub fn new(
        last_update_id: UpdateId,
        bids: Vec<(Price, Quantity)>,
        asks: Vec<(Price, Quantity)>,
    ) -> Self {
        Self {
            last_update_id,
            bids,
            asks,
        }
    }
}
