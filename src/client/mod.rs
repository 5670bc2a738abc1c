//! Exchange collaborators.
//!
//! The engine never talks to the network directly. It consumes two traits:
//!
//! - [`FeedSubscription`] - per-symbol streams of depth diffs and trades
//! - [`SnapshotProvider`] - full book snapshots for bootstrap and reference
//!
//! and this module ships the Binance implementations:
//!
//! - [`rest`] - [`RestClient`], the `/api/v3/depth` snapshot endpoint
//! - [`websocket`] - [`BinanceFeed`], combined-stream WebSocket subscriptions

pub mod rest;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::types::{BookSnapshot, DiffMessage, TradeMessage};

pub use rest::RestClient;
pub use websocket::BinanceFeed;

/// Identifies one subscription for [`FeedSubscription::unsubscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub u64);

/// A subscribed stream of validated messages.
///
/// The stream ends (`recv` returns `None`) when the feed gives up on the
/// connection or the subscription is cancelled.
#[derive(Debug)]
pub struct FeedStream<T> {
    /// Handle to pass to [`FeedSubscription::unsubscribe`]
    pub handle: SubscriptionHandle,
    receiver: mpsc::Receiver<T>,
}

impl<T> FeedStream<T> {
    /// Wrap a channel receiver
    pub fn new(handle: SubscriptionHandle, receiver: mpsc::Receiver<T>) -> Self {
        Self { handle, receiver }
    }

    /// Receive the next message
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Split into handle and receiver
    pub fn into_parts(self) -> (SubscriptionHandle, mpsc::Receiver<T>) {
        (self.handle, self.receiver)
    }
}

/// Source of live depth diffs and trades
#[async_trait]
pub trait FeedSubscription: Send + Sync {
    /// Subscribe to depth diffs for one symbol
    async fn subscribe_depth(&self, symbol: &str) -> Result<FeedStream<DiffMessage>, Error>;

    /// Subscribe to trades for one symbol
    async fn subscribe_trades(&self, symbol: &str) -> Result<FeedStream<TradeMessage>, Error>;

    /// Cancel a subscription. Unknown handles are ignored.
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), Error>;
}

/// Source of full order book snapshots
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Fetch the top `depth_limit` levels of each side for `symbol`
    async fn fetch(&self, symbol: &str, depth_limit: u32) -> Result<BookSnapshot, Error>;
}
