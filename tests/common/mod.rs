//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depth_recorder::client::{FeedStream, FeedSubscription, SnapshotProvider, SubscriptionHandle};
use depth_recorder::error::ApiError;
use depth_recorder::scheduler::Clock;
use depth_recorder::types::{BookSnapshot, DiffMessage, TradeMessage};
use depth_recorder::Error;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Snapshot provider returning a fixed book with an advancing update id
#[derive(Debug)]
pub struct ScriptedSnapshots {
    next_id: AtomicU64,
    /// HTTP status to fail with, 0 to succeed
    failing: AtomicU16,
    calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedSnapshots {
    pub fn new(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
            failing: AtomicU16::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail_with(if fail { 503 } else { 0 });
    }

    pub fn fail_with(&self, status: u16) {
        self.failing.store(status, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SnapshotProvider for ScriptedSnapshots {
    async fn fetch(&self, symbol: &str, depth_limit: u32) -> Result<BookSnapshot, Error> {
        self.calls.lock().push((symbol.to_string(), depth_limit));
        let status = self.failing.load(Ordering::SeqCst);
        if status != 0 {
            return Err(Error::Api(ApiError::new(status, "unavailable")));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(BookSnapshot::new(
            id,
            vec![(dec!(100.0), dec!(1.5)), (dec!(99.5), dec!(3))],
            vec![(dec!(100.5), dec!(2)), (dec!(101.0), dec!(4))],
        ))
    }
}

/// Feed backed by channels the test writes into
#[derive(Debug, Default)]
pub struct ChannelFeed {
    next_handle: AtomicU64,
    depth: Mutex<HashMap<String, mpsc::Sender<DiffMessage>>>,
    trades: Mutex<HashMap<String, mpsc::Sender<TradeMessage>>>,
    unsubscribed: Mutex<Vec<SubscriptionHandle>>,
}

impl ChannelFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until both streams of `symbol` are subscribed
    pub async fn wait_subscribed(&self, symbol: &str) {
        for _ in 0..500 {
            if self.depth.lock().contains_key(symbol) && self.trades.lock().contains_key(symbol) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{symbol} was never subscribed");
    }

    pub async fn send_diff(&self, diff: DiffMessage) {
        let tx = self.depth.lock().get(&diff.symbol).cloned().unwrap();
        tx.send(diff).await.unwrap();
    }

    pub async fn send_trade(&self, trade: TradeMessage) {
        let tx = self.trades.lock().get(&trade.symbol).cloned().unwrap();
        tx.send(trade).await.unwrap();
    }

    /// Drop every sender, ending all streams
    pub fn close_all(&self) {
        self.depth.lock().clear();
        self.trades.lock().clear();
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionHandle> {
        self.unsubscribed.lock().clone()
    }

    fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl FeedSubscription for ChannelFeed {
    async fn subscribe_depth(&self, symbol: &str) -> Result<FeedStream<DiffMessage>, Error> {
        let (tx, rx) = mpsc::channel(64);
        self.depth.lock().insert(symbol.to_string(), tx);
        Ok(FeedStream::new(self.handle(), rx))
    }

    async fn subscribe_trades(&self, symbol: &str) -> Result<FeedStream<TradeMessage>, Error> {
        let (tx, rx) = mpsc::channel(64);
        self.trades.lock().insert(symbol.to_string(), tx);
        Ok(FeedStream::new(self.handle(), rx))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), Error> {
        self.unsubscribed.lock().push(handle);
        Ok(())
    }
}

pub fn trade(symbol: &str, trade_id: u64) -> TradeMessage {
    TradeMessage::new(symbol, trade_id, dec!(100.25), dec!(0.5))
        .at(1_705_312_800_000 + trade_id)
        .with_buyer_is_maker(trade_id % 2 == 0)
}

/// Poll `check` until it holds, panicking after a few seconds
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
