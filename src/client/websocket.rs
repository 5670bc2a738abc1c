//! WebSocket feed for depth diffs and aggregated trades.
//!
//! Every subscription gets its own combined-stream connection
//! (`/stream?streams=<symbol>@depth@100ms` or `<symbol>@aggTrade`) driven by a
//! pump task. The task validates each frame into a [`DiffMessage`] or
//! [`TradeMessage`] and forwards it over a bounded channel:
//!
//! - Pings are answered with pongs
//! - Frames that fail validation are logged and skipped
//! - On disconnect the task reconnects with exponential backoff; the engine's
//!   gap detection then forces a resync
//! - When retries are exhausted the channel is closed, so the consumer sees
//!   the end of the stream
//!
//! # Example
//!
//! ```rust,no_run
//! use depth_recorder::client::{BinanceFeed, FeedSubscription};
//! use depth_recorder::Config;
//!
//! # async fn example() -> depth_recorder::Result<()> {
//! let feed = BinanceFeed::new(&Config::new(["BTCUSDT"]));
//! let mut diffs = feed.subscribe_depth("BTCUSDT").await?;
//!
//! while let Some(diff) = diffs.recv().await {
//!     println!("{} {}..={}", diff.symbol, diff.first_update_id, diff.final_update_id);
//! }
//! # Ok(())
//! # }
//! ```

use std::convert::TryFrom;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::client::{FeedStream, FeedSubscription, SubscriptionHandle};
use crate::config::{Config, ReconnectConfig};
use crate::error::Error;
use crate::types::{DiffMessage, StreamEnvelope, StreamEvent, TradeMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A message type that can be extracted from a stream event
pub trait FromStreamEvent: Sized + Send + 'static {
    /// Stream suffix after `<symbol>@`
    const STREAM: &'static str;

    /// Convert an event, `None` if it belongs to another stream type
    fn from_event(event: StreamEvent) -> Option<Result<Self, Error>>;
}

impl FromStreamEvent for DiffMessage {
    const STREAM: &'static str = "depth@100ms";

    fn from_event(event: StreamEvent) -> Option<Result<Self, Error>> {
        match event {
            StreamEvent::DepthUpdate(event) => Some(DiffMessage::try_from(event)),
            StreamEvent::AggTrade(_) => None,
        }
    }
}

impl FromStreamEvent for TradeMessage {
    const STREAM: &'static str = "aggTrade";

    fn from_event(event: StreamEvent) -> Option<Result<Self, Error>> {
        match event {
            StreamEvent::AggTrade(event) => Some(TradeMessage::try_from(event)),
            StreamEvent::DepthUpdate(_) => None,
        }
    }
}

/// Parse one text frame into a validated message.
///
/// Returns `Ok(None)` for events of another stream type.
pub fn parse_frame<T: FromStreamEvent>(text: &str) -> Result<Option<T>, Error> {
    let envelope: StreamEnvelope = serde_json::from_str(text)?;
    T::from_event(envelope.data).transpose()
}

/// Why a connection ended
#[derive(Debug)]
enum ConnectionEnd {
    /// Consumer dropped the stream, stop for good
    ReceiverDropped,
    /// Network side ended, reconnect
    Disconnected(Error),
}

/// Exchange WebSocket feed implementing [`FeedSubscription`]
#[derive(Debug)]
pub struct BinanceFeed {
    ws_base_url: String,
    reconnect: ReconnectConfig,
    channel_capacity: usize,
    next_handle: AtomicU64,
    tasks: Mutex<FxHashMap<SubscriptionHandle, JoinHandle<()>>>,
}

impl BinanceFeed {
    /// Create a feed for the configured environment
    pub fn new(config: &Config) -> Self {
        Self::with_ws_url(config.websocket_url(), config)
    }

    /// Create a feed against a custom WebSocket base URL
    pub fn with_ws_url(ws_base_url: impl Into<String>, config: &Config) -> Self {
        Self {
            ws_base_url: ws_base_url.into().trim_end_matches('/').to_string(),
            reconnect: config.reconnect().clone(),
            channel_capacity: config.channel_capacity(),
            next_handle: AtomicU64::new(1),
            tasks: Mutex::new(FxHashMap::default()),
        }
    }

    /// URL of the combined stream `stream`
    pub fn stream_url(&self, stream: &str) -> Result<Url, Error> {
        let raw = format!("{}/stream?streams={}", self.ws_base_url, stream);
        Url::parse(&raw).map_err(|e| Error::Config(format!("invalid stream URL '{raw}': {e}")))
    }

    /// Number of live pump tasks
    pub fn active_subscriptions(&self) -> usize {
        self.tasks.lock().values().filter(|t| !t.is_finished()).count()
    }

    fn spawn<T: FromStreamEvent>(&self, symbol: &str) -> Result<FeedStream<T>, Error> {
        let stream = format!("{}@{}", symbol.trim().to_ascii_lowercase(), T::STREAM);
        let url = self.stream_url(&stream)?;
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.channel_capacity.max(1));

        let task = tokio::spawn(pump(url, stream, tx, self.reconnect.clone()));
        self.tasks.lock().insert(handle, task);
        Ok(FeedStream::new(handle, rx))
    }
}

impl Drop for BinanceFeed {
    fn drop(&mut self) {
        for (_, task) in self.tasks.lock().drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl FeedSubscription for BinanceFeed {
    async fn subscribe_depth(&self, symbol: &str) -> Result<FeedStream<DiffMessage>, Error> {
        self.spawn(symbol)
    }

    async fn subscribe_trades(&self, symbol: &str) -> Result<FeedStream<TradeMessage>, Error> {
        self.spawn(symbol)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), Error> {
        if let Some(task) = self.tasks.lock().remove(&handle) {
            task.abort();
            debug!(handle = handle.0, "Unsubscribed");
        }
        Ok(())
    }
}

/// Keep one stream connected until the consumer goes away or retries run out
async fn pump<T: FromStreamEvent>(
    url: Url,
    stream: String,
    tx: mpsc::Sender<T>,
    reconnect: ReconnectConfig,
) {
    let mut attempt: u32 = 0;

    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                info!(stream = %stream, "Connected");
                attempt = 0;
                match run_connection(ws, &stream, &tx).await {
                    ConnectionEnd::ReceiverDropped => {
                        debug!(stream = %stream, "Consumer gone, closing stream");
                        return;
                    }
                    ConnectionEnd::Disconnected(e) => {
                        warn!(stream = %stream, error = %e, "Disconnected");
                    }
                }
            }
            Err(e) => {
                warn!(stream = %stream, attempt, error = %e, "Connect failed");
            }
        }

        if !reconnect.allows_attempt(attempt) {
            error!(stream = %stream, attempts = attempt, "Giving up on stream");
            return;
        }
        let delay = reconnect.delay_for_attempt(attempt);
        attempt += 1;

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tx.closed() => return,
        }
    }
}

async fn run_connection<T: FromStreamEvent>(
    ws: WsStream,
    stream: &str,
    tx: &mpsc::Sender<T>,
) -> ConnectionEnd {
    let (mut write, mut read) = ws.split();

    loop {
        let frame = tokio::select! {
            frame = read.next() => frame,
            _ = tx.closed() => return ConnectionEnd::ReceiverDropped,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match parse_frame::<T>(&text) {
                Ok(Some(message)) => {
                    if tx.send(message).await.is_err() {
                        return ConnectionEnd::ReceiverDropped;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(stream, error = %e, "Skipping invalid message"),
            },
            Some(Ok(Message::Ping(data))) => {
                if let Err(e) = write.send(Message::Pong(data)).await {
                    return ConnectionEnd::Disconnected(e.into());
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                return ConnectionEnd::Disconnected(Error::ConnectionClosed);
            }
            // Binary, Pong, Frame
            Some(Ok(_)) => {}
            Some(Err(e)) => return ConnectionEnd::Disconnected(e.into()),
        }
    }
}
