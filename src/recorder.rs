//! Recorder runtime tying the feed, the engine and the scheduler together.
//!
//! One ingestion task per subscribed stream feeds [`OrderBookSync`]. When a
//! diff says a snapshot is needed, the depth task spawns a bootstrap task
//! that fetches and installs it, so ingestion never waits on the network.
//! The [`FlushScheduler`] runs alongside.
//!
//! Shutdown (signal, feed death or daily cutoff) always goes: stop the
//! scheduler between wakes, stop ingestion and unsubscribe, one final flush.
//! A fatal error skips the final flush and is returned as is.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::client::{
    BinanceFeed, FeedStream, FeedSubscription, RestClient, SnapshotProvider, SubscriptionHandle,
};
use crate::config::{Config, ReconnectConfig};
use crate::error::Error;
use crate::orderbook::{OrderBookSync, SyncAction};
use crate::persistence::{FileSink, PersistenceSink};
use crate::scheduler::{Clock, FlushScheduler, StopReason, SystemClock};
use crate::types::{DiffMessage, TradeMessage};

/// Shared state of the bootstrap tasks
struct Bootstrapper {
    sync: Arc<OrderBookSync>,
    snapshots: Arc<dyn SnapshotProvider>,
    depth_limit: u32,
    retry: ReconnectConfig,
    fatal: mpsc::Sender<Error>,
}

impl Bootstrapper {
    /// Fetch and install snapshots until the book is synced.
    ///
    /// Transient failures back off and retry; anything else, or running out
    /// of attempts, is reported on the fatal channel.
    async fn run(self: Arc<Self>, symbol: String) {
        let mut attempt: u32 = 0;

        loop {
            let (failure, transient, retry_after_ms) =
                match self.snapshots.fetch(&symbol, self.depth_limit).await {
                    Ok(snapshot) => match self.sync.install_snapshot(&symbol, &snapshot) {
                        SyncAction::Resync { expected, got } => (
                            format!(
                                "snapshot {} does not reach buffered diffs (expected {expected}, got {got})",
                                snapshot.last_update_id
                            ),
                            true,
                            None,
                        ),
                        action => {
                            debug!(symbol = %symbol, ?action, "Bootstrap finished");
                            return;
                        }
                    },
                    Err(e) => {
                        let retry_after_ms = match &e {
                            Error::RateLimited { retry_after_ms } => *retry_after_ms,
                            _ => None,
                        };
                        (e.to_string(), e.is_transient(), retry_after_ms)
                    }
                };

            if !transient || !self.retry.allows_attempt(attempt) {
                error!(symbol = %symbol, attempts = attempt + 1, error = %failure, "Bootstrap failed");
                let _ = self
                    .fatal
                    .send(Error::Bootstrap {
                        symbol,
                        attempts: attempt + 1,
                        last_error: failure,
                    })
                    .await;
                return;
            }

            let mut delay = self.retry.delay_for_attempt(attempt);
            if let Some(ms) = retry_after_ms {
                delay = delay.max(Duration::from_millis(ms));
            }
            warn!(symbol = %symbol, attempt, ?delay, error = %failure, "Snapshot attempt failed, retrying");
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }
}

/// Route one symbol's diffs, spawning bootstraps as needed.
///
/// Bootstrap tasks live in a local `JoinSet`, so they are aborted together
/// with this task.
async fn ingest_depth(
    symbol: String,
    mut stream: FeedStream<DiffMessage>,
    bootstrapper: Arc<Bootstrapper>,
) -> String {
    let mut bootstraps = JoinSet::new();

    loop {
        tokio::select! {
            diff = stream.recv() => {
                let Some(diff) = diff else { break };
                let action = bootstrapper.sync.on_diff(diff);
                if action.needs_snapshot() {
                    bootstraps.spawn(Arc::clone(&bootstrapper).run(symbol.clone()));
                }
            }
            Some(_) = bootstraps.join_next(), if !bootstraps.is_empty() => {}
        }
    }

    format!("{symbol} depth")
}

async fn ingest_trades(
    symbol: String,
    mut stream: FeedStream<TradeMessage>,
    sync: Arc<OrderBookSync>,
) -> String {
    while let Some(trade) = stream.recv().await {
        sync.on_trade(trade);
    }
    format!("{symbol} trades")
}

/// Records depth diffs, trades and snapshots for the configured symbols
///
/// # Example
///
/// ```rust,no_run
/// use depth_recorder::recorder::Recorder;
/// use depth_recorder::Config;
///
/// # async fn example() -> depth_recorder::Result<()> {
/// let recorder = Recorder::binance(Config::new(["BTCUSDT"]))?;
///
/// let (_stop, shutdown) = tokio::sync::watch::channel(false);
/// let reason = recorder.run(shutdown).await?;
/// println!("stopped: {reason:?}");
/// # Ok(())
/// # }
/// ```
pub struct Recorder {
    config: Config,
    sync: Arc<OrderBookSync>,
    feed: Arc<dyn FeedSubscription>,
    snapshots: Arc<dyn SnapshotProvider>,
    sink: Arc<dyn PersistenceSink>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("config", &self.config)
            .field("sync", &self.sync)
            .finish()
    }
}

impl Recorder {
    /// Create a recorder from its collaborators
    pub fn new(
        config: Config,
        feed: Arc<dyn FeedSubscription>,
        snapshots: Arc<dyn SnapshotProvider>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        let sync = Arc::new(OrderBookSync::with_max_pending(config.max_pending_diffs()));
        Self {
            config,
            sync,
            feed,
            snapshots,
            sink,
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a recorder wired to the exchange feed, the REST snapshot
    /// endpoint and a [`FileSink`] rooted at `config.data_dir()`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn binance(config: Config) -> Result<Self, Error> {
        let feed = Arc::new(BinanceFeed::new(&config));
        let rest = Arc::new(RestClient::new(&config)?);
        let sink = Arc::new(FileSink::new(config.data_dir()));
        Ok(Self::new(config, feed, rest, sink))
    }

    /// Use another clock for scheduling
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The engine, for reading views and counters while running
    pub fn sync(&self) -> Arc<OrderBookSync> {
        Arc::clone(&self.sync)
    }

    /// Record until the daily cutoff, a shutdown signal or the feed dying.
    ///
    /// `shutdown` flipping to `true` (or its sender being dropped) requests a
    /// graceful stop.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: invalid configuration, a failed
    /// subscription, an exhausted bootstrap, or a snapshot/persistence failure
    /// in the scheduler. No final flush is attempted in that case.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<StopReason, Error> {
        self.config.validate()?;
        let symbols = self.config.symbols().to_vec();
        for symbol in &symbols {
            self.sync.register(symbol);
        }

        let (fatal_tx, mut fatal_rx) = mpsc::channel(symbols.len().max(1));
        let bootstrapper = Arc::new(Bootstrapper {
            sync: Arc::clone(&self.sync),
            snapshots: Arc::clone(&self.snapshots),
            depth_limit: self.config.depth_limit(),
            retry: self.config.reconnect().clone(),
            fatal: fatal_tx,
        });

        let mut handles: Vec<SubscriptionHandle> = Vec::with_capacity(symbols.len() * 2);
        let mut ingest = JoinSet::new();
        for symbol in &symbols {
            let depth = self.feed.subscribe_depth(symbol).await?;
            handles.push(depth.handle);
            ingest.spawn(ingest_depth(symbol.clone(), depth, Arc::clone(&bootstrapper)));

            let trades = self.feed.subscribe_trades(symbol).await?;
            handles.push(trades.handle);
            ingest.spawn(ingest_trades(symbol.clone(), trades, Arc::clone(&self.sync)));
        }
        drop(bootstrapper);
        info!(symbols = ?symbols, "Recording started");

        let mut scheduler = FlushScheduler::new(
            &self.config,
            Arc::clone(&self.sync),
            Arc::clone(&self.snapshots),
            Arc::clone(&self.sink),
            Arc::clone(&self.clock),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut feed_closed = false;
        let mut signal_seen = *shutdown.borrow_and_update();
        if signal_seen {
            let _ = stop_tx.send(true);
        }

        let outcome = {
            let run = scheduler.run(stop_rx);
            tokio::pin!(run);

            loop {
                tokio::select! {
                    result = &mut run => break result,
                    Some(err) = fatal_rx.recv() => break Err(err),
                    changed = shutdown.changed(), if !signal_seen => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Shutdown requested");
                            signal_seen = true;
                            let _ = stop_tx.send(true);
                        }
                    }
                    Some(ended) = ingest.join_next(), if !feed_closed => {
                        match ended {
                            Ok(stream) => warn!(stream = %stream, "Feed stream ended"),
                            Err(e) => error!(error = %e, "Ingestion task failed"),
                        }
                        feed_closed = true;
                        let _ = stop_tx.send(true);
                    }
                }
            }
        };

        ingest.shutdown().await;
        let reason = match outcome {
            Ok(StopReason::Shutdown) if feed_closed && !signal_seen => StopReason::FeedClosed,
            Ok(reason) => reason,
            Err(e) => {
                error!(error = %e, "Recorder failed");
                return Err(e);
            }
        };

        for handle in handles {
            if let Err(e) = self.feed.unsubscribe(handle).await {
                warn!(handle = handle.0, error = %e, "Unsubscribe failed");
            }
        }

        scheduler.final_flush().await?;
        for symbol in &symbols {
            self.sync.deregister(symbol);
        }

        info!(reason = ?reason, "Recording stopped");
        Ok(reason)
    }
}
