//! Wall-clock aligned flush loop.
//!
//! The scheduler wakes on multiples of the flush interval (never a fixed
//! sleep, so it does not drift). On each wake it computes the save bucket
//! `floor(now / save_period) * save_period`; when the bucket advances it
//! drains every symbol and writes the batch keyed by the previous boundary:
//!
//! ```text
//! wake 10:00:10  first flush   files keyed 09:59:57 (start)  snapshot 10:00:10
//! wake 11:00:00  bucket 11:00  files keyed 10:00:10
//! wake 12:00:00  bucket 12:00  files keyed 11:00:00
//! cutoff 23:58:30              files keyed 23:00:00, no snapshot
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::client::SnapshotProvider;
use crate::config::{Config, SnapshotPolicy};
use crate::error::Error;
use crate::orderbook::OrderBookSync;
use crate::persistence::{encode, format_timestamp, output_path, FileKind, PersistenceSink};

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Start of the bucket containing `secs`
pub fn bucket_of(secs: i64, period_secs: i64) -> i64 {
    secs - secs.rem_euclid(period_secs.max(1))
}

/// Time until the next multiple of `interval` strictly after `now`
pub fn delay_until_next_wake(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = (interval.as_millis() as i64).max(1);
    let elapsed = now.timestamp_millis().rem_euclid(interval_ms);
    Duration::from_millis((interval_ms - elapsed) as u64)
}

/// `stop_time` on the date of `now + 1h`, in `now`'s time zone.
///
/// Starting within the hour before the cutoff therefore runs until the next
/// day's cutoff instead of stopping almost immediately. Returns `None` when
/// the local time does not exist (DST gap).
pub fn daily_cutoff<Tz: TimeZone>(now: &DateTime<Tz>, stop_time: NaiveTime) -> Option<DateTime<Tz>> {
    let date = (now.clone() + chrono::Duration::hours(1)).date_naive();
    now.timezone()
        .from_local_datetime(&date.and_time(stop_time))
        .earliest()
}

/// Outcome of one scheduler wake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Bucket unchanged, nothing written
    Idle,
    /// Bucket advanced and was flushed
    Flushed {
        /// The new bucket
        bucket: i64,
    },
    /// Daily cutoff reached; the loop must stop
    Cutoff,
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The daily cutoff was reached
    DailyCutoff,
    /// A shutdown signal was received
    Shutdown,
    /// A feed stream ended
    FeedClosed,
}

/// Periodic and terminal flushes of an [`OrderBookSync`]
pub struct FlushScheduler {
    sync: Arc<OrderBookSync>,
    snapshots: Arc<dyn SnapshotProvider>,
    sink: Arc<dyn PersistenceSink>,
    clock: Arc<dyn Clock>,
    save_period_secs: i64,
    flush_interval: Duration,
    snapshot_limit: u32,
    snapshot_policy: SnapshotPolicy,
    stop_at: Option<DateTime<Utc>>,
    started_at: i64,
    /// Last flushed bucket
    last_bucket: Option<i64>,
    /// Key of the next update/trades pair
    previous: Option<i64>,
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("save_period_secs", &self.save_period_secs)
            .field("flush_interval", &self.flush_interval)
            .field("snapshot_policy", &self.snapshot_policy)
            .field("stop_at", &self.stop_at)
            .field("started_at", &self.started_at)
            .field("last_bucket", &self.last_bucket)
            .field("previous", &self.previous)
            .finish()
    }
}

impl FlushScheduler {
    /// Create a scheduler; the run starts now according to `clock`
    pub fn new(
        config: &Config,
        sync: Arc<OrderBookSync>,
        snapshots: Arc<dyn SnapshotProvider>,
        sink: Arc<dyn PersistenceSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let stop_at = config
            .stop_time()
            .and_then(|stop| daily_cutoff(&now.with_timezone(&Local), stop))
            .map(|at| at.with_timezone(&Utc));

        Self {
            sync,
            snapshots,
            sink,
            clock,
            save_period_secs: (config.save_period().as_secs() as i64).max(1),
            flush_interval: config.flush_interval(),
            snapshot_limit: config.snapshot_limit(),
            snapshot_policy: config.snapshot_policy(),
            stop_at,
            started_at: now.timestamp(),
            last_bucket: None,
            previous: None,
        }
    }

    /// Override the daily cutoff
    #[must_use]
    pub fn with_stop_at(mut self, stop_at: Option<DateTime<Utc>>) -> Self {
        self.stop_at = stop_at;
        self
    }

    /// When the loop will stop on its own
    pub fn stop_at(&self) -> Option<DateTime<Utc>> {
        self.stop_at
    }

    /// Epoch seconds at which the run started
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Last flushed bucket
    pub fn last_bucket(&self) -> Option<i64> {
        self.last_bucket
    }

    /// Run until the daily cutoff or a shutdown signal.
    ///
    /// Shutdown is only observed between wakes, so a flush in progress always
    /// completes. Dropping `shutdown`'s sender counts as a shutdown. The
    /// terminal flush is left to [`FlushScheduler::final_flush`].
    ///
    /// # Errors
    ///
    /// Any snapshot or persistence failure is returned immediately.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<StopReason, Error> {
        info!(
            stop_at = ?self.stop_at,
            save_period_secs = self.save_period_secs,
            flush_interval = ?self.flush_interval,
            "Flush scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                return Ok(StopReason::Shutdown);
            }

            let delay = delay_until_next_wake(self.clock.now(), self.flush_interval);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(StopReason::Shutdown);
                    }
                    continue;
                }
            }

            if self.tick().await? == Tick::Cutoff {
                info!("Daily cutoff reached");
                return Ok(StopReason::DailyCutoff);
            }
        }
    }

    /// Handle one wake: check the cutoff, then flush if the bucket advanced
    pub async fn tick(&mut self) -> Result<Tick, Error> {
        let now = self.clock.now();
        if self.stop_at.is_some_and(|stop| now >= stop) {
            return Ok(Tick::Cutoff);
        }

        let secs = now.timestamp();
        let bucket = bucket_of(secs, self.save_period_secs);
        if self.last_bucket.is_some_and(|last| bucket <= last) {
            return Ok(Tick::Idle);
        }

        match self.previous {
            // The first pair is keyed by the start second and the next one by
            // this wake's second, so they must differ.
            None if secs <= self.started_at => return Ok(Tick::Idle),
            None => {
                // Nothing before this run to key by, so the first pair is
                // keyed by the start time and a reference snapshot is taken.
                self.write_batches(self.started_at).await?;
                self.write_snapshots(secs).await?;
                self.previous = Some(secs);
            }
            Some(previous) => {
                self.write_batches(previous).await?;
                if self.snapshot_policy == SnapshotPolicy::EveryBucket {
                    self.write_snapshots(bucket).await?;
                }
                self.previous = Some(bucket);
            }
        }
        self.last_bucket = Some(bucket);

        Ok(Tick::Flushed { bucket })
    }

    /// Write everything accumulated since the last flush, without a snapshot
    pub async fn final_flush(&mut self) -> Result<(), Error> {
        let key = self.previous.unwrap_or(self.started_at);
        info!(key = %format_timestamp(key)?, "Final flush");
        self.write_batches(key).await
    }

    async fn write_batches(&self, key: i64) -> Result<(), Error> {
        for symbol in self.sync.symbols() {
            let Some(batch) = self.sync.drain(&symbol) else {
                continue;
            };

            let updates = output_path(&symbol, key, FileKind::Update)?;
            self.sink.write(&updates, &encode(&batch.updates)?).await?;
            let trades = output_path(&symbol, key, FileKind::Trades)?;
            self.sink.write(&trades, &encode(&batch.trades)?).await?;

            let metrics = self.sync.metrics(&symbol).unwrap_or_default();
            info!(
                symbol = %symbol,
                updates = batch.updates.len(),
                trades = batch.trades.len(),
                messages = batch.messages,
                gaps = metrics.gaps,
                crossed_repairs = metrics.crossed_repairs,
                "Flushed"
            );
        }
        self.sync.sync_metrics().inc_flushes();
        Ok(())
    }

    async fn write_snapshots(&self, key: i64) -> Result<(), Error> {
        for symbol in self.sync.symbols() {
            let snapshot = self.snapshots.fetch(&symbol, self.snapshot_limit).await?;
            let path = output_path(&symbol, key, FileKind::Snapshot)?;
            self.sink.write(&path, &encode(&snapshot)?).await?;
            debug!(
                symbol = %symbol,
                last_update_id = snapshot.last_update_id,
                "Saved reference snapshot"
            );
        }
        Ok(())
    }
}
