//! # depth-recorder
//!
//! Order book synchronization and market data recording for exchange
//! depth-diff and trade feeds.
//!
//! ## Features
//!
//! - **Sync Engine** - Snapshot bootstrap, buffered replay, gap detection and
//!   crossed-book repair per symbol
//! - **Recorder** - Raw diffs and trades accumulated between flushes and
//!   written to hourly JSON files, plus reference snapshots
//! - **Wall-Clock Scheduler** - Flushes aligned to interval boundaries, with a
//!   daily cutoff
//! - **Async/Await** - Built on Tokio; ingestion never blocks on the network
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use depth_recorder::recorder::Recorder;
//! use depth_recorder::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), depth_recorder::Error> {
//!     let config = Config::new(["BTCUSDT", "ETHUSDT"]).with_data_dir("data");
//!     let recorder = Recorder::binance(config)?;
//!
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     let reason = recorder.run(shutdown).await?;
//!     println!("stopped: {reason:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Using the engine directly
//!
//! ```rust
//! use depth_recorder::orderbook::{OrderBookSync, SyncState};
//! use depth_recorder::types::{BookSnapshot, DiffMessage};
//! use rust_decimal::Decimal;
//!
//! let sync = OrderBookSync::new();
//! sync.register("BTCUSDT");
//!
//! // The first diff starts a bootstrap
//! let diff = DiffMessage::new("BTCUSDT", 101, 103)
//!     .with_bid(Decimal::new(100, 0), Decimal::ONE);
//! assert!(sync.on_diff(diff).needs_snapshot());
//!
//! let snapshot = BookSnapshot::new(
//!     102,
//!     vec![(Decimal::new(99, 0), Decimal::ONE)],
//!     vec![(Decimal::new(101, 0), Decimal::ONE)],
//! );
//! sync.install_snapshot("BTCUSDT", &snapshot);
//! assert_eq!(sync.sync_state("BTCUSDT"), Some(SyncState::Synced));
//! ```
//!
//! ## Architecture
//!
//! - [`types`] - Wire messages, validated diffs/trades and snapshots
//! - [`orderbook`] - Per-symbol book state machine and the multi-symbol engine
//! - [`client`] - Feed and snapshot seams with their Binance implementations
//! - [`persistence`] - Output layout and atomic file sink
//! - [`scheduler`] - Wall-clock aligned flush loop
//! - [`recorder`] - Runtime tying feed, engine and scheduler together
//! - [`metrics`] - Lock-free per-symbol counters
//! - [`config`] - Configuration, builder and environment loading
//! - [`error`] - Error types for the crate
//!
//! ## Prices
//!
//! Prices and sizes are [`rust_decimal::Decimal`] parsed from the exchange's
//! string encoding, so they are exact and compare without float drift.
//! A level with size zero is a removal.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orderbook;
pub mod persistence;
pub mod recorder;
pub mod scheduler;
pub mod types;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use error::Error;
pub use orderbook::OrderBookSync;
pub use recorder::Recorder;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;
