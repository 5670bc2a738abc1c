//! Order book synchronization engine.
//!
//! - [`levels`] - One side of a book, price to size, zero removes
//! - [`book`] - Per-symbol state machine: bootstrap, gap detection and
//!   crossed-book repair
//! - [`accumulator`] - Drainable trade and update buffers
//! - [`manager`] - [`OrderBookSync`], routing messages across symbols
//!
//! # Example
//!
//! ```rust
//! use depth_recorder::orderbook::{OrderBookState, SyncState};
//! use depth_recorder::types::{BookSnapshot, DiffMessage};
//! use rust_decimal::Decimal;
//!
//! let mut book = OrderBookState::new("BTCUSDT");
//! book.begin_bootstrap();
//! book.install_snapshot(&BookSnapshot::new(
//!     100,
//!     vec![(Decimal::from(10), Decimal::from(5))],
//!     vec![(Decimal::from(11), Decimal::from(2))],
//! ));
//! assert_eq!(book.sync_state(), SyncState::Synced);
//!
//! book.apply(DiffMessage::new("BTCUSDT", 101, 101).with_bid(Decimal::from(10), Decimal::ZERO));
//! assert!(book.best_bid().is_none());
//! ```

pub mod accumulator;
pub mod book;
pub mod levels;
pub mod manager;

pub use accumulator::{DrainBuffer, TradeAccumulator, UpdateLog};
pub use book::{ApplyOutcome, BookView, BootstrapReport, OrderBookState, RepairReport, SyncState};
pub use levels::PriceLevelMap;
pub use manager::{FlushBatch, OrderBookSync, SyncAction};
