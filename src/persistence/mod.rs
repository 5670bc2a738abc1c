//! Output sink and file layout.
//!
//! Every flush produces JSON files under `L2/<SYMBOL>/`:
//!
//! ```text
//! L2/BTCUSDT/2024-01-15T10-00-00_update.json    applied depthUpdate events
//! L2/BTCUSDT/2024-01-15T10-00-00_trades.json    aggTrade events
//! L2/BTCUSDT/2024-01-15T11-00-00_snapshot.json  reference snapshot
//! ```
//!
//! Timestamps are UTC, ISO-8601 with `:` replaced by `-` so the names are
//! valid on every filesystem. Paths handed to a [`PersistenceSink`] are
//! relative; the sink decides where the tree is rooted.

pub mod file;
pub mod memory;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Error;

pub use file::FileSink;
pub use memory::MemorySink;

/// Top-level directory of the output tree
pub const L2_DIR: &str = "L2";

/// Destination for flushed payloads.
///
/// `write` is all-or-nothing: after an `Err` no partial file may be visible
/// at `path`. Failures are not retried by the caller.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Store `payload` at the relative `path`
    async fn write(&self, path: &Path, payload: &[u8]) -> Result<(), Error>;
}

/// Which file of a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Applied diffs
    Update,
    /// Trades
    Trades,
    /// Full book snapshot
    Snapshot,
}

impl FileKind {
    fn suffix(self) -> &'static str {
        match self {
            FileKind::Update => "update",
            FileKind::Trades => "trades",
            FileKind::Snapshot => "snapshot",
        }
    }
}

/// Format epoch seconds as `2024-01-15T10-00-00`
///
/// # Errors
///
/// Returns [`Error::InvalidTimestamp`] when `secs` is outside chrono's range.
pub fn format_timestamp(secs: i64) -> Result<String, Error> {
    let time: DateTime<Utc> =
        DateTime::from_timestamp(secs, 0).ok_or(Error::InvalidTimestamp(secs))?;
    Ok(time.format("%Y-%m-%dT%H-%M-%S").to_string())
}

/// Relative path of one output file
pub fn output_path(symbol: &str, timestamp_secs: i64, kind: FileKind) -> Result<PathBuf, Error> {
    let name = format!("{}_{}.json", format_timestamp(timestamp_secs)?, kind.suffix());
    Ok(Path::new(L2_DIR).join(symbol).join(name))
}

/// Serialize a payload the way every output file is encoded
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, Error> {
    Ok(serde_json::to_vec(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0).unwrap(), "1970-01-01T00-00-00");
        assert_eq!(format_timestamp(1_705_312_800).unwrap(), "2024-01-15T10-00-00");
    }

    #[test]
    fn test_format_timestamp_out_of_range() {
        assert!(matches!(
            format_timestamp(i64::MAX),
            Err(Error::InvalidTimestamp(i64::MAX))
        ));
    }

    #[test]
    fn test_output_paths() {
        let ts = 1_705_312_800;
        assert_eq!(
            output_path("BTCUSDT", ts, FileKind::Update).unwrap(),
            Path::new("L2/BTCUSDT/2024-01-15T10-00-00_update.json")
        );
        assert_eq!(
            output_path("BTCUSDT", ts, FileKind::Trades).unwrap(),
            Path::new("L2/BTCUSDT/2024-01-15T10-00-00_trades.json")
        );
        assert_eq!(
            output_path("ETHBTC", ts + 3600, FileKind::Snapshot).unwrap(),
            Path::new("L2/ETHBTC/2024-01-15T11-00-00_snapshot.json")
        );
    }

    #[test]
    fn test_encode_empty_batch() {
        let empty: Vec<u64> = Vec::new();
        assert_eq!(encode(&empty).unwrap(), b"[]");
    }
}
