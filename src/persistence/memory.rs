//! In-memory sink for tests and dry runs.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::PersistenceSink;
use crate::error::Error;

/// Keeps every write in memory, in order.
///
/// [`MemorySink::fail_writes`] makes subsequent writes fail, to exercise the
/// fatal persistence path.
#[derive(Debug, Default)]
pub struct MemorySink {
    files: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    failing: AtomicBool,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail (or succeed again)
    pub fn fail_writes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// All writes so far as `(path, payload)`
    pub fn files(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.files.lock().clone()
    }

    /// Paths written so far, in write order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().iter().map(|(p, _)| p.clone()).collect()
    }

    /// Latest payload written at `path`
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let path = path.as_ref();
        self.files
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, payload)| payload.clone())
    }

    /// Number of writes so far
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn write(&self, path: &Path, payload: &[u8]) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Persistence {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "injected write failure"),
            });
        }
        self.files
            .lock()
            .push((path.to_path_buf(), payload.to_vec()));
        Ok(())
    }
}
