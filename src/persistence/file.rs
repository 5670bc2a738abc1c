//! Filesystem sink with write-then-rename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::PersistenceSink;
use crate::error::Error;

/// Writes payloads below a root directory.
///
/// Each write goes to `<name>.tmp`, is fsynced, then renamed over the final
/// name, so readers only ever see complete files.
#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    /// Create a sink rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn write_atomic(&self, target: &Path, payload: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp = target.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(payload).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, target).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        result
    }
}

#[async_trait]
impl PersistenceSink for FileSink {
    async fn write(&self, path: &Path, payload: &[u8]) -> Result<(), Error> {
        let target = self.root.join(path);
        self.write_atomic(&target, payload)
            .await
            .map_err(|source| Error::Persistence {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %target.display(), bytes = payload.len(), "Wrote file");
        Ok(())
    }
}
