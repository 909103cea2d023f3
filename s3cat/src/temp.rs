//! Scratch files used while merging small sources.
//!
//! Every temp blob deletes its file when dropped, so whatever path a concatenation takes out of
//! the scheduler (success, error, or the future being dropped) no scratch files are left behind.
use crate::{Config, Result};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, warn};

const TEMP_BLOB_PREFIX: &str = ".s3cat-";

/// Allocates temp blobs in the configured directory and keeps count of how many are alive
#[derive(Clone, Debug)]
pub(crate) struct TempBlobManager {
    dir: PathBuf,
    live: Arc<AtomicUsize>,
}

impl TempBlobManager {
    pub fn new(config: &Config) -> Self {
        Self {
            dir: config.temp_dir(),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a new empty temp file, returning the open file and the blob which owns the path
    pub fn allocate(&self) -> Result<(tokio::fs::File, TempBlob)> {
        let file = tempfile::Builder::new()
            .prefix(TEMP_BLOB_PREFIX)
            .tempfile_in(&self.dir)
            .context(crate::error::CreateTempFileSnafu { dir: &self.dir })?;

        let (file, path) = file.into_parts();
        self.live.fetch_add(1, Ordering::SeqCst);

        debug!(path = %path.display(), "Allocated temp blob");

        Ok((
            tokio::fs::File::from_std(file),
            TempBlob {
                path: Some(path),
                live: self.live.clone(),
            },
        ))
    }

    /// How many temp blobs allocated by this manager still exist
    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// A temporary local file with a single owner.  The file is deleted when this is dropped.
#[derive(Debug)]
pub(crate) struct TempBlob {
    /// Always `Some` until the blob is released
    path: Option<TempPath>,
    live: Arc<AtomicUsize>,
}

impl TempBlob {
    pub fn path(&self) -> &Path {
        self.path
            .as_deref()
            .expect("BUG: temp blob used after it was released")
    }

    /// Delete the file now, logging rather than failing if that doesn't work.
    ///
    /// By the time a blob is released its contents have been consumed, so failing to delete it
    /// doesn't affect the result.
    pub fn release(mut self) {
        if let Some(path) = self.path.take() {
            let shown = path.display().to_string();

            if let Err(e) = path.close() {
                warn!(path = %shown, ?e, "Unable to delete temp blob");
            } else {
                debug!(path = %shown, "Released temp blob");
            }
        }
    }
}

impl Drop for TempBlob {
    fn drop(&mut self) {
        // A blob dropped without being released still has its `TempPath`, which deletes the file
        // when it goes out of scope
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
