//! Moving whole objects between object storage and local disk without holding them in memory.
use crate::objstore::ObjectStore;
use crate::temp::TempBlobManager;
use crate::{Config, ObjectLocation, Result};
use snafu::prelude::*;
use std::path::Path;
use tracing::{debug, instrument};

/// Streams object data to and from local files
#[derive(Clone, Debug)]
pub struct RemoteStreamer {
    store: Box<dyn ObjectStore>,
    temp: TempBlobManager,
}

impl RemoteStreamer {
    pub fn new(store: Box<dyn ObjectStore>, config: &Config) -> Self {
        Self::with_temp_blobs(store, TempBlobManager::new(config))
    }

    pub(crate) fn with_temp_blobs(store: Box<dyn ObjectStore>, temp: TempBlobManager) -> Self {
        Self { store, temp }
    }

    /// Download an object to a local file.  Returns the number of bytes written.
    #[instrument(skip(self, source), fields(%source))]
    pub async fn download_to_file(&self, source: &ObjectLocation, path: &Path) -> Result<u64> {
        let bytes = self
            .store
            .download_to_file(&source.bucket, &source.key, path)
            .await?;

        debug!(bytes, "Downloaded object");

        Ok(bytes)
    }

    /// Download an object into a fresh temp blob owned by the caller.
    ///
    /// If `expected_size` is given the download must be exactly that long.
    pub(crate) async fn download_to_temp_blob(
        &self,
        source: &ObjectLocation,
        expected_size: Option<u64>,
    ) -> Result<(crate::temp::TempBlob, u64)> {
        let (file, blob) = self.temp.allocate()?;
        // The store opens the path itself
        drop(file);

        let bytes = self.download_to_file(source, blob.path()).await?;

        if let Some(expected) = expected_size {
            ensure!(
                bytes == expected,
                crate::error::SizeMismatchSnafu {
                    operation: "downloading a source object",
                    expected,
                    actual: bytes,
                }
            );
        }

        Ok((blob, bytes))
    }

    /// Upload a local file as an object.  Returns the size of the object.
    #[instrument(skip(self, target), fields(%target))]
    pub async fn upload_file(&self, path: &Path, target: &ObjectLocation) -> Result<u64> {
        let size = tokio::fs::metadata(path)
            .await
            .context(crate::error::SourceFileNotFoundSnafu { path })?
            .len();

        self.store
            .put_object_from_file(&target.bucket, &target.key, path, size)
            .await?;

        debug!(size, "Uploaded local file");

        Ok(size)
    }

    /// Copy an object by reading it and writing it back out through a temp file.
    ///
    /// Unlike [`ObjectStore::copy_object`], the data pass through this process, so this works
    /// when the store can't copy server-side (for instance when the destination is behind
    /// different credentials, in which case pass a `target_store`).  Returns the size of the
    /// object.
    #[instrument(skip(self, source, target, target_store), fields(%source, %target))]
    pub async fn stream_copy(
        &self,
        source: &ObjectLocation,
        target: &ObjectLocation,
        target_store: Option<&dyn ObjectStore>,
    ) -> Result<u64> {
        let (blob, size) = self.download_to_temp_blob(source, None).await?;

        let target_store = target_store.unwrap_or(self.store.as_ref());
        target_store
            .put_object_from_file(&target.bucket, &target.key, blob.path(), size)
            .await?;

        blob.release();

        debug!(size, "Streamed object copy");

        Ok(size)
    }
}
