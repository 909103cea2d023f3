use crate::{Config, ObjectInfo, ObjectLocation, Result};
use dyn_clone::DynClone;
use snafu::prelude::*;
use std::path::Path;
use tokio::io::AsyncRead;

mod memory;
mod s3;

pub use memory::{MemoryStore, StoreOperation};
pub use s3::S3Store;

/// A streaming reader over the contents of an object
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// A part which has been uploaded to a multi-part upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedPart {
    /// The part number, starting from 1
    pub part_number: i32,

    /// The ETag the object store assigned the part, which must be presented again when the upload
    /// is completed
    pub e_tag: String,

    /// The size of the part in bytes
    pub size: u64,
}

/// An object storage system like S3.
///
/// Everything s3cat needs from object storage goes through this trait, so that callers construct
/// the client once (with whatever credentials and endpoint they need) and pass it in.  It also
/// means the concatenation logic can be exercised against [`MemoryStore`].
///
/// Note that all implementations are trivially cloneable such that the cost of a clone is the cost
/// of increasing the ref count on an `Arc`
#[async_trait::async_trait]
pub trait ObjectStore: DynClone + std::fmt::Debug + Sync + Send + 'static {
    /// Get the size and other metadata of an object.
    ///
    /// Fails with [`crate::S3CatError::ObjectNotFound`] if there is no such object.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo>;

    /// Open a streaming reader over the entire contents of an object.
    ///
    /// Fails with [`crate::S3CatError::ObjectNotFound`] if there is no such object.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader>;

    /// Download an object into a local file, replacing whatever the file contained.
    ///
    /// Returns the number of bytes written.  The object is streamed, never held in memory in its
    /// entirety.
    async fn download_to_file(&self, bucket: &str, key: &str, path: &Path) -> Result<u64> {
        let mut reader = self.get_object(bucket, key).await?;
        let mut file = tokio::fs::File::create(path)
            .await
            .context(crate::error::WriteLocalFileSnafu { path })?;

        let bytes = tokio::io::copy(&mut reader, &mut file).await.context(
            crate::error::ReadByteStreamSnafu {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
        )?;

        tokio::io::AsyncWriteExt::flush(&mut file)
            .await
            .context(crate::error::WriteLocalFileSnafu { path })?;

        Ok(bytes)
    }

    /// Upload a small object in one request
    async fn put_object(&self, bucket: &str, key: &str, data: bytes::Bytes) -> Result<()>;

    /// Upload the contents of a local file as an object in one request, streaming it from disk.
    ///
    /// `size` is the expected length of the file; the upload fails if the file is a different
    /// size.
    async fn put_object_from_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
    ) -> Result<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Copy an object server-side, without the data passing through this process
    async fn copy_object(&self, source: &ObjectLocation, target: &ObjectLocation) -> Result<()>;

    /// List all objects in a bucket whose keys start with `prefix`, in key order.
    ///
    /// Pagination is handled internally, so this can take a while for big buckets.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Start a multi-part upload of `target`, returning the upload ID
    async fn create_multipart_upload(&self, target: &ObjectLocation) -> Result<String>;

    /// Upload the contents of a local file as part `part_number` of a multi-part upload.
    ///
    /// `size` is the exact number of bytes the part must contain.  Returns the ETag of the part.
    async fn upload_part(
        &self,
        target: &ObjectLocation,
        upload_id: &str,
        part_number: i32,
        path: &Path,
        size: u64,
    ) -> Result<String>;

    /// Populate part `part_number` of a multi-part upload by copying an entire existing object
    /// server-side.  Returns the ETag of the part.
    async fn upload_part_copy(
        &self,
        target: &ObjectLocation,
        upload_id: &str,
        part_number: i32,
        source: &ObjectLocation,
    ) -> Result<String>;

    /// Finish a multi-part upload, making the object visible.
    ///
    /// `parts` must be sorted by part number.
    async fn complete_multipart_upload(
        &self,
        target: &ObjectLocation,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()>;

    /// Abandon a multi-part upload, discarding any parts uploaded so far
    async fn abort_multipart_upload(&self, target: &ObjectLocation, upload_id: &str)
        -> Result<()>;
}

dyn_clone::clone_trait_object!(ObjectStore);

/// Construct the S3 implementation of [`ObjectStore`] from the config.
///
/// The endpoint, region and credentials in the config are applied; anything not specified there
/// comes from the usual AWS environment variables and config files.
pub async fn s3_store(config: &Config) -> Box<dyn ObjectStore> {
    Box::new(S3Store::new(config).await)
}
