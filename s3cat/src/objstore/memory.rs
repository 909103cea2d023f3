//! An [`ObjectStore`] that keeps everything in memory.
//!
//! It follows the S3 rules that matter to concatenation (minimum part size for all but the last
//! part, uploads must exist to be completed or aborted, missing keys are reported as such), and it
//! can be told to fail specific operations so that failure handling can be exercised.
use super::{ObjectReader, ObjectStore, UploadedPart};
use crate::{ObjectInfo, ObjectLocation, Result};
use bytes::Bytes;
use snafu::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// The operations of [`ObjectStore`], for fault injection and call accounting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    HeadObject,
    GetObject,
    PutObject,
    DeleteObject,
    CopyObject,
    ListObjects,
    CreateMultipartUpload,
    UploadPart,
    UploadPartCopy,
    CompleteMultipartUpload,
    AbortMultipartUpload,
}

impl StoreOperation {
    /// Does this operation change the state of the store?
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::HeadObject | Self::GetObject | Self::ListObjects
        )
    }

    fn name(&self) -> &'static str {
        match self {
            Self::HeadObject => "HeadObject",
            Self::GetObject => "GetObject",
            Self::PutObject => "PutObject",
            Self::DeleteObject => "DeleteObject",
            Self::CopyObject => "CopyObject",
            Self::ListObjects => "ListObjects",
            Self::CreateMultipartUpload => "CreateMultipartUpload",
            Self::UploadPart => "UploadPart",
            Self::UploadPartCopy => "UploadPartCopy",
            Self::CompleteMultipartUpload => "CompleteMultipartUpload",
            Self::AbortMultipartUpload => "AbortMultipartUpload",
        }
    }
}

/// In-memory implementation of [`ObjectStore`]
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

struct MemoryStoreInner {
    objects: BTreeMap<(String, String), StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    next_upload_id: u64,
    min_part_size: u64,
    faults: Vec<Fault>,
    calls: Vec<StoreOperation>,
    aborted_uploads: Vec<String>,
    completed_part_sizes: HashMap<ObjectLocation, Vec<u64>>,
}

struct StoredObject {
    data: Bytes,
    e_tag: String,
    last_modified: chrono::DateTime<chrono::Utc>,
}

struct PendingUpload {
    target: ObjectLocation,
    parts: BTreeMap<i32, (String, Bytes)>,
}

/// A one-shot failure armed by [`MemoryStore::fail_on`]
struct Fault {
    operation: StoreOperation,
    part_number: Option<i32>,
}

impl MemoryStore {
    /// A new empty store which enforces the 5 MiB S3 minimum part size
    pub fn new() -> Self {
        Self::with_min_part_size(5 * 1024 * 1024)
    }

    /// A new empty store which rejects multi-part uploads with any non-final part smaller than
    /// `min_part_size`
    pub fn with_min_part_size(min_part_size: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                objects: BTreeMap::new(),
                uploads: HashMap::new(),
                next_upload_id: 1,
                min_part_size,
                faults: Vec::new(),
                calls: Vec::new(),
                aborted_uploads: Vec::new(),
                completed_part_sizes: HashMap::new(),
            })),
        }
    }

    /// Store an object directly, without it counting as a call to the store
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.lock().store(bucket, key, data.into());
    }

    /// The contents of an object, if it exists
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.data.clone())
    }

    /// Make the next call to `operation` fail.
    ///
    /// If `part_number` is given, only a call for that part number of a multi-part upload fails.
    /// Each fault fires once.
    pub fn fail_on(&self, operation: StoreOperation, part_number: impl Into<Option<i32>>) {
        self.lock().faults.push(Fault {
            operation,
            part_number: part_number.into(),
        });
    }

    /// Every call made to the store so far, in order
    pub fn calls(&self) -> Vec<StoreOperation> {
        self.lock().calls.clone()
    }

    /// The number of calls made so far that could have changed the state of the store
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|operation| operation.is_mutation())
            .count()
    }

    /// The number of multi-part uploads which have been started but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// IDs of the multi-part uploads which have been aborted
    pub fn aborted_uploads(&self) -> Vec<String> {
        self.lock().aborted_uploads.clone()
    }

    /// The sizes of the parts of the most recent multi-part upload completed at `target`
    pub fn completed_part_sizes(&self, target: &ObjectLocation) -> Option<Vec<u64>> {
        self.lock().completed_part_sizes.get(target).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    /// Record a call, and fail it if a matching fault is armed
    fn call(
        &mut self,
        operation: StoreOperation,
        part_number: Option<i32>,
        bucket: &str,
        key: &str,
    ) -> Result<()> {
        self.calls.push(operation);

        let fault = self.faults.iter().position(|fault| {
            fault.operation == operation
                && (fault.part_number.is_none() || fault.part_number == part_number)
        });

        if let Some(index) = fault {
            self.faults.remove(index);
            debug!(operation = operation.name(), ?part_number, bucket, key, "Injecting fault");

            return store_error(operation, bucket, key, "injected fault");
        }

        Ok(())
    }

    fn store(&mut self, bucket: &str, key: &str, data: Bytes) {
        let object = StoredObject {
            e_tag: e_tag(&data),
            data,
            last_modified: chrono::Utc::now(),
        };

        self.objects
            .insert((bucket.to_string(), key.to_string()), object);
    }

    fn get(&self, bucket: &str, key: &str) -> Result<&StoredObject> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .context(crate::error::ObjectNotFoundSnafu { bucket, key })
    }

    fn upload(&mut self, target: &ObjectLocation, upload_id: &str) -> Result<&mut PendingUpload> {
        match self.uploads.get_mut(upload_id) {
            Some(upload) if &upload.target == target => Ok(upload),
            _ => store_error(
                StoreOperation::UploadPart,
                &target.bucket,
                &target.key,
                format!("NoSuchUpload: {upload_id}"),
            ),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        let mut inner = self.lock();
        inner.call(StoreOperation::HeadObject, None, bucket, key)?;
        let object = inner.get(bucket, key)?;

        Ok(ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: object.data.len() as u64,
            last_modified: Some(object.last_modified),
            e_tag: Some(object.e_tag.clone()),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let mut inner = self.lock();
        inner.call(StoreOperation::GetObject, None, bucket, key)?;
        let data = inner.get(bucket, key)?.data.clone();

        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        let mut inner = self.lock();
        inner.call(StoreOperation::PutObject, None, bucket, key)?;
        inner.store(bucket, key, data);

        Ok(())
    }

    async fn put_object_from_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
    ) -> Result<()> {
        self.lock()
            .call(StoreOperation::PutObject, None, bucket, key)?;

        let data = read_exact_file(path, size, "uploading a local file").await?;
        self.lock().store(bucket, key, data);

        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.call(StoreOperation::DeleteObject, None, bucket, key)?;

        // Like S3, deleting an object that doesn't exist is not an error
        inner
            .objects
            .remove(&(bucket.to_string(), key.to_string()));

        Ok(())
    }

    async fn copy_object(&self, source: &ObjectLocation, target: &ObjectLocation) -> Result<()> {
        let mut inner = self.lock();
        inner.call(
            StoreOperation::CopyObject,
            None,
            &target.bucket,
            &target.key,
        )?;
        let data = inner.get(&source.bucket, &source.key)?.data.clone();
        inner.store(&target.bucket, &target.key, data);

        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut inner = self.lock();
        inner.call(StoreOperation::ListObjects, None, bucket, prefix)?;

        // The map is ordered by (bucket, key) so the results come out in key order
        Ok(inner
            .objects
            .iter()
            .filter(|((object_bucket, key), _)| object_bucket == bucket && key.starts_with(prefix))
            .map(|((bucket, key), object)| ObjectInfo {
                bucket: bucket.clone(),
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
                e_tag: Some(object.e_tag.clone()),
            })
            .collect())
    }

    async fn create_multipart_upload(&self, target: &ObjectLocation) -> Result<String> {
        let mut inner = self.lock();
        inner.call(
            StoreOperation::CreateMultipartUpload,
            None,
            &target.bucket,
            &target.key,
        )?;

        let upload_id = format!("upload-{:04}", inner.next_upload_id);
        inner.next_upload_id += 1;
        inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                target: target.clone(),
                parts: BTreeMap::new(),
            },
        );

        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        target: &ObjectLocation,
        upload_id: &str,
        part_number: i32,
        path: &Path,
        size: u64,
    ) -> Result<String> {
        {
            let mut inner = self.lock();
            inner.call(
                StoreOperation::UploadPart,
                Some(part_number),
                &target.bucket,
                &target.key,
            )?;
            inner.upload(target, upload_id)?;
        }

        let data = read_exact_file(path, size, "uploading a part").await?;
        let part_e_tag = e_tag(&data);

        self.lock()
            .upload(target, upload_id)?
            .parts
            .insert(part_number, (part_e_tag.clone(), data));

        Ok(part_e_tag)
    }

    async fn upload_part_copy(
        &self,
        target: &ObjectLocation,
        upload_id: &str,
        part_number: i32,
        source: &ObjectLocation,
    ) -> Result<String> {
        let mut inner = self.lock();
        inner.call(
            StoreOperation::UploadPartCopy,
            Some(part_number),
            &target.bucket,
            &target.key,
        )?;

        let data = inner.get(&source.bucket, &source.key)?.data.clone();
        let part_e_tag = e_tag(&data);

        inner
            .upload(target, upload_id)?
            .parts
            .insert(part_number, (part_e_tag.clone(), data));

        Ok(part_e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        target: &ObjectLocation,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let mut inner = self.lock();
        let operation = StoreOperation::CompleteMultipartUpload;
        inner.call(operation, None, &target.bucket, &target.key)?;

        let min_part_size = inner.min_part_size;
        let upload = inner.upload(target, upload_id)?;

        if parts.is_empty() {
            return store_error(operation, &target.bucket, &target.key, "MalformedXML: no parts");
        }

        let mut data = Vec::new();
        let mut sizes = Vec::with_capacity(parts.len());

        for (index, part) in parts.iter().enumerate() {
            if index > 0 && parts[index - 1].part_number >= part.part_number {
                return store_error(operation, &target.bucket, &target.key, "InvalidPartOrder");
            }

            let (uploaded_e_tag, part_data) = match upload.parts.get(&part.part_number) {
                Some(uploaded) => uploaded,
                None => {
                    return store_error(
                        operation,
                        &target.bucket,
                        &target.key,
                        format!("InvalidPart: part {} was never uploaded", part.part_number),
                    )
                }
            };

            if uploaded_e_tag != &part.e_tag {
                return store_error(
                    operation,
                    &target.bucket,
                    &target.key,
                    format!("InvalidPart: ETag mismatch for part {}", part.part_number),
                );
            }

            let is_final = index == parts.len() - 1;
            if !is_final && (part_data.len() as u64) < min_part_size {
                return store_error(
                    operation,
                    &target.bucket,
                    &target.key,
                    format!(
                        "EntityTooSmall: part {} is {} bytes",
                        part.part_number,
                        part_data.len()
                    ),
                );
            }

            sizes.push(part_data.len() as u64);
            data.extend_from_slice(part_data);
        }

        inner.uploads.remove(upload_id);
        inner.store(&target.bucket, &target.key, Bytes::from(data));
        inner.completed_part_sizes.insert(target.clone(), sizes);

        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        target: &ObjectLocation,
        upload_id: &str,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.call(
            StoreOperation::AbortMultipartUpload,
            None,
            &target.bucket,
            &target.key,
        )?;
        inner.upload(target, upload_id)?;
        inner.uploads.remove(upload_id);
        inner.aborted_uploads.push(upload_id.to_string());

        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();

        f.debug_struct("MemoryStore")
            .field("objects", &inner.objects.len())
            .field("uploads", &inner.uploads.len())
            .finish()
    }
}

fn store_error<T>(
    operation: StoreOperation,
    bucket: &str,
    key: &str,
    message: impl Into<String>,
) -> Result<T> {
    crate::error::ObjectStoreSnafu {
        operation: operation.name(),
        bucket,
        key,
        message: message.into(),
    }
    .fail()
}

fn e_tag(data: &[u8]) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    data.hash(&mut hasher);

    format!("\"{:016x}\"", hasher.finish())
}

async fn read_exact_file(path: &Path, size: u64, operation: &'static str) -> Result<Bytes> {
    let data = tokio::fs::read(path)
        .await
        .context(crate::error::SourceFileNotFoundSnafu { path })?;

    ensure!(
        data.len() as u64 == size,
        crate::error::SizeMismatchSnafu {
            operation,
            expected: size,
            actual: data.len() as u64,
        }
    );

    Ok(Bytes::from(data))
}
