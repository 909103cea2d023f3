use super::{ObjectReader, ObjectStore, UploadedPart};
use crate::{Config, ObjectInfo, ObjectLocation, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_types::region::Region;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use snafu::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Characters which must be escaped in the `x-amz-copy-source` header.  The `/` separators in the
/// key are left as-is.
const COPY_SOURCE_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Implementation of [`ObjectStore`] for S3 and S3-compatible APIs
#[derive(Clone)]
pub struct S3Store {
    inner: Arc<S3StoreInner>,
}

struct S3StoreInner {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    pub async fn new(config: &Config) -> Self {
        Self::from_client(make_s3_client(config).await)
    }

    /// Wrap an already-configured AWS SDK client
    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self {
            inner: Arc::new(S3StoreInner { client }),
        }
    }

    fn client(&self) -> &aws_sdk_s3::Client {
        &self.inner.client
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self))]
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        use aws_smithy_types_convert::date_time::DateTimeExt;

        let metadata = match self
            .client()
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(metadata) => metadata,
            Err(e) if e.as_service_error().map_or(false, |e| e.is_not_found()) => {
                return crate::error::ObjectNotFoundSnafu { bucket, key }.fail();
            }
            Err(e) => {
                return Err(e).context(crate::error::HeadObjectSnafu { bucket, key });
            }
        };

        Ok(ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: metadata.content_length().unwrap_or_default() as u64,
            last_modified: metadata
                .last_modified()
                .and_then(|timestamp| timestamp.to_chrono_utc().ok()),
            e_tag: metadata.e_tag().map(|e_tag| e_tag.to_string()),
        })
    }

    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        debug!("Reading object");

        let response = match self
            .client()
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().map_or(false, |e| e.is_no_such_key()) => {
                return crate::error::ObjectNotFoundSnafu { bucket, key }.fail();
            }
            Err(e) => {
                return Err(e).context(crate::error::GetObjectSnafu { bucket, key });
            }
        };

        Ok(Box::new(Box::pin(response.body.into_async_read())))
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put_object(&self, bucket: &str, key: &str, data: bytes::Bytes) -> Result<()> {
        self.client()
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .context(crate::error::PutObjectSnafu { bucket, key })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn put_object_from_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
    ) -> Result<()> {
        let body = file_body(path, size, "uploading a local file").await?;

        self.client()
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .context(crate::error::PutObjectSnafu { bucket, key })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client()
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .context(crate::error::DeleteObjectSnafu { bucket, key })?;

        Ok(())
    }

    #[instrument(skip(self, source, target), fields(%source, %target))]
    async fn copy_object(&self, source: &ObjectLocation, target: &ObjectLocation) -> Result<()> {
        self.client()
            .copy_object()
            .copy_source(copy_source(source))
            .bucket(&target.bucket)
            .key(&target.key)
            .send()
            .await
            .context(crate::error::CopyObjectSnafu {
                source_bucket: &source.bucket,
                source_key: &source.key,
                bucket: &target.bucket,
                key: &target.key,
            })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        use aws_smithy_types_convert::date_time::DateTimeExt;

        // Use the paginated API to automatically handle dealing with continuation tokens
        let mut pages = self
            .client()
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();

        while let Some(result) = pages.next().await {
            let page = result.context(crate::error::ListObjectsInPrefixSnafu { bucket, prefix })?;

            // `contents` is empty rather than missing if nothing matches the prefix
            objects.extend(page.contents().iter().filter_map(|object| {
                Some(ObjectInfo {
                    bucket: bucket.to_string(),
                    key: object.key()?.to_string(),
                    size: object.size().unwrap_or_default() as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|timestamp| timestamp.to_chrono_utc().ok()),
                    e_tag: object.e_tag().map(|e_tag| e_tag.to_string()),
                })
            }));
        }

        debug!(objects = objects.len(), "Listed objects in prefix");

        Ok(objects)
    }

    #[instrument(skip(self, target), fields(%target))]
    async fn create_multipart_upload(&self, target: &ObjectLocation) -> Result<String> {
        let response = self
            .client()
            .create_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .send()
            .await
            .context(crate::error::CreateMultipartUploadSnafu {
                bucket: &target.bucket,
                key: &target.key,
            })?;

        let upload_id = response.upload_id().context(crate::error::IncompleteResponseSnafu {
            operation: "CreateMultipartUpload",
            bucket: &target.bucket,
            key: &target.key,
            field: "upload ID",
        })?;

        Ok(upload_id.to_string())
    }

    #[instrument(skip(self, target), fields(%target))]
    async fn upload_part(
        &self,
        target: &ObjectLocation,
        upload_id: &str,
        part_number: i32,
        path: &Path,
        size: u64,
    ) -> Result<String> {
        let body = file_body(path, size, "uploading a part").await?;

        let response = self
            .client()
            .upload_part()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(body)
            .send()
            .await
            .context(crate::error::UploadPartSnafu {
                bucket: &target.bucket,
                key: &target.key,
                part_number,
            })?;

        let e_tag = response.e_tag().context(crate::error::IncompleteResponseSnafu {
            operation: "UploadPart",
            bucket: &target.bucket,
            key: &target.key,
            field: "ETag",
        })?;

        Ok(e_tag.to_string())
    }

    #[instrument(skip(self, target, source), fields(%target, %source))]
    async fn upload_part_copy(
        &self,
        target: &ObjectLocation,
        upload_id: &str,
        part_number: i32,
        source: &ObjectLocation,
    ) -> Result<String> {
        use aws_sdk_s3::error::ProvideErrorMetadata;

        let response = match self
            .client()
            .upload_part_copy()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .copy_source(copy_source(source))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.code() == Some("NoSuchKey") => {
                return crate::error::ObjectNotFoundSnafu {
                    bucket: &source.bucket,
                    key: &source.key,
                }
                .fail();
            }
            Err(e) => {
                return Err(e).context(crate::error::UploadPartCopySnafu {
                    bucket: &target.bucket,
                    key: &target.key,
                    part_number,
                    source_bucket: &source.bucket,
                    source_key: &source.key,
                });
            }
        };

        let e_tag = response
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .context(crate::error::IncompleteResponseSnafu {
                operation: "UploadPartCopy",
                bucket: &target.bucket,
                key: &target.key,
                field: "ETag",
            })?;

        Ok(e_tag.to_string())
    }

    #[instrument(skip(self, target, parts), fields(%target, parts = parts.len()))]
    async fn complete_multipart_upload(
        &self,
        target: &ObjectLocation,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .e_tag(&part.e_tag)
                    .part_number(part.part_number)
                    .build()
            })
            .collect::<Vec<_>>();

        self.client()
            .complete_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .context(crate::error::CompleteMultipartUploadSnafu {
                bucket: &target.bucket,
                key: &target.key,
            })?;

        Ok(())
    }

    #[instrument(skip(self, target), fields(%target))]
    async fn abort_multipart_upload(
        &self,
        target: &ObjectLocation,
        upload_id: &str,
    ) -> Result<()> {
        self.client()
            .abort_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .send()
            .await
            .context(crate::error::AbortMultipartUploadSnafu {
                bucket: &target.bucket,
                key: &target.key,
            })?;

        Ok(())
    }
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S3Store")
    }
}

/// Open a local file as a request body, after confirming it has exactly `size` bytes.
///
/// The SDK takes the content length from the file's metadata, so a file of the wrong size would
/// otherwise upload without complaint.
async fn file_body(path: &Path, size: u64, operation: &'static str) -> Result<ByteStream> {
    let metadata = tokio::fs::metadata(path)
        .await
        .context(crate::error::SourceFileNotFoundSnafu { path })?;

    ensure!(
        metadata.len() == size,
        crate::error::SizeMismatchSnafu {
            operation,
            expected: size,
            actual: metadata.len(),
        }
    );

    ByteStream::from_path(path)
        .await
        .context(crate::error::OpenPartBodySnafu { path })
}

/// Format the `x-amz-copy-source` value for an object
fn copy_source(source: &ObjectLocation) -> String {
    format!(
        "{}/{}",
        source.bucket,
        utf8_percent_encode(&source.key, COPY_SOURCE_ESCAPES)
    )
}

/// Create a new AWS SDK S3 client, using the region, credentials and endpoint in the config and
/// falling back to the default configuration deduced from the environment
async fn make_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let region_provider = if let Some(region) = &config.aws_region {
        RegionProviderChain::first_try(Region::new(region.clone()))
    } else {
        // No explicit region; use the environment
        RegionProviderChain::default_provider().or_else("us-east-1")
    };

    let mut loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region_provider);

    if let (Some(access_key_id), Some(secret_access_key)) =
        (&config.aws_access_key_id, &config.aws_secret_access_key)
    {
        loader = loader.credentials_provider(aws_credential_types::Credentials::from_keys(
            access_key_id,
            secret_access_key,
            None,
        ));
    }

    let aws_config = loader.load().await;

    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
    if let Some(s3_endpoint) = &config.s3_endpoint {
        // S3-compatible services generally don't do virtual-hosted buckets
        s3_config_builder = s3_config_builder
            .endpoint_url(s3_endpoint.to_string())
            .force_path_style(true);
    }

    aws_sdk_s3::Client::from_conf(s3_config_builder.build())
}
