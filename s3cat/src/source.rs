//! Descriptors for the inputs and output of a concatenation.
use crate::objstore::ObjectStore;
use crate::Result;
use percent_encoding::percent_decode_str;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use url::Url;

/// The location of an object in object storage, identified by bucket and key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse an `s3://bucket/key` URL.
    ///
    /// In URL terms the bucket is the host name.  The path always starts with `/`, which is not
    /// part of the object key.
    pub fn from_url(url: &Url) -> Result<Self> {
        ensure!(
            url.scheme() == "s3",
            crate::error::UnsupportedObjectStorageSnafu { url: url.clone() }
        );

        let bucket = url
            .host_str()
            .ok_or_else(|| crate::error::MissingBucketSnafu { url: url.clone() }.build())?;

        let key = decoded_key(url)?;
        ensure!(
            !key.is_empty(),
            crate::error::MissingKeySnafu { url: url.clone() }
        );

        Ok(Self::new(bucket, key))
    }

    /// Like [`Self::from_url`] but an empty key is allowed, for URLs that denote a prefix or an
    /// entire bucket
    pub fn prefix_from_url(url: &Url) -> Result<Self> {
        ensure!(
            url.scheme() == "s3",
            crate::error::UnsupportedObjectStorageSnafu { url: url.clone() }
        );

        let bucket = url
            .host_str()
            .ok_or_else(|| crate::error::MissingBucketSnafu { url: url.clone() }.build())?;

        Ok(Self::new(bucket, decoded_key(url)?))
    }
}

impl FromStr for ObjectLocation {
    type Err = crate::S3CatError;

    fn from_str(s: &str) -> Result<Self> {
        let url = Url::parse(s).context(crate::error::InvalidUrlSnafu { url: s })?;

        Self::from_url(&url)
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Metadata about an object that exists in object storage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    pub e_tag: Option<String>,
}

/// One input to a concatenation, either an object already in object storage or a file on local
/// disk.
///
/// The `size` must be accurate.  The decision whether a source can be uploaded as a part on its own
/// or has to be merged with its neighbors is made on the basis of this size before any data are
/// read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceItem {
    /// For remote sources the object key, for local sources the path of the file
    pub key: String,

    /// The bucket containing the object, or `None` if this is a local file
    pub bucket: Option<String>,

    /// The length of the source in bytes
    pub size: u64,

    pub mtime: Option<chrono::DateTime<chrono::Utc>>,
    pub etag: Option<String>,
}

impl SourceItem {
    /// A source which is an object in object storage
    pub fn remote(bucket: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            bucket: Some(bucket.into()),
            size,
            mtime: None,
            etag: None,
        }
    }

    /// A source which is a file on the local filesystem.
    ///
    /// Any part of `path` which isn't valid UTF-8 is replaced, so use [`Self::from_local_file`]
    /// for paths that didn't come from a `str`.
    pub fn local(path: impl AsRef<Path>, size: u64) -> Self {
        Self {
            key: path.as_ref().to_string_lossy().into_owned(),
            bucket: None,
            size,
            mtime: None,
            etag: None,
        }
    }

    /// Describe an existing local file, reading its size and modification time from the
    /// filesystem.
    ///
    /// The path is kept as a string, so paths which aren't valid UTF-8 are refused.
    pub async fn from_local_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ensure!(
            path.to_str().is_some(),
            crate::error::NonUtf8PathSnafu { path }
        );

        let metadata = tokio::fs::metadata(path)
            .await
            .context(crate::error::SourceFileNotFoundSnafu { path })?;

        let mut item = Self::local(path, metadata.len());
        item.mtime = metadata.modified().ok().map(chrono::DateTime::from);

        Ok(item)
    }

    pub fn is_remote(&self) -> bool {
        self.bucket.is_some()
    }

    /// The path of a local source.  Meaningless for remote sources.
    pub(crate) fn local_path(&self) -> PathBuf {
        PathBuf::from(&self.key)
    }
}

impl From<ObjectInfo> for SourceItem {
    fn from(info: ObjectInfo) -> Self {
        Self {
            key: info.key,
            bucket: Some(info.bucket),
            size: info.size,
            mtime: info.last_modified,
            etag: info.e_tag,
        }
    }
}

/// Turn a source specification from a user into a [`SourceItem`].
///
/// Anything that parses as an `s3://` URL is looked up in object storage to learn its size;
/// anything else is treated as a path to a local file.
pub async fn resolve_source(store: &dyn ObjectStore, spec: &str) -> Result<SourceItem> {
    if spec.starts_with("s3://") {
        let location: ObjectLocation = spec.parse()?;
        let info = store.head_object(&location.bucket, &location.key).await?;

        debug!(%location, size = info.size, "Resolved remote source");

        Ok(info.into())
    } else {
        let item = SourceItem::from_local_file(spec).await?;

        debug!(path = spec, size = item.size, "Resolved local source");

        Ok(item)
    }
}

/// The object key named by an S3 URL.
///
/// The URL parser percent-encodes anything in the path that isn't URL-safe, such as spaces and
/// non-ASCII characters, but S3 keys are arbitrary UTF-8 so the encoding has to be undone.
fn decoded_key(url: &Url) -> Result<String> {
    let key = percent_decode_str(url_path_to_s3_path(url.path()))
        .decode_utf8()
        .context(crate::error::NonUtf8KeySnafu { url: url.clone() })?;

    Ok(key.into_owned())
}

/// Paths from URLs like `s3://bucket/prefix/object` always start with `/`, but that's not
/// actually part of the S3 object key.
pub(crate) fn url_path_to_s3_path(key: &str) -> &str {
    if let Some(stripped) = key.strip_prefix('/') {
        stripped
    } else {
        key
    }
}
