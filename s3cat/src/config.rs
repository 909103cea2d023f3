use std::path::PathBuf;
use url::Url;

/// What to do when the bytes produced by merging small sources together don't add up to the sum
/// of the declared sizes of those sources.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum SizeMismatchPolicy {
    /// Fail the concatenation and abort the multi-part upload
    Fail,

    /// Log an error, mark the run as degraded in the summary, and keep going with the bytes that
    /// were actually produced
    Warn,
}

/// The configuration settings that control the behavior of concatenation.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct Config {
    /// Use a custom S3 endpoint instead of AWS.
    ///
    /// Use this to operate on a non-Amazon S3-compatible service.  If this is set, path-style
    /// addressing is used for buckets.
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "URL"))]
    pub s3_endpoint: Option<Url>,

    /// The AWS region to use.  If not set, the region is deduced from the environment.
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "REGION"))]
    pub aws_region: Option<String>,

    /// The AWS access key ID to use.  If not set, credentials are deduced from the environment.
    #[cfg_attr(feature = "clap", clap(long, global = true, requires = "aws_secret_access_key"))]
    pub aws_access_key_id: Option<String>,

    /// The AWS secret access key to use with `aws_access_key_id`.
    #[cfg_attr(feature = "clap", clap(long, global = true, requires = "aws_access_key_id"))]
    pub aws_secret_access_key: Option<String>,

    /// The smallest part S3 will accept in a multi-part upload, other than the final part.
    ///
    /// Sources smaller than this are merged with their neighbors before uploading.  AWS S3
    /// requires 5 MiB; some S3-compatible services differ.
    ///
    /// Can be specified as an integer, ie "5242880", or with a suffix ie "5MiB"
    #[cfg_attr(feature = "clap", clap(long, default_value = "5MiB", global = true))]
    pub min_part_size: byte_unit::Byte,

    /// The maximum number of part uploads to run concurrently.
    ///
    /// Part numbers are always assigned in source order, so this has no effect on the layout of
    /// the output object.
    #[cfg_attr(feature = "clap", clap(long, default_value = "10", global = true))]
    pub max_concurrent_requests: usize,

    /// Directory in which to create the temporary files used to merge small sources.
    ///
    /// Defaults to the system temp directory.
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "DIR"))]
    pub temp_dir: Option<PathBuf>,

    /// What to do if merged data doesn't match the declared sizes of the merged sources
    #[cfg_attr(
        feature = "clap",
        clap(long, value_enum, default_value = "fail", global = true)
    )]
    pub size_mismatch: SizeMismatchPolicy,

    /// Delete local source files once their contents have been consumed.
    ///
    /// Temporary files created by s3cat itself are always deleted.  Local files passed in as
    /// sources are left alone unless this is set, so that a failed run can be retried.
    #[cfg_attr(feature = "clap", clap(long, global = true))]
    pub consume_local_sources: bool,
}

impl Config {
    /// The minimum part size in bytes
    pub(crate) fn min_part_size_bytes(&self) -> u64 {
        self.min_part_size.get_bytes() as u64
    }

    /// The directory where temp blobs are created
    pub(crate) fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        // XXX: Duplicated here and in the `clap` attributes, because the lib crate only depends
        // on clap when the feature is enabled
        Self {
            s3_endpoint: None,
            aws_region: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            min_part_size: byte_unit::Byte::from_bytes(5 * 1024 * 1024),
            max_concurrent_requests: 10,
            temp_dir: None,
            size_mismatch: SizeMismatchPolicy::Fail,
            consume_local_sources: false,
        }
    }
}
