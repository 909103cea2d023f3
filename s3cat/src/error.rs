use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::{
    abort_multipart_upload::AbortMultipartUploadError,
    complete_multipart_upload::CompleteMultipartUploadError, copy_object::CopyObjectError,
    create_multipart_upload::CreateMultipartUploadError, delete_object::DeleteObjectError,
    get_object::GetObjectError, head_object::HeadObjectError,
    list_objects_v2::ListObjectsV2Error, put_object::PutObjectError,
    upload_part::UploadPartError, upload_part_copy::UploadPartCopyError,
};
use snafu::prelude::*;
use std::path::PathBuf;
use url::Url;

pub type Result<T, E = S3CatError> = std::result::Result<T, E>;

/// Broad classification of [`S3CatError`] variants.
///
/// Callers that want to decide whether a failed run is worth retrying should look at this rather
/// than matching on individual variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A remote object or local file named as a source can't be read
    SourceNotFound,

    /// A call to the object store failed.  These are never retried internally.
    StoreCommunication,

    /// The number of bytes produced by a merge or upload disagrees with the declared size
    SizeMismatch,

    /// The multipart bookkeeping is inconsistent.  This is always a bug in s3cat.
    InvariantViolation,

    /// Reading or writing local files (including temp files) failed
    LocalIo,

    /// The caller asked for something that can't be done
    InvalidInput,

    /// The caller aborted the operation
    Aborted,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum S3CatError {
    #[snafu(display("The URL '{url}' doesn't correspond to any supported object storage technology.  Supported URL schemes are: s3"))]
    UnsupportedObjectStorage { url: Url },

    #[snafu(display("The S3 URL '{url}' is missing the bucket name"))]
    MissingBucket { url: Url },

    #[snafu(display("The S3 URL '{url}' doesn't name an object"))]
    MissingKey { url: Url },

    #[snafu(display("'{url}' is not a valid URL"))]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[snafu(display("The S3 URL '{url}' names a key which isn't valid UTF-8 once decoded"))]
    NonUtf8Key {
        url: Url,
        source: std::str::Utf8Error,
    },

    #[snafu(display("The local path '{}' isn't valid UTF-8", path.display()))]
    NonUtf8Path { path: PathBuf },

    #[snafu(display("The object '{key}' doesn't exist in S3 bucket '{bucket}'"))]
    ObjectNotFound { bucket: String, key: String },

    #[snafu(display("The local file '{}' can't be read", path.display()))]
    SourceFileNotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Error getting metadata about object '{key}' on S3 bucket '{bucket}'"))]
    HeadObject {
        bucket: String,
        key: String,
        source: SdkError<HeadObjectError>,
    },

    #[snafu(display("Error reading object '{key}' on S3 bucket '{bucket}'"))]
    GetObject {
        bucket: String,
        key: String,
        source: SdkError<GetObjectError>,
    },

    #[snafu(display("Error reading the body of object '{key}' on S3 bucket '{bucket}'"))]
    ReadByteStream {
        bucket: String,
        key: String,
        source: std::io::Error,
    },

    #[snafu(display("Error writing object '{key}' to S3 bucket '{bucket}'"))]
    PutObject {
        bucket: String,
        key: String,
        source: SdkError<PutObjectError>,
    },

    #[snafu(display("Error deleting object '{key}' from S3 bucket '{bucket}'"))]
    DeleteObject {
        bucket: String,
        key: String,
        source: SdkError<DeleteObjectError>,
    },

    #[snafu(display(
        "Error copying object '{source_key}' in S3 bucket '{source_bucket}' to '{key}' in bucket '{bucket}'"
    ))]
    CopyObject {
        source_bucket: String,
        source_key: String,
        bucket: String,
        key: String,
        source: SdkError<CopyObjectError>,
    },

    #[snafu(display("Error listing objects in S3 bucket '{bucket}' with prefix '{prefix}'"))]
    ListObjectsInPrefix {
        bucket: String,
        prefix: String,
        source: SdkError<ListObjectsV2Error>,
    },

    #[snafu(display("Error starting multi-part upload of object '{key}' in S3 bucket '{bucket}'"))]
    CreateMultipartUpload {
        bucket: String,
        key: String,
        source: SdkError<CreateMultipartUploadError>,
    },

    #[snafu(display(
        "Error uploading part {part_number} of object '{key}' in S3 bucket '{bucket}'"
    ))]
    UploadPart {
        bucket: String,
        key: String,
        part_number: i32,
        source: SdkError<UploadPartError>,
    },

    #[snafu(display("Error opening '{}' as the body of a part upload", path.display()))]
    OpenPartBody {
        path: PathBuf,
        source: aws_sdk_s3::primitives::ByteStreamError,
    },

    #[snafu(display(
        "Error copying '{source_bucket}/{source_key}' into part {part_number} of object '{key}' in S3 bucket '{bucket}'"
    ))]
    UploadPartCopy {
        bucket: String,
        key: String,
        part_number: i32,
        source_bucket: String,
        source_key: String,
        source: SdkError<UploadPartCopyError>,
    },

    #[snafu(display("Error completing multi-part upload of object '{key}' in S3 bucket '{bucket}'"))]
    CompleteMultipartUpload {
        bucket: String,
        key: String,
        source: SdkError<CompleteMultipartUploadError>,
    },

    #[snafu(display("Error aborting multi-part upload of object '{key}' in S3 bucket '{bucket}'"))]
    AbortMultipartUpload {
        bucket: String,
        key: String,
        source: SdkError<AbortMultipartUploadError>,
    },

    #[snafu(display("S3 response to {operation} on '{bucket}/{key}' is missing the {field}"))]
    IncompleteResponse {
        operation: &'static str,
        bucket: String,
        key: String,
        field: &'static str,
    },

    /// Failure reported by an object store implementation that doesn't speak the AWS SDK's error
    /// types (such as [`crate::MemoryStore`])
    #[snafu(display("Object store operation {operation} on '{bucket}/{key}' failed: {message}"))]
    ObjectStore {
        operation: &'static str,
        bucket: String,
        key: String,
        message: String,
    },

    #[snafu(display("Error creating a temporary file in '{}'", dir.display()))]
    CreateTempFile {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Error reading local file '{}'", path.display()))]
    ReadLocalFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Error writing local file '{}'", path.display()))]
    WriteLocalFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Error appending '{}' to '{}'", path.display(), output.display()))]
    AppendFile {
        path: PathBuf,
        output: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display(
        "Size mismatch while {operation}: expected {expected} bytes but got {actual} bytes"
    ))]
    SizeMismatch {
        operation: &'static str,
        expected: u64,
        actual: u64,
    },

    #[snafu(display(
        "BUG: multi-part upload has a gap in its part numbers; expected part {expected} but found {actual}"
    ))]
    PartNumberGap { expected: i32, actual: i32 },

    #[snafu(display("BUG: attempt to complete a multi-part upload with no parts"))]
    EmptyPartList,

    #[snafu(display("BUG: multi-part upload '{upload_id}' is already {state}"))]
    SessionClosed {
        upload_id: String,
        state: &'static str,
    },

    #[snafu(display(
        "Concatenation would need more than {max_parts} parts; use a larger minimum part size or fewer sources"
    ))]
    TooManyParts { max_parts: i32 },

    #[snafu(display("A part upload task panicked or was cancelled"))]
    PartUploadTask { source: tokio::task::JoinError },

    #[snafu(display("The operation was aborted"))]
    Aborted,
}

impl S3CatError {
    /// Classify this error so callers can decide how to react to it
    pub fn kind(&self) -> ErrorKind {
        use S3CatError::*;

        match self {
            UnsupportedObjectStorage { .. }
            | MissingBucket { .. }
            | MissingKey { .. }
            | InvalidUrl { .. }
            | NonUtf8Key { .. }
            | NonUtf8Path { .. }
            | TooManyParts { .. } => ErrorKind::InvalidInput,

            ObjectNotFound { .. } | SourceFileNotFound { .. } => ErrorKind::SourceNotFound,

            HeadObject { .. }
            | GetObject { .. }
            | ReadByteStream { .. }
            | PutObject { .. }
            | DeleteObject { .. }
            | CopyObject { .. }
            | ListObjectsInPrefix { .. }
            | CreateMultipartUpload { .. }
            | UploadPart { .. }
            | UploadPartCopy { .. }
            | CompleteMultipartUpload { .. }
            | AbortMultipartUpload { .. }
            | IncompleteResponse { .. }
            | ObjectStore { .. } => ErrorKind::StoreCommunication,

            SizeMismatch { .. } => ErrorKind::SizeMismatch,

            PartNumberGap { .. }
            | EmptyPartList
            | SessionClosed { .. }
            | PartUploadTask { .. } => ErrorKind::InvariantViolation,

            Aborted => ErrorKind::Aborted,

            OpenPartBody { .. }
            | CreateTempFile { .. }
            | ReadLocalFile { .. }
            | WriteLocalFile { .. }
            | AppendFile { .. } => ErrorKind::LocalIo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_violations_are_classified() {
        assert_eq!(
            ErrorKind::InvariantViolation,
            S3CatError::PartNumberGap {
                expected: 2,
                actual: 3
            }
            .kind()
        );
        assert_eq!(ErrorKind::InvariantViolation, S3CatError::EmptyPartList.kind());
    }

    #[test]
    fn missing_objects_are_source_errors() {
        let err = ObjectNotFoundSnafu {
            bucket: "foo",
            key: "bar",
        }
        .build();

        assert_eq!(ErrorKind::SourceNotFound, err.kind());
        assert_eq!(
            "The object 'bar' doesn't exist in S3 bucket 'foo'",
            err.to_string()
        );
    }
}
