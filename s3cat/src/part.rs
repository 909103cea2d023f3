use crate::objstore::{ObjectStore, UploadedPart};
use crate::work::{Backing, PartKind, WorkItem};
use crate::{ObjectLocation, Result, SizeMismatchPolicy};
use snafu::prelude::*;
use std::path::Path;
use tracing::{debug, error, instrument, warn};

/// A part which has been uploaded, and how it got there
#[derive(Clone, Debug)]
pub(crate) struct PartOutcome {
    pub part: UploadedPart,
    pub kind: PartKind,

    /// Set if the part's size differed from what was declared and the policy let it slide
    pub degraded: bool,
}

/// Uploads work items as parts of one multi-part upload.
///
/// This is cheap to clone, so each in-flight upload gets its own copy.
#[derive(Clone, Debug)]
pub(crate) struct PartUploader {
    store: Box<dyn ObjectStore>,
    target: ObjectLocation,
    upload_id: String,
    size_mismatch: SizeMismatchPolicy,
    consume_local_sources: bool,
}

impl PartUploader {
    pub fn new(
        store: Box<dyn ObjectStore>,
        target: ObjectLocation,
        upload_id: impl Into<String>,
        size_mismatch: SizeMismatchPolicy,
        consume_local_sources: bool,
    ) -> Self {
        Self {
            store,
            target,
            upload_id: upload_id.into(),
            size_mismatch,
            consume_local_sources,
        }
    }

    /// Upload `item` as part `part_number`.
    ///
    /// Remote items are copied server-side; anything local is streamed from disk.  Temp blobs are
    /// deleted once their part is uploaded, and caller-owned files too if the config says they
    /// are ours to consume.
    #[instrument(skip(self, item), fields(target = %self.target, size = item.size()))]
    pub async fn upload(&self, part_number: i32, item: WorkItem) -> Result<PartOutcome> {
        let kind = item.part_kind();
        let declared = item.size();

        let (e_tag, size, degraded) = match item.backing {
            Backing::Remote(source) => {
                debug!(%source, "Copying remote source into part");

                let e_tag = self
                    .store
                    .upload_part_copy(&self.target, &self.upload_id, part_number, &source)
                    .await?;

                (e_tag, declared, false)
            }
            Backing::Local(path) => {
                let (e_tag, size, degraded) =
                    self.upload_file(part_number, &path, declared).await?;

                if self.consume_local_sources {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), ?e, "Unable to delete consumed local source");
                    }
                }

                (e_tag, size, degraded)
            }
            Backing::Temp(blob) => {
                let result = self.upload_file(part_number, blob.path(), declared).await?;
                blob.release();

                result
            }
        };

        debug!(size, "Uploaded part");

        Ok(PartOutcome {
            part: UploadedPart {
                part_number,
                e_tag,
                size,
            },
            kind,
            degraded,
        })
    }

    async fn upload_file(
        &self,
        part_number: i32,
        path: &Path,
        declared: u64,
    ) -> Result<(String, u64, bool)> {
        let actual = tokio::fs::metadata(path)
            .await
            .context(crate::error::SourceFileNotFoundSnafu { path })?
            .len();

        let mut degraded = false;
        if actual != declared {
            match self.size_mismatch {
                SizeMismatchPolicy::Fail => {
                    return crate::error::SizeMismatchSnafu {
                        operation: "uploading a local source",
                        expected: declared,
                        actual,
                    }
                    .fail();
                }
                SizeMismatchPolicy::Warn => {
                    error!(
                        path = %path.display(),
                        declared,
                        actual,
                        "Local source size doesn't match its declared size; uploading what's on disk"
                    );
                    degraded = true;
                }
            }
        }

        let e_tag = self
            .store
            .upload_part(&self.target, &self.upload_id, part_number, path, actual)
            .await?;

        Ok((e_tag, actual, degraded))
    }
}
