//! Merging runs of small sources into a single local file.
use crate::streamer::RemoteStreamer;
use crate::temp::TempBlobManager;
use crate::work::{Backing, WorkItem};
use crate::{Result, SizeMismatchPolicy};
use snafu::prelude::*;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, instrument, warn};

/// The result of merging a batch of items
#[derive(Debug)]
pub(crate) struct MergeOutcome {
    /// The merged item, backed by a temp blob
    pub item: WorkItem,

    /// Set if the merged size didn't match the declared sizes and the policy let it slide
    pub degraded: bool,
}

/// Concatenates batches of work items into temp blobs
#[derive(Clone, Debug)]
pub(crate) struct LocalMerger {
    streamer: RemoteStreamer,
    temp: TempBlobManager,
    size_mismatch: SizeMismatchPolicy,
    consume_local_sources: bool,
}

impl LocalMerger {
    pub fn new(
        streamer: RemoteStreamer,
        temp: TempBlobManager,
        size_mismatch: SizeMismatchPolicy,
        consume_local_sources: bool,
    ) -> Self {
        Self {
            streamer,
            temp,
            size_mismatch,
            consume_local_sources,
        }
    }

    /// Concatenate the items in `batch`, in order, into a new temp blob.
    ///
    /// Each item is consumed as soon as it has been copied: downloads and temp blobs from earlier
    /// merges are deleted right away, rather than when the whole batch is done.  If this fails,
    /// every temp blob it was given or created is deleted.
    #[instrument(skip_all, fields(items = batch.len()))]
    pub async fn merge(&self, batch: Vec<WorkItem>) -> Result<MergeOutcome> {
        let expected: u64 = batch.iter().map(WorkItem::size).sum();

        debug!(expected, "Merging small sources");

        let (mut output, blob) = self.temp.allocate()?;

        for item in batch {
            self.append(item, &mut output, blob.path()).await?;
        }

        output
            .flush()
            .await
            .context(crate::error::WriteLocalFileSnafu { path: blob.path() })?;
        drop(output);

        let actual = tokio::fs::metadata(blob.path())
            .await
            .context(crate::error::ReadLocalFileSnafu { path: blob.path() })?
            .len();

        let mut degraded = false;
        if actual != expected {
            match self.size_mismatch {
                SizeMismatchPolicy::Fail => {
                    return crate::error::SizeMismatchSnafu {
                        operation: "merging small sources",
                        expected,
                        actual,
                    }
                    .fail();
                }
                SizeMismatchPolicy::Warn => {
                    error!(
                        expected,
                        actual,
                        "Merged size doesn't match the sum of the source sizes; continuing with the merged data"
                    );
                    degraded = true;
                }
            }
        }

        debug!(size = actual, path = %blob.path().display(), "Merged small sources");

        Ok(MergeOutcome {
            item: WorkItem::merged(blob, actual),
            degraded,
        })
    }

    /// Append the bytes of one item to the merge output, consuming the item
    async fn append(
        &self,
        item: WorkItem,
        output: &mut tokio::fs::File,
        output_path: &Path,
    ) -> Result<u64> {
        match item.backing {
            Backing::Remote(location) => {
                let (download, _) = self
                    .streamer
                    .download_to_temp_blob(&location, None)
                    .await?;
                let bytes = append_file(download.path(), output, output_path).await?;
                download.release();

                Ok(bytes)
            }
            Backing::Local(path) => {
                let bytes = append_file(&path, output, output_path).await?;

                if self.consume_local_sources {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), ?e, "Unable to delete consumed local source");
                    }
                }

                Ok(bytes)
            }
            Backing::Temp(blob) => {
                let bytes = append_file(blob.path(), output, output_path).await?;
                blob.release();

                Ok(bytes)
            }
        }
    }
}

/// Copy the entire contents of the file at `path` to the end of `output`
async fn append_file(
    path: &Path,
    output: &mut tokio::fs::File,
    output_path: &Path,
) -> Result<u64> {
    let mut input = tokio::fs::File::open(path)
        .await
        .context(crate::error::SourceFileNotFoundSnafu { path })?;

    tokio::io::copy(&mut input, output)
        .await
        .context(crate::error::AppendFileSnafu {
            path,
            output: output_path,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, ErrorKind, MemoryStore, SourceItem};

    struct Fixture {
        store: MemoryStore,
        inputs: tempfile::TempDir,
        scratch: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MemoryStore::new(),
                inputs: tempfile::tempdir().unwrap(),
                scratch: tempfile::tempdir().unwrap(),
            }
        }

        fn merger(&self, policy: SizeMismatchPolicy, consume: bool) -> LocalMerger {
            let config = Config {
                temp_dir: Some(self.scratch.path().to_owned()),
                ..Default::default()
            };
            let temp = TempBlobManager::new(&config);
            let streamer =
                RemoteStreamer::with_temp_blobs(Box::new(self.store.clone()), temp.clone());

            LocalMerger::new(streamer, temp, policy, consume)
        }

        fn local(&self, name: &str, data: &[u8]) -> WorkItem {
            let path = self.inputs.path().join(name);
            std::fs::write(&path, data).unwrap();

            WorkItem::from_source(SourceItem::local(&path, data.len() as u64))
        }

        fn remote(&self, key: &str, data: &[u8]) -> WorkItem {
            self.store.insert_object("bucket", key, data.to_vec());

            WorkItem::from_source(SourceItem::remote("bucket", key, data.len() as u64))
        }

        fn scratch_files(&self) -> usize {
            std::fs::read_dir(self.scratch.path()).unwrap().count()
        }
    }

    #[tokio::test]
    async fn merges_mixed_batch_in_order() {
        let fixture = Fixture::new();
        let merger = fixture.merger(SizeMismatchPolicy::Fail, false);

        let batch = vec![
            fixture.local("one", b"first-"),
            fixture.remote("two", b"second-"),
            fixture.local("three", b"third"),
        ];

        let outcome = merger.merge(batch).await.unwrap();
        assert!(!outcome.degraded);
        assert_eq!(18, outcome.item.size());
        assert_eq!(
            b"first-second-third".to_vec(),
            std::fs::read(&outcome.item.source.key).unwrap()
        );

        // Only the merged blob remains in scratch space, and caller files are untouched
        assert_eq!(1, fixture.scratch_files());
        assert!(fixture.inputs.path().join("one").exists());

        drop(outcome);
        assert_eq!(0, fixture.scratch_files());
    }

    #[tokio::test]
    async fn consumes_earlier_merges_and_local_sources() {
        let fixture = Fixture::new();
        let merger = fixture.merger(SizeMismatchPolicy::Fail, true);

        let first = merger
            .merge(vec![fixture.local("a", b"aa"), fixture.local("b", b"bb")])
            .await
            .unwrap();
        let first_path = std::path::PathBuf::from(&first.item.source.key);

        let second = merger
            .merge(vec![first.item, fixture.remote("c", b"cc")])
            .await
            .unwrap();

        assert_eq!(b"aabbcc".to_vec(), std::fs::read(&second.item.source.key).unwrap());
        assert!(!first_path.exists());
        assert!(!fixture.inputs.path().join("a").exists());
        assert_eq!(1, fixture.scratch_files());
    }

    #[tokio::test]
    async fn size_mismatch_fails_or_degrades() {
        let fixture = Fixture::new();

        // Declare one more byte than the file really has
        let lying = |fixture: &Fixture| {
            let mut item = fixture.local("short", b"12345");
            item.source.size = 6;
            item
        };

        let err = fixture
            .merger(SizeMismatchPolicy::Fail, false)
            .merge(vec![lying(&fixture), fixture.local("x", b"x")])
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::SizeMismatch, err.kind());
        assert_eq!(0, fixture.scratch_files());

        let outcome = fixture
            .merger(SizeMismatchPolicy::Warn, false)
            .merge(vec![lying(&fixture), fixture.local("x", b"x")])
            .await
            .unwrap();
        assert!(outcome.degraded);
        assert_eq!(6, outcome.item.size());
    }

    #[tokio::test]
    async fn append_adds_to_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        let output_path = dir.path().join("output");
        std::fs::write(&input, vec![9u8; 300_000]).unwrap();
        std::fs::write(&output_path, b"head").unwrap();

        let mut output = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&output_path)
            .await
            .unwrap();
        let bytes = append_file(&input, &mut output, &output_path).await.unwrap();
        output.flush().await.unwrap();

        assert_eq!(300_000, bytes);
        let written = std::fs::read(&output_path).unwrap();
        assert_eq!(b"head", &written[..4]);
        assert_eq!(300_004, written.len());
        assert!(written[4..].iter().all(|byte| *byte == 9));

        let err = append_file(&dir.path().join("missing"), &mut output, &output_path)
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::SourceNotFound, err.kind());
    }

    #[tokio::test]
    async fn missing_remote_source_cleans_up() {
        let fixture = Fixture::new();
        let merger = fixture.merger(SizeMismatchPolicy::Fail, false);

        let missing = WorkItem::from_source(SourceItem::remote("bucket", "nope", 10));
        let err = merger
            .merge(vec![fixture.local("a", b"a"), missing])
            .await
            .unwrap_err();

        assert_eq!(ErrorKind::SourceNotFound, err.kind());
        assert_eq!(0, fixture.scratch_files());
    }
}
