//! Shared setup for the concatenation tests: an in-memory store, scratch and input directories,
//! and helpers to place generated test data as remote or local sources.
use crate::Result;
use s3cat::{Config, MemoryStore, ObjectLocation, SourceItem};
use s3cat_testing::test_data::TestSourceWithData;
use std::path::PathBuf;
use tempfile::TempDir;

pub(crate) const BUCKET: &str = "test-bucket";
pub(crate) const MIB: u64 = 1024 * 1024;

/// Where a test source lives
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    Remote,
    Local,
}

pub(crate) struct Fixture {
    pub store: MemoryStore,
    pub config: Config,
    scratch: TempDir,
    inputs: TempDir,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        let scratch = tempfile::tempdir()?;
        let inputs = tempfile::tempdir()?;

        Ok(Self {
            store: MemoryStore::new(),
            config: Config {
                temp_dir: Some(scratch.path().to_owned()),
                ..Default::default()
            },
            scratch,
            inputs,
        })
    }

    pub fn target() -> ObjectLocation {
        ObjectLocation::new(BUCKET, "concatenated")
    }

    /// Put each source where `placements` says, cycling through `placements` if there are more
    /// sources than placements.  Returns the source descriptors in order.
    pub async fn place(
        &self,
        sources: &[TestSourceWithData],
        placements: &[Placement],
    ) -> Result<Vec<SourceItem>> {
        let mut items = Vec::with_capacity(sources.len());

        for (source, placement) in sources.iter().zip(placements.iter().cycle()) {
            let item = match placement {
                Placement::Remote => {
                    self.store
                        .insert_object(BUCKET, &source.name, source.data.clone());
                    SourceItem::remote(BUCKET, &source.name, source.data.len() as u64)
                }
                Placement::Local => {
                    let path = self.local_path(&source.name);
                    tokio::fs::write(&path, &source.data).await?;
                    SourceItem::from_local_file(&path).await?
                }
            };

            items.push(item);
        }

        Ok(items)
    }

    pub async fn concatenate(&self, sources: Vec<SourceItem>) -> s3cat::Result<s3cat::ConcatSummary> {
        s3cat::concatenate(&self.store, &self.config, &Self::target(), sources).await
    }

    pub fn local_path(&self, name: &str) -> PathBuf {
        self.inputs.path().join(name)
    }

    /// The contents of the target object, if it exists
    pub fn target_data(&self) -> Option<Vec<u8>> {
        let target = Self::target();

        self.store
            .object(&target.bucket, &target.key)
            .map(|data| data.to_vec())
    }

    /// How many files are in the scratch directory.  Should be zero whenever no concatenation is
    /// running.
    pub fn scratch_files(&self) -> Result<usize> {
        Ok(std::fs::read_dir(self.scratch.path())?.count())
    }
}
