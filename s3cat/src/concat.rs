use crate::listing::{list_matching, ListFilter};
use crate::objstore::ObjectStore;
use crate::scheduler::MergeScheduler;
use crate::{Config, ObjectLocation, PartKind, Result, SourceItem};
use std::future::Future;
use tracing::{debug, instrument};
use url::Url;

/// One part of a completed concatenation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartSummary {
    pub part_number: i32,
    pub size: u64,
    pub kind: PartKind,
}

/// What a concatenation did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConcatSummary {
    /// Every part of the target object, in part number order.  Empty if there were no sources.
    pub parts: Vec<PartSummary>,

    /// The size of the target object
    pub total_bytes: u64,

    /// How many times runs of small sources were merged locally
    pub merges: usize,

    /// Set if some source's declared size didn't match its actual size, and the configured
    /// [`crate::SizeMismatchPolicy`] allowed the concatenation to go ahead anyway.  The target
    /// object contains the actual data, but the caller's idea of the sources was wrong.
    pub degraded: bool,
}

/// A trait which callers can implement to get progress updates as a concatenation proceeds.
///
/// All methods have empty default implementations.
#[allow(unused_variables)]
pub trait ConcatProgressCallback: Sync + Send {
    /// A run of `items` small sources totaling `bytes` is about to be merged locally
    fn merge_started(&self, items: usize, bytes: u64) {}

    /// A local merge finished, producing a blob of `size` bytes
    fn merge_completed(&self, size: u64) {}

    /// The upload of a part has been dispatched.  Uploads run concurrently, so parts may start
    /// and finish in any order.
    fn part_upload_started(&self, part_number: i32, size: u64, kind: PartKind) {}

    /// A part was uploaded successfully
    fn part_uploaded(&self, part_number: i32, size: u64) {}

    /// The multi-part upload was completed and the target object now exists
    fn upload_completed(&self, total_parts: usize, total_bytes: u64) {}
}

/// A [`ConcatProgressCallback`] for callers that don't care about progress
pub(crate) struct NoProgress;

impl ConcatProgressCallback for NoProgress {}

/// Concatenate `sources`, in order, into the object at `target`.
///
/// This is the whole job in one call, for callers that already have [`SourceItem`]s in hand.
/// Use [`ConcatenateJobBuilder`] to resolve sources from URLs, paths and prefixes first.
pub async fn concatenate(
    store: &dyn ObjectStore,
    config: &Config,
    target: &ObjectLocation,
    sources: Vec<SourceItem>,
) -> Result<ConcatSummary> {
    MergeScheduler::new(store, config, &NoProgress)
        .run(target, sources, std::future::pending())
        .await
}

/// Builds a [`ConcatenateJob`], resolving the sources one by one
#[derive(Debug)]
pub struct ConcatenateJobBuilder {
    config: Config,
    store: Box<dyn ObjectStore>,
    target: ObjectLocation,
    sources: Vec<SourceItem>,
}

impl ConcatenateJobBuilder {
    /// Initialize a new concatenation job builder, but don't yet start the job.
    pub fn new(config: Config, store: Box<dyn ObjectStore>, target: ObjectLocation) -> Self {
        Self {
            config,
            store,
            target,
            sources: vec![],
        }
    }

    /// Add a source to the end of the job.
    ///
    /// `spec` is either an `s3://bucket/key` URL, in which case the object storage API is queried
    /// to learn the object's size, or a path to a local file.
    pub async fn add_source(&mut self, spec: &str) -> Result<()> {
        let source = crate::resolve_source(self.store.as_ref(), spec).await?;

        debug!(?source, "Adding source to job");

        self.sources.push(source);

        Ok(())
    }

    /// Add an already-resolved source to the end of the job
    pub fn add_source_item(&mut self, source: SourceItem) {
        self.sources.push(source);
    }

    /// Add every object under the prefix `url` which passes `filter`, in key order.
    ///
    /// Returns the number of sources added, which can be zero.
    pub async fn add_prefix(&mut self, url: &Url, filter: &ListFilter) -> Result<usize> {
        let prefix = ObjectLocation::prefix_from_url(url)?;

        let objects =
            list_matching(self.store.as_ref(), &prefix.bucket, &prefix.key, filter).await?;
        let count = objects.len();

        debug!(%url, count, "Adding objects under prefix to job");

        self.sources.extend(objects.into_iter().map(SourceItem::from));

        Ok(count)
    }

    pub fn build(self) -> ConcatenateJob {
        ConcatenateJob {
            config: self.config,
            store: self.store,
            target: self.target,
            sources: self.sources,
        }
    }
}

/// A job which will concatenate its sources into a target object.
#[derive(Debug)]
pub struct ConcatenateJob {
    config: Config,
    store: Box<dyn ObjectStore>,
    target: ObjectLocation,
    sources: Vec<SourceItem>,
}

impl ConcatenateJob {
    /// The total number of bytes the sources claim to contain
    pub fn total_bytes(&self) -> u64 {
        self.sources.iter().map(|source| source.size).sum()
    }

    /// The number of sources
    pub fn total_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn target(&self) -> &ObjectLocation {
        &self.target
    }

    /// Alternative to [`Self::run`] which doesn't require a [`ConcatProgressCallback`]
    /// implementation, for callers that do not care about progress information.
    pub async fn run_without_progress(
        self,
        abort: impl Future<Output = ()>,
    ) -> Result<ConcatSummary> {
        self.run(abort, NoProgress).await
    }

    /// Run the job, returning only when the job has run to completion (or failed)
    ///
    /// If the `abort` future is completed, it's a signal that the job should be aborted.  Part
    /// uploads in progress are abandoned, the multi-part upload is aborted, and this method
    /// returns an abort error.
    #[instrument(skip_all, fields(target = %self.target, sources = self.sources.len()))]
    pub async fn run<Abort, Progress>(self, abort: Abort, progress: Progress) -> Result<ConcatSummary>
    where
        Abort: Future<Output = ()>,
        Progress: ConcatProgressCallback + 'static,
    {
        MergeScheduler::new(self.store.as_ref(), &self.config, &progress)
            .run(&self.target, self.sources, abort)
            .await
    }
}
