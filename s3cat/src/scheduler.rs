//! Deciding which sources become parts directly and which are merged locally first.
//!
//! S3 requires every part of a multi-part upload except the last to be at least the minimum part
//! size.  The scheduler walks the sources in order with a work stack: anything big enough (or the
//! very last item) is uploaded as a part, while a small item is merged with the item after it and
//! any small items following that, and the merged result goes back on the stack to be
//! reconsidered.  Uploads run concurrently with further merging; part numbers are assigned in
//! stack order before each upload starts, so the finished object preserves source order.
use crate::concat::{ConcatProgressCallback, ConcatSummary, PartSummary};
use crate::merge::LocalMerger;
use crate::objstore::ObjectStore;
use crate::part::{PartOutcome, PartUploader};
use crate::session::{MultipartSession, MAX_PARTS};
use crate::streamer::RemoteStreamer;
use crate::temp::TempBlobManager;
use crate::work::WorkItem;
use crate::{Config, ObjectLocation, Result, SourceItem};
use futures::FutureExt;
use snafu::prelude::*;
use std::future::Future;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, debug_span, error, instrument, Instrument};

type InFlight = JoinSet<Result<PartOutcome>>;

pub(crate) struct MergeScheduler<'a> {
    store: &'a dyn ObjectStore,
    config: &'a Config,
    progress: &'a dyn ConcatProgressCallback,
}

impl<'a> MergeScheduler<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        config: &'a Config,
        progress: &'a dyn ConcatProgressCallback,
    ) -> Self {
        Self {
            store,
            config,
            progress,
        }
    }

    /// Concatenate `sources`, in order, into `target`.
    ///
    /// With no sources nothing is written and the store isn't touched.  On failure the multi-part
    /// upload is aborted, no target object is created, and every temp blob is gone by the time
    /// this returns.  Completing `abort` before the last part is uploaded counts as a failure.
    #[instrument(skip(self, target, sources, abort), fields(%target, sources = sources.len()))]
    pub async fn run(
        &self,
        target: &ObjectLocation,
        sources: Vec<SourceItem>,
        abort: impl Future<Output = ()>,
    ) -> Result<ConcatSummary> {
        if sources.is_empty() {
            debug!("No sources to concatenate; nothing to do");
            return Ok(ConcatSummary::default());
        }

        let mut session =
            MultipartSession::create(dyn_clone::clone_box(self.store), target.clone()).await?;
        let temp = TempBlobManager::new(self.config);
        let mut in_flight = InFlight::new();

        let processed = tokio::select! {
            result = self.process(&mut session, &temp, &mut in_flight, sources) => result,
            _ = abort => {
                debug!("Concatenation aborted by the caller");

                crate::error::AbortedSnafu.fail()
            }
        };

        let result = match processed {
            Ok(summary) => session.commit().await.map(|()| summary),
            Err(e) => Err(e),
        };

        match result {
            Ok(summary) => {
                self.progress
                    .upload_completed(summary.parts.len(), summary.total_bytes);

                debug!(
                    parts = summary.parts.len(),
                    merges = summary.merges,
                    total_bytes = summary.total_bytes,
                    "Concatenation complete"
                );

                Ok(summary)
            }
            Err(e) => {
                error!(err = ?e, "Concatenation failed; aborting the multi-part upload");

                // Wait for in-flight uploads to be cancelled so none of them races the abort, and
                // so the temp blobs they hold are gone before we return
                in_flight.shutdown().await;

                if let Err(abort_err) = session.abort().await {
                    error!(err = ?abort_err, upload_id = session.upload_id(), "Failed to abort multi-part upload");
                }

                Err(e)
            }
        }
    }

    async fn process(
        &self,
        session: &mut MultipartSession,
        temp: &TempBlobManager,
        in_flight: &mut InFlight,
        sources: Vec<SourceItem>,
    ) -> Result<ConcatSummary> {
        let min_part_size = self.config.min_part_size_bytes();
        let max_in_flight = self.config.max_concurrent_requests.max(1);

        let uploader = PartUploader::new(
            dyn_clone::clone_box(self.store),
            session.target().clone(),
            session.upload_id(),
            self.config.size_mismatch,
            self.config.consume_local_sources,
        );
        let merger = LocalMerger::new(
            RemoteStreamer::with_temp_blobs(dyn_clone::clone_box(self.store), temp.clone()),
            temp.clone(),
            self.config.size_mismatch,
            self.config.consume_local_sources,
        );

        let mut summary = ConcatSummary::default();
        let mut next_part_number = 1;

        // Top of the stack is the first source
        let mut stack = sources
            .into_iter()
            .rev()
            .map(WorkItem::from_source)
            .collect::<Vec<_>>();

        while let Some(item) = stack.pop() {
            // Collect any uploads that have already finished so a failure stops us promptly
            while let Some(Some(joined)) = in_flight.join_next().now_or_never() {
                self.record(session, &mut summary, joined)?;
            }

            if stack.is_empty() || item.size() >= min_part_size {
                ensure!(
                    next_part_number <= MAX_PARTS,
                    crate::error::TooManyPartsSnafu {
                        max_parts: MAX_PARTS
                    }
                );
                let part_number = next_part_number;
                next_part_number += 1;

                while in_flight.len() >= max_in_flight {
                    match in_flight.join_next().await {
                        Some(joined) => self.record(session, &mut summary, joined)?,
                        None => break,
                    }
                }

                debug!(part_number, size = item.size(), "Dispatching part upload");
                self.progress
                    .part_upload_started(part_number, item.size(), item.part_kind());

                let uploader = uploader.clone();
                let span = debug_span!("part upload", part_number, size = item.size());
                in_flight.spawn(
                    async move { uploader.upload(part_number, item).await }.instrument(span),
                );
            } else {
                // A small item can't be a part by itself, so the next item is merged with it
                // whatever its size
                let mut batch = vec![item];
                batch.extend(stack.pop());
                while stack
                    .last()
                    .map_or(false, |next| next.size() < min_part_size)
                {
                    batch.extend(stack.pop());
                }

                let bytes = batch.iter().map(WorkItem::size).sum();
                self.progress.merge_started(batch.len(), bytes);

                let outcome = merger.merge(batch).await?;

                self.progress.merge_completed(outcome.item.size());
                summary.merges += 1;
                summary.degraded |= outcome.degraded;

                stack.push(outcome.item);
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            self.record(session, &mut summary, joined)?;
        }

        summary.parts.sort_by_key(|part| part.part_number);

        Ok(summary)
    }

    fn record(
        &self,
        session: &mut MultipartSession,
        summary: &mut ConcatSummary,
        joined: std::result::Result<Result<PartOutcome>, JoinError>,
    ) -> Result<()> {
        let outcome = joined.context(crate::error::PartUploadTaskSnafu)??;
        let part = outcome.part;

        self.progress.part_uploaded(part.part_number, part.size);

        summary.total_bytes += part.size;
        summary.degraded |= outcome.degraded;
        summary.parts.push(PartSummary {
            part_number: part.part_number,
            size: part.size,
            kind: outcome.kind,
        });

        session.record(part)
    }
}
