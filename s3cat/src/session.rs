use crate::objstore::{ObjectStore, UploadedPart};
use crate::{ObjectLocation, Result};
use snafu::prelude::*;
use tracing::{debug, error, instrument, warn};

/// S3 won't accept a multi-part upload with more parts than this
pub(crate) const MAX_PARTS: i32 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Uploading,
    Committed,
    Aborted,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

/// One multi-part upload to a target object, from creation until it's either completed or
/// aborted.
///
/// If a session is dropped while still uploading, an abort is spawned on the current tokio
/// runtime so the parts uploaded so far don't linger in the bucket.
#[derive(Debug)]
pub(crate) struct MultipartSession {
    store: Box<dyn ObjectStore>,
    target: ObjectLocation,
    upload_id: String,
    state: SessionState,
    parts: Vec<UploadedPart>,
}

impl MultipartSession {
    #[instrument(skip(store, target), fields(%target))]
    pub async fn create(store: Box<dyn ObjectStore>, target: ObjectLocation) -> Result<Self> {
        let upload_id = store.create_multipart_upload(&target).await?;

        debug!(%upload_id, "Started multi-part upload");

        Ok(Self {
            store,
            target,
            upload_id,
            state: SessionState::Uploading,
            parts: Vec::new(),
        })
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn target(&self) -> &ObjectLocation {
        &self.target
    }

    /// Record a part which has been uploaded.  Parts may be recorded in any order.
    pub fn record(&mut self, part: UploadedPart) -> Result<()> {
        self.ensure_uploading()?;
        self.parts.push(part);

        Ok(())
    }

    /// Complete the upload, making the target object visible.
    ///
    /// The recorded parts must be numbered 1 through N with no gaps or duplicates.  If this fails
    /// the session is still open and should be aborted.
    #[instrument(skip(self), fields(target = %self.target, upload_id = %self.upload_id))]
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_uploading()?;
        ensure!(!self.parts.is_empty(), crate::error::EmptyPartListSnafu);

        self.parts.sort_by_key(|part| part.part_number);
        for (index, part) in self.parts.iter().enumerate() {
            let expected = index as i32 + 1;
            ensure!(
                part.part_number == expected,
                crate::error::PartNumberGapSnafu {
                    expected,
                    actual: part.part_number
                }
            );
        }

        self.store
            .complete_multipart_upload(&self.target, &self.upload_id, &self.parts)
            .await?;
        self.state = SessionState::Committed;

        debug!(parts = self.parts.len(), "Completed multi-part upload");

        Ok(())
    }

    /// Abort the upload, discarding the parts uploaded so far.
    ///
    /// The session is closed even if the abort request fails, since there's nothing more to be
    /// done with it either way.
    #[instrument(skip(self), fields(target = %self.target, upload_id = %self.upload_id))]
    pub async fn abort(&mut self) -> Result<()> {
        self.ensure_uploading()?;
        self.state = SessionState::Aborted;

        self.store
            .abort_multipart_upload(&self.target, &self.upload_id)
            .await?;

        debug!("Aborted multi-part upload");

        Ok(())
    }

    fn ensure_uploading(&self) -> Result<()> {
        ensure!(
            self.state == SessionState::Uploading,
            crate::error::SessionClosedSnafu {
                upload_id: &self.upload_id,
                state: self.state.name(),
            }
        );

        Ok(())
    }
}

impl Drop for MultipartSession {
    fn drop(&mut self) {
        if self.state != SessionState::Uploading {
            return;
        }

        let store = self.store.clone();
        let target = self.target.clone();
        let upload_id = std::mem::take(&mut self.upload_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(%target, %upload_id, "Multi-part upload dropped while still open; aborting it");

                handle.spawn(async move {
                    if let Err(e) = store.abort_multipart_upload(&target, &upload_id).await {
                        error!(%target, %upload_id, err = ?e, "Failed to abort abandoned multi-part upload");
                    }
                });
            }
            Err(_) => {
                error!(%target, %upload_id, "Multi-part upload dropped outside of a tokio runtime; it can't be aborted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, MemoryStore, StoreOperation};
    use assert_matches::assert_matches;

    fn part(part_number: i32, e_tag: String, size: u64) -> UploadedPart {
        UploadedPart {
            part_number,
            e_tag,
            size,
        }
    }

    async fn session(store: &MemoryStore) -> MultipartSession {
        MultipartSession::create(
            Box::new(store.clone()),
            ObjectLocation::new("bucket", "target"),
        )
        .await
        .unwrap()
    }

    async fn upload_copy(store: &MemoryStore, session: &MultipartSession, part_number: i32) -> String {
        store
            .upload_part_copy(
                session.target(),
                session.upload_id(),
                part_number,
                &ObjectLocation::new("bucket", "source"),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn commits_parts_recorded_out_of_order() {
        let store = MemoryStore::with_min_part_size(1);
        store.insert_object("bucket", "source", &b"abc"[..]);
        let mut session = session(&store).await;

        let second = upload_copy(&store, &session, 2).await;
        let first = upload_copy(&store, &session, 1).await;
        session.record(part(2, second, 3)).unwrap();
        session.record(part(1, first, 3)).unwrap();
        session.commit().await.unwrap();

        assert_eq!(
            &b"abcabc"[..],
            &store.object("bucket", "target").unwrap()[..]
        );

        // Nothing more can happen once committed
        assert_matches!(
            session.record(part(3, "x".to_string(), 1)),
            Err(crate::S3CatError::SessionClosed { .. })
        );
        assert_matches!(
            session.abort().await,
            Err(crate::S3CatError::SessionClosed { .. })
        );
    }

    #[tokio::test]
    async fn refuses_gaps_and_empty_uploads() {
        let store = MemoryStore::new();

        let mut empty = session(&store).await;
        assert_matches!(empty.commit().await, Err(crate::S3CatError::EmptyPartList));
        empty.abort().await.unwrap();

        let mut gappy = session(&store).await;
        gappy.record(part(1, "a".to_string(), 1)).unwrap();
        gappy.record(part(3, "c".to_string(), 1)).unwrap();
        let err = gappy.commit().await.unwrap_err();
        assert_eq!(ErrorKind::InvariantViolation, err.kind());
        assert_matches!(
            err,
            crate::S3CatError::PartNumberGap {
                expected: 2,
                actual: 3
            }
        );
        gappy.abort().await.unwrap();

        assert!(!store.calls().contains(&StoreOperation::CompleteMultipartUpload));
        assert_eq!(0, store.pending_uploads());
    }

    #[tokio::test]
    async fn abort_closes_session_even_if_request_fails() {
        let store = MemoryStore::new();
        store.fail_on(StoreOperation::AbortMultipartUpload, None);
        let mut session = session(&store).await;

        assert!(session.abort().await.is_err());
        assert_matches!(
            session.abort().await,
            Err(crate::S3CatError::SessionClosed { .. })
        );
    }

    #[tokio::test]
    async fn dropping_open_session_aborts_it() {
        let store = MemoryStore::new();
        let session = session(&store).await;
        let upload_id = session.upload_id().to_string();
        assert_eq!(1, store.pending_uploads());

        drop(session);

        // The abort runs in a spawned task; give it a chance to run
        for _ in 0..100 {
            if store.pending_uploads() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(0, store.pending_uploads());
        assert_eq!(vec![upload_id], store.aborted_uploads());
    }
}
