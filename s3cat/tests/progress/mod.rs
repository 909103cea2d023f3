//! Test helper that implements [`s3cat::ConcatProgressCallback`] which keeps a record of every
//! progress update in order so we can write tests that verify progress reporting.
use more_asserts::*;
use s3cat::{ConcatProgressCallback, PartKind};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ConcatProgressEvent {
    MergeStarted {
        items: usize,
        bytes: u64,
    },

    MergeCompleted {
        size: u64,
    },

    PartUploadStarted {
        part_number: i32,
        size: u64,
        kind: PartKind,
    },

    PartUploaded {
        part_number: i32,
        size: u64,
    },

    UploadCompleted {
        total_parts: usize,
        total_bytes: u64,
    },
}

#[derive(Clone)]
pub(crate) struct TestConcatProgressCallback {
    events: Arc<Mutex<Vec<ConcatProgressEvent>>>,
}

impl TestConcatProgressCallback {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<ConcatProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Review all updates after a job has run to successful completion, validating that the
    /// updates are all sane and consistent with each other.
    ///
    /// Returns the sizes of the uploaded parts in part number order.
    pub fn sanity_check_updates(&self) -> Vec<u64> {
        let events = self.events();

        // Every merge that starts finishes, and each merge produces exactly the bytes it was given
        let merge_events = events
            .iter()
            .filter_map(|event| match event {
                ConcatProgressEvent::MergeStarted { items, bytes } => Some((Some(*items), *bytes)),
                ConcatProgressEvent::MergeCompleted { size } => Some((None, *size)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(0, merge_events.len() % 2);
        for pair in merge_events.chunks(2) {
            let (items, bytes) = pair[0];
            let (completed, size) = pair[1];
            assert_ge!(items.unwrap(), 2, "a merge always takes at least two items");
            assert!(completed.is_none());
            assert_eq!(bytes, size);
        }

        // Parts finish in any order, but each started part finishes with the same size
        let mut started = BTreeMap::new();
        let mut uploaded = BTreeMap::new();
        for event in &events {
            match event {
                ConcatProgressEvent::PartUploadStarted {
                    part_number, size, ..
                } => {
                    assert!(started.insert(*part_number, *size).is_none());
                }
                ConcatProgressEvent::PartUploaded { part_number, size } => {
                    assert!(started.contains_key(part_number));
                    assert!(uploaded.insert(*part_number, *size).is_none());
                }
                _ => {}
            }
        }
        assert_eq!(started, uploaded);

        // Part numbers are 1..N
        let part_numbers = uploaded.keys().copied().collect::<Vec<_>>();
        assert_eq!((1..=part_numbers.len() as i32).collect::<Vec<_>>(), part_numbers);

        // Completion is reported exactly once, last, with totals matching the parts
        let part_sizes = uploaded.values().copied().collect::<Vec<_>>();
        assert_eq!(
            Some(&ConcatProgressEvent::UploadCompleted {
                total_parts: part_sizes.len(),
                total_bytes: part_sizes.iter().sum(),
            }),
            events.last()
        );
        assert_eq!(
            1,
            events
                .iter()
                .filter(|event| matches!(event, ConcatProgressEvent::UploadCompleted { .. }))
                .count()
        );

        part_sizes
    }

    fn report(&self, event: ConcatProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ConcatProgressCallback for TestConcatProgressCallback {
    fn merge_started(&self, items: usize, bytes: u64) {
        self.report(ConcatProgressEvent::MergeStarted { items, bytes });
    }

    fn merge_completed(&self, size: u64) {
        self.report(ConcatProgressEvent::MergeCompleted { size });
    }

    fn part_upload_started(&self, part_number: i32, size: u64, kind: PartKind) {
        self.report(ConcatProgressEvent::PartUploadStarted {
            part_number,
            size,
            kind,
        });
    }

    fn part_uploaded(&self, part_number: i32, size: u64) {
        self.report(ConcatProgressEvent::PartUploaded { part_number, size });
    }

    fn upload_completed(&self, total_parts: usize, total_bytes: u64) {
        self.report(ConcatProgressEvent::UploadCompleted {
            total_parts,
            total_bytes,
        });
    }
}
