//! End-to-end tests of concatenation against the in-memory object store.
use crate::fixture::{Fixture, Placement, BUCKET, MIB};
use crate::progress::TestConcatProgressCallback;
use crate::Result;
use assert_matches::assert_matches;
use more_asserts::*;
use s3cat::{
    ConcatenateJobBuilder, ErrorKind, PartKind, SizeMismatchPolicy, SourceItem, StoreOperation,
};
use s3cat_testing::logging::test_with_logging;
use s3cat_testing::test_data::{
    expected_concatenation, make_sized_test_data, sha256, validate_concatenation,
};

/// Part sizes other than the last must all meet the minimum
fn assert_min_part_compliance(part_sizes: &[u64]) {
    if let Some((_last, rest)) = part_sizes.split_last() {
        for size in rest {
            assert_ge!(*size, 5 * MIB, "non-final part is too small: {part_sizes:?}");
        }
    }
}

#[test]
fn order_preserved_for_mixed_sources() -> Result<()> {
    test_with_logging(async move {
        let sizes = [
            "6 MiB", "1 MiB", "300 KiB", "5 MiB", "2 MiB", "7 MiB", "10 KiB", "4 MiB", "8 MiB",
            "1 KiB",
        ];
        let placements: [&[Placement]; 4] = [
            &[Placement::Remote],
            &[Placement::Local],
            &[Placement::Remote, Placement::Local],
            &[Placement::Local, Placement::Local, Placement::Remote],
        ];

        for placement in placements {
            let fixture = Fixture::new()?;
            let data = make_sized_test_data(sizes);
            let sources = fixture.place(&data, placement).await?;

            let summary = fixture.concatenate(sources).await?;

            let actual = fixture.target_data().expect("target object should exist");
            validate_concatenation(&actual, &data)?;
            assert_eq!(actual.len() as u64, summary.total_bytes);

            let part_sizes = fixture
                .store
                .completed_part_sizes(&Fixture::target())
                .unwrap();
            assert_min_part_compliance(&part_sizes);
            assert_eq!(
                part_sizes,
                summary.parts.iter().map(|part| part.size).collect::<Vec<_>>()
            );

            // Caller-owned local files are left alone, and nothing is left in scratch space
            for source in &data {
                if fixture.store.object(BUCKET, &source.name).is_none() {
                    assert!(fixture.local_path(&source.name).exists());
                }
            }
            assert_eq!(0, fixture.scratch_files()?);
        }

        Ok(())
    })
}

#[test]
fn concurrency_does_not_affect_layout() -> Result<()> {
    test_with_logging(async move {
        let data = make_sized_test_data(["5 MiB", "6 MiB", "1 MiB", "5 MiB", "7 MiB", "2 MiB"]);
        let mut layouts = Vec::new();

        for max_concurrent_requests in [1, 2, 16] {
            let mut fixture = Fixture::new()?;
            fixture.config.max_concurrent_requests = max_concurrent_requests;
            let sources = fixture.place(&data, &[Placement::Remote]).await?;

            let summary = fixture.concatenate(sources).await?;

            validate_concatenation(&fixture.target_data().unwrap(), &data)?;
            layouts.push(summary.parts);
        }

        assert_eq!(layouts[0], layouts[1]);
        assert_eq!(layouts[0], layouts[2]);

        Ok(())
    })
}

#[test]
fn large_remote_sources_never_leave_the_store() -> Result<()> {
    test_with_logging(async move {
        let fixture = Fixture::new()?;
        let data = make_sized_test_data(["5 MiB", "8 MiB", "6 MiB"]);
        let sources = fixture.place(&data, &[Placement::Remote]).await?;

        let summary = fixture.concatenate(sources).await?;

        assert!(summary
            .parts
            .iter()
            .all(|part| part.kind == PartKind::RemoteCopy));
        assert_eq!(0, summary.merges);
        assert!(!fixture.store.calls().contains(&StoreOperation::GetObject));
        assert!(!fixture.store.calls().contains(&StoreOperation::UploadPart));
        validate_concatenation(&fixture.target_data().unwrap(), &data)?;

        Ok(())
    })
}

#[test]
fn mixed_batch_becomes_single_part() -> Result<()> {
    test_with_logging(async move {
        let fixture = Fixture::new()?;
        let data = make_sized_test_data(["2 MiB", "2 MiB", "6 MiB", "1 MiB"]);
        let sources = fixture.place(&data, &[Placement::Remote]).await?;

        let summary = fixture.concatenate(sources).await?;

        assert_eq!(
            Some(vec![11 * MIB]),
            fixture.store.completed_part_sizes(&Fixture::target())
        );
        assert_eq!(1, summary.parts.len());
        assert_eq!(PartKind::LocalStream, summary.parts[0].kind);
        assert_eq!(2, summary.merges);

        let actual = fixture.target_data().unwrap();
        assert_eq!(sha256(&expected_concatenation(&data)), sha256(&actual));

        Ok(())
    })
}

#[test]
fn empty_input_is_a_no_op() -> Result<()> {
    test_with_logging(async move {
        let fixture = Fixture::new()?;

        let summary = fixture.concatenate(vec![]).await?;

        assert!(summary.parts.is_empty());
        assert_eq!(0, summary.total_bytes);
        assert_eq!(0, fixture.store.mutation_count());
        assert!(fixture.store.calls().is_empty());
        assert!(fixture.target_data().is_none());

        Ok(())
    })
}

#[test]
fn single_small_source_is_one_final_part() -> Result<()> {
    test_with_logging(async move {
        for placement in [Placement::Remote, Placement::Local] {
            let fixture = Fixture::new()?;
            let data = make_sized_test_data(["100 KiB"]);
            let sources = fixture.place(&data, &[placement]).await?;

            let summary = fixture.concatenate(sources).await?;

            assert_eq!(1, summary.parts.len());
            assert_eq!(100 * 1024, summary.parts[0].size);
            assert_eq!(0, summary.merges);
            assert_eq!(data[0].data, fixture.target_data().unwrap());
        }

        Ok(())
    })
}

/// Three parts: a remote copy, a merge of a local and a remote source, and another remote copy.
/// Part 2 is the only one streamed from local disk.
fn three_part_sizes() -> [&'static str; 4] {
    ["6 MiB", "1 MiB", "5 MiB", "7 MiB"]
}

const THREE_PART_PLACEMENT: [Placement; 4] = [
    Placement::Remote,
    Placement::Local,
    Placement::Remote,
    Placement::Remote,
];

#[test]
fn failure_mid_run_leaves_nothing_behind() -> Result<()> {
    test_with_logging(async move {
        let fixture = Fixture::new()?;
        let data = make_sized_test_data(three_part_sizes());
        let sources = fixture.place(&data, &THREE_PART_PLACEMENT).await?;
        fixture.store.fail_on(StoreOperation::UploadPart, 2);

        let err = fixture.concatenate(sources).await.unwrap_err();

        assert_eq!(ErrorKind::StoreCommunication, err.kind());
        assert!(fixture.target_data().is_none());
        assert_eq!(0, fixture.store.pending_uploads());
        assert_eq!(1, fixture.store.aborted_uploads().len());
        assert!(!fixture
            .store
            .calls()
            .contains(&StoreOperation::CompleteMultipartUpload));
        assert_eq!(0, fixture.scratch_files()?);

        // The caller's local source is still there to retry with
        assert!(fixture.local_path(&data[1].name).exists());

        Ok(())
    })
}

#[test]
fn retry_after_failure_is_idempotent() -> Result<()> {
    test_with_logging(async move {
        let fixture = Fixture::new()?;
        let data = make_sized_test_data(three_part_sizes());
        let sources = fixture.place(&data, &THREE_PART_PLACEMENT).await?;
        fixture.store.fail_on(StoreOperation::UploadPartCopy, 3);

        fixture.concatenate(sources.clone()).await.unwrap_err();
        assert!(fixture.target_data().is_none());

        let first = fixture.concatenate(sources.clone()).await?;
        let first_data = fixture.target_data().unwrap();
        validate_concatenation(&first_data, &data)?;

        let second = fixture.concatenate(sources).await?;
        assert_eq!(first, second);
        assert_eq!(first_data, fixture.target_data().unwrap());
        assert_eq!(0, fixture.scratch_files()?);

        Ok(())
    })
}

#[test]
fn missing_source_fails_the_run() -> Result<()> {
    test_with_logging(async move {
        let fixture = Fixture::new()?;
        let data = make_sized_test_data(["6 MiB", "1 MiB"]);
        let mut sources = fixture.place(&data, &[Placement::Remote]).await?;
        sources.insert(1, SourceItem::remote(BUCKET, "does-not-exist", MIB));

        let err = fixture.concatenate(sources).await.unwrap_err();

        assert_eq!(ErrorKind::SourceNotFound, err.kind());
        assert!(fixture.target_data().is_none());
        assert_eq!(0, fixture.store.pending_uploads());
        assert_eq!(0, fixture.scratch_files()?);

        Ok(())
    })
}

#[test]
fn consumed_local_sources_are_deleted() -> Result<()> {
    test_with_logging(async move {
        let mut fixture = Fixture::new()?;
        fixture.config.consume_local_sources = true;
        let data = make_sized_test_data(["6 MiB", "1 MiB", "2 MiB"]);
        let sources = fixture.place(&data, &[Placement::Local]).await?;

        fixture.concatenate(sources).await?;

        validate_concatenation(&fixture.target_data().unwrap(), &data)?;
        for source in &data {
            assert!(!fixture.local_path(&source.name).exists());
        }

        Ok(())
    })
}

#[test]
fn size_mismatch_follows_policy() -> Result<()> {
    test_with_logging(async move {
        for policy in [SizeMismatchPolicy::Fail, SizeMismatchPolicy::Warn] {
            let mut fixture = Fixture::new()?;
            fixture.config.size_mismatch = policy;
            let data = make_sized_test_data(["1 MiB", "2 MiB", "6 MiB"]);
            let mut sources = fixture.place(&data, &[Placement::Local]).await?;

            // The caller thinks the first source is smaller than it really is
            sources[0].size -= 100;

            let result = fixture.concatenate(sources).await;

            match policy {
                SizeMismatchPolicy::Fail => {
                    let err = result.unwrap_err();
                    assert_matches!(err, s3cat::S3CatError::SizeMismatch { .. });
                    assert!(fixture.target_data().is_none());
                    assert_eq!(0, fixture.store.pending_uploads());
                }
                SizeMismatchPolicy::Warn => {
                    let summary = result?;
                    assert!(summary.degraded);

                    // What was uploaded is what's on disk, not what was declared
                    validate_concatenation(&fixture.target_data().unwrap(), &data)?;
                }
            }

            assert_eq!(0, fixture.scratch_files()?);
        }

        Ok(())
    })
}

#[test]
fn job_reports_consistent_progress() -> Result<()> {
    test_with_logging(async move {
        let fixture = Fixture::new()?;
        let data = make_sized_test_data([
            "1 MiB", "1 MiB", "5 MiB", "6 MiB", "3 MiB", "2 MiB", "9 MiB", "512 KiB",
        ]);
        let sources = fixture
            .place(&data, &[Placement::Remote, Placement::Local])
            .await?;

        let mut builder = ConcatenateJobBuilder::new(
            fixture.config.clone(),
            Box::new(fixture.store.clone()),
            Fixture::target(),
        );
        for source in sources {
            builder.add_source_item(source);
        }
        let job = builder.build();
        assert_eq!(data.len(), job.total_sources());

        let progress = TestConcatProgressCallback::new();
        let summary = job
            .run(futures::future::pending(), progress.clone())
            .await?;

        let part_sizes = progress.sanity_check_updates();
        assert_min_part_compliance(&part_sizes);
        assert_eq!(
            part_sizes,
            summary.parts.iter().map(|part| part.size).collect::<Vec<_>>()
        );
        validate_concatenation(&fixture.target_data().unwrap(), &data)?;

        Ok(())
    })
}
