//! Implementations of progress callbacks that render progress bars
use s3cat::{PartKind, Result};
use std::{borrow::Cow, future::Future, time::Duration};
use tracing::error;

/// Display a spinner while some long-running but unmeasurable task is running, then hide the
/// spinner when it finishes
pub(crate) async fn with_spinner<S, F, T>(globals: &super::Globals, message: S, task: F) -> T
where
    S: Into<Cow<'static, str>>,
    F: Future<Output = T>,
{
    let spinner = if !hide_progress(globals) {
        indicatif::ProgressBar::new_spinner()
    } else {
        indicatif::ProgressBar::hidden()
    };

    spinner.set_style(
        indicatif::ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );

    spinner.enable_steady_tick(Duration::from_millis(120));

    spinner.set_message(message);

    let result = task.await;

    spinner.finish_and_clear();

    result
}

/// Run the specified concatenation job, with progress bars for extra pretty-ness.
///
/// Ctrl-C aborts the job, which aborts the multi-part upload so nothing is left half-written.
pub(crate) async fn run_concat_job(
    globals: &super::Globals,
    job: s3cat::ConcatenateJob,
) -> Result<s3cat::ConcatSummary> {
    let progress = ConcatProgressReport::new(hide_progress(globals), &job);

    job.run(ctrl_c(), progress).await
}

/// Completes when the user hits Ctrl-C
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(?e, "Unable to listen for Ctrl-C; the job can't be aborted");

        std::future::pending::<()>().await
    }
}

/// Progress should be hidden for either of verbose mode (because there will be a flurry of log
/// messages and the progress bar rendering will be all messed up), or quiet mode (because
/// progress bars are not quiet).
fn hide_progress(globals: &super::Globals) -> bool {
    globals.verbose || globals.quiet
}

/// Progress reporting for the concat operation, which receives progress updates from the lib
/// crate and renders progress bars accordingly
#[derive(Clone)]
struct ConcatProgressReport {
    /// Aggregate which groups all of the below progress bars together
    multi: indicatif::MultiProgress,

    /// Bytes of small sources merged locally.  Merged blobs are sometimes merged again, so this
    /// can end up counting some bytes more than once, and has no meaningful length.
    bytes_merged: indicatif::ProgressBar,

    /// Bytes in parts whose upload has finished.  Parts finish in no particular order, so this
    /// says nothing about which parts are done.
    bytes_uploaded: indicatif::ProgressBar,
}

impl ConcatProgressReport {
    fn new(hide_progress: bool, job: &s3cat::ConcatenateJob) -> Self {
        /// The template syntax for right alignment seems not to work as expected, and it does not
        /// pad the prefix string to the left with spaces.  So we have to do that ourselves
        fn pad_prefix(prefix: &'static str) -> String {
            format!("{prefix:>15}")
        }

        let multi = if !hide_progress {
            indicatif::MultiProgress::new()
        } else {
            indicatif::MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden())
        };

        let bytes_merged = multi.add(indicatif::ProgressBar::new_spinner());
        bytes_merged.set_style(
            indicatif::ProgressStyle::with_template(
                "{spinner:.green} {prefix}: {msg:<40!} {bytes} ({bytes_per_sec})",
            )
            .unwrap(),
        );
        bytes_merged.set_prefix(pad_prefix("Merged locally"));
        bytes_merged.set_message("Nothing to merge yet");

        let bytes_uploaded = multi.add(indicatif::ProgressBar::new(job.total_bytes()));
        bytes_uploaded.set_style(
            indicatif::ProgressStyle::with_template(
                "{spinner:.green} {prefix}: {msg:<40!} [{bar:20.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
            )
            .unwrap()
            .progress_chars("#>-"),
        );
        bytes_uploaded.set_prefix(pad_prefix("Uploaded"));
        bytes_uploaded.set_message(format!("{}", job.target()));

        Self {
            multi,
            bytes_merged,
            bytes_uploaded,
        }
    }
}

impl s3cat::ConcatProgressCallback for ConcatProgressReport {
    fn merge_started(&self, items: usize, bytes: u64) {
        self.bytes_merged.set_message(format!(
            "Merging {items} sources ({})",
            indicatif::BinaryBytes(bytes)
        ));
    }

    fn merge_completed(&self, size: u64) {
        self.bytes_merged.inc(size);
    }

    fn part_upload_started(&self, part_number: i32, size: u64, kind: PartKind) {
        let how = match kind {
            PartKind::RemoteCopy => "copying",
            PartKind::LocalStream => "uploading",
        };

        self.bytes_uploaded.set_message(format!(
            "Part {part_number} ({how} {})",
            indicatif::BinaryBytes(size)
        ));
    }

    fn part_uploaded(&self, _part_number: i32, size: u64) {
        self.bytes_uploaded.inc(size);
    }

    fn upload_completed(&self, total_parts: usize, total_bytes: u64) {
        let total_bytes = indicatif::BinaryBytes(total_bytes);

        self.bytes_merged.finish_with_message("Done");

        // The declared sizes the bar started with may have been off, so snap it to the actual end
        self.bytes_uploaded.set_length(self.bytes_uploaded.position());
        self.bytes_uploaded
            .finish_with_message(format!("Done ({total_bytes} in {total_parts} parts)"));

        let _ = self.multi.clear();
    }
}
