//! Progress callback that renders a progress bar while artifacts upload
use artifacts::{Result, UploadError, UploadSummary, Uploader};
use std::time::Duration;

/// Run the upload, with a progress bar for extra pretty-ness.
///
/// Ctrl-C aborts the upload.
pub(crate) async fn run_upload(
    globals: &super::Globals,
    uploader: Uploader,
) -> Result<UploadSummary> {
    let progress = UploadProgressReport::new(hide_progress(globals));

    uploader.run(abort_on_ctrl_c(), progress).await
}

/// Completes when the user hits Ctrl-C.  If the signal handler can't be installed, never
/// completes.
async fn abort_on_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(err = %e, "Unable to listen for Ctrl-C; the upload can't be aborted");
        futures::future::pending::<()>().await;
    }
}

/// Progress should be hidden for either of verbose mode (because there will be a flurry of log
/// messages and the progress bar rendering will be all messed up), or quiet mode (because
/// progress bars are not quiet).
fn hide_progress(globals: &super::Globals) -> bool {
    globals.verbose || globals.quiet
}

/// Renders one bar counting the bytes of artifacts that have finished uploading, successfully or
/// not, out of the bytes queued so far.
///
/// The total isn't known up front because artifacts are queued while others upload, so the bar
/// grows as artifacts are queued.
struct UploadProgressReport {
    bar: indicatif::ProgressBar,
}

impl UploadProgressReport {
    fn new(hide_progress: bool) -> Self {
        let bar = if !hide_progress {
            indicatif::ProgressBar::new(0)
        } else {
            indicatif::ProgressBar::hidden()
        };

        bar.set_style(
            indicatif::ProgressStyle::with_template(
                "{spinner:.green} {msg:<50!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
            )
            .unwrap()
            .progress_chars("#>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("Finding artifacts...");

        Self { bar }
    }
}

impl artifacts::UploadProgressCallback for UploadProgressReport {
    fn artifact_queued(&self, _key: &str, size: u64) {
        self.bar.inc_length(size);
    }

    fn feed_finished(&self, total_artifacts: usize, total_bytes: u64) {
        self.bar.set_length(total_bytes);
        self.bar.println(format!(
            "Queued {total_artifacts} artifacts ({})",
            indicatif::BinaryBytes(total_bytes)
        ));
    }

    fn artifact_retrying(&self, key: &str, retry: u64, err: &UploadError) {
        self.bar.set_message(format!("{key} (retry {retry}: {err})"));
    }

    fn artifact_uploaded(&self, key: &str, size: u64) {
        self.bar.inc(size);
        self.bar.set_message(key.to_string());
    }

    fn artifact_failed(&self, key: &str, size: u64, err: &UploadError) {
        self.bar.inc(size);
        self.bar.println(format!("Failed to upload '{key}': {err}"));
    }

    fn upload_finished(
        &self,
        uploaded_artifacts: usize,
        uploaded_bytes: u64,
        failed_artifacts: usize,
        duration: Duration,
    ) {
        let bytes_per_second = (uploaded_bytes as f64 / duration.as_secs_f64().max(0.001)) as u64;
        let bytes_per_second = indicatif::BinaryBytes(bytes_per_second);
        let uploaded_bytes = indicatif::BinaryBytes(uploaded_bytes);
        let duration = indicatif::HumanDuration(duration);

        self.bar.finish_with_message(format!(
            "Uploaded {uploaded_artifacts} ({uploaded_bytes} in {duration}, {bytes_per_second}/s), {failed_artifacts} failed"
        ));
    }
}
