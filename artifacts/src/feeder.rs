//! Expansion of [`PathSpec`]s into individual [`Artifact`]s.
//!
//! Walking the filesystem is blocking, so the feeder runs on a blocking thread and hands artifacts
//! to the async upload workers over a bounded channel.  When all of the workers are busy the
//! channel fills up and the feeder blocks until one of them takes more work.
use crate::config::Permission;
use crate::path::{PathSet, PathSpec};
use crate::{Artifact, Result, SizeGuard, UploadProgressCallback};
use byte_unit::Byte;
use std::path::{Component, Path};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info_span, warn};

/// Totals for the artifacts queued by a [`Feeder`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub artifacts: usize,
    pub bytes: u64,
}

/// Produces one [`Artifact`] per file per target path.
#[derive(Debug)]
pub struct Feeder {
    paths: Vec<PathSpec>,
    target_paths: Vec<String>,
    permission: Permission,
    size_guard: Arc<SizeGuard>,
}

impl Feeder {
    pub fn new(
        paths: &PathSet,
        target_paths: Vec<String>,
        permission: Permission,
        size_guard: Arc<SizeGuard>,
    ) -> Self {
        Self {
            paths: paths.all(),
            target_paths,
            permission,
            size_guard,
        }
    }

    /// Start [`Self::feed`] on a blocking thread
    pub(crate) fn spawn(
        self,
        sender: mpsc::Sender<Artifact>,
        progress: Arc<dyn UploadProgressCallback>,
    ) -> tokio::task::JoinHandle<Result<FeedSummary>> {
        let span = info_span!("feed_artifacts_blocking");

        tokio::task::spawn_blocking(move || {
            let _guard = span.enter();

            debug!("Starting blocking artifact feeder task");

            match self.feed(sender, progress) {
                Ok(summary) => {
                    debug!(
                        artifacts = summary.artifacts,
                        bytes = %Byte::from_bytes(summary.bytes as u128).get_appropriate_unit(false),
                        "Artifact feeder completed successfully"
                    );

                    Ok(summary)
                }
                Err(e) => {
                    error!(err = ?e, "Artifact feeder failed");

                    Err(e)
                }
            }
        })
    }

    /// Walk every path and send the resulting artifacts to `sender`.
    ///
    /// This blocks the calling thread, both for filesystem access and while waiting for space in
    /// the channel.  It stops at the first artifact that pushes the combined size past the
    /// maximum, or as soon as the receiving side of the channel is gone.  Paths that don't exist
    /// are skipped with a warning.
    ///
    /// The channel is closed when this returns, because `sender` is dropped.
    pub fn feed(
        self,
        sender: mpsc::Sender<Artifact>,
        progress: Arc<dyn UploadProgressCallback>,
    ) -> Result<FeedSummary> {
        let mut summary = FeedSummary::default();

        for spec in &self.paths {
            let full_path = spec.full_path();

            if !full_path.exists() {
                warn!(path = %full_path.display(), "Path does not exist; skipping");
                continue;
            }

            let is_dir = full_path.is_dir();
            let root = if is_dir {
                full_path.clone()
            } else {
                spec.root.clone()
            };

            for entry in walkdir::WalkDir::new(&full_path).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(path = %full_path.display(), err = %e, "Error walking path; skipping entry");
                        continue;
                    }
                };

                if entry.file_type().is_dir() {
                    continue;
                }

                let destination = destination(&spec.to, is_dir, &root, entry.path());

                for target_path in &self.target_paths {
                    let artifact =
                        Artifact::new(entry.path(), &destination, target_path, self.permission);

                    self.queue(artifact, &sender, progress.as_ref(), &mut summary)?;
                }
            }
        }

        progress.feed_finished(summary.artifacts, summary.bytes);

        Ok(summary)
    }

    fn queue(
        &self,
        artifact: Artifact,
        sender: &mpsc::Sender<Artifact>,
        progress: &dyn UploadProgressCallback,
        summary: &mut FeedSummary,
    ) -> Result<()> {
        let size = artifact.size();
        let (current, exceeded) = self.size_guard.add_and_check(size);

        if exceeded {
            let max = self.size_guard.max();

            error!(
                current_size = %Byte::from_bytes(current as u128).get_appropriate_unit(false),
                max_size = %Byte::from_bytes(max as u128).get_appropriate_unit(false),
                percent_max_size = current as f64 / max.max(1) as f64 * 100.0,
                "Max combined upload size exceeded; no more artifacts will be queued"
            );

            return crate::error::SizeExceededSnafu { current, max }.fail();
        }

        // Reads the start of the file, so do it here instead of in an async worker
        let content_type = artifact.content_type().to_string();
        let key = artifact.full_destination_key();

        debug!(
            source = %artifact.source.display(),
            %key,
            %content_type,
            size,
            current_size = current,
            "Queueing artifact"
        );

        progress.artifact_queued(&key, size);

        if sender.blocking_send(artifact).is_err() {
            // Every upload worker has dropped its end of the queue
            debug!("Artifact receiver dropped; stopping feeder");
            return crate::error::ArtifactQueueClosedSnafu.fail();
        }

        summary.artifacts += 1;
        summary.bytes += size;

        Ok(())
    }
}

/// The remote path for `source`, found while walking a path spec rooted at `root`.
///
/// A non-empty `to` replaces the spec's own path: for a directory it becomes the prefix of every
/// file under it, for a single file it becomes the file's destination.
fn destination(to: &str, is_dir: bool, root: &Path, source: &Path) -> String {
    let relative = to_slash(source.strip_prefix(root).unwrap_or(source));

    match (to.is_empty(), is_dir) {
        (true, _) => relative,
        (false, true) => format!("{}/{}", to.trim_end_matches('/'), relative),
        (false, false) => to.to_string(),
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
