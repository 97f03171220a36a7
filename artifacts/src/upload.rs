//! The upload operation: expand the configured paths into artifacts and push them through a pool
//! of upload workers.
//!
//! The caller constructs an [`Uploader`] from a [`Config`], then calls [`Uploader::run`] to
//! actually perform the upload.  Progress is reported via a caller-provided implementation of the
//! [`UploadProgressCallback`] trait.
//!
//! Internally a blocking feeder task walks the local paths and queues artifacts on a bounded
//! channel, which `concurrency` async worker tasks share.  Each worker transfers the artifacts it
//! takes (with retries) and sends them on to a results channel that this module drains.  A
//! failure to upload one artifact never stops the others; failures are collected and returned in
//! the [`UploadSummary`].
use crate::config::DEFAULT_CACHE_CONTROL;
use crate::error::{AbortedSnafu, AllWorkersFailedSnafu, FeederTaskSnafu, WorkerTaskSnafu};
use crate::path::{PathSet, PathSpec};
use crate::provider::{self, Provider, ProviderKind, RetryPolicy};
use crate::{Artifact, Config, FeedSummary, Feeder, Result, SizeGuard, UploadError};
use snafu::prelude::*;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// A trait which callers can implement to get progress updates as the upload is progressing.
#[allow(unused_variables)]
pub trait UploadProgressCallback: Sync + Send {
    /// An artifact has been found and queued for upload.
    ///
    /// Artifacts are queued while others are being uploaded, so the total amount of work isn't
    /// known until [`Self::feed_finished`] is called.
    fn artifact_queued(&self, key: &str, size: u64) {}

    /// Every artifact has been queued.
    ///
    /// Not called if queueing stopped early, for example because the maximum upload size was
    /// exceeded.
    fn feed_finished(&self, total_artifacts: usize, total_bytes: u64) {}

    /// An attempt to upload an artifact failed, and it will be tried again shortly
    fn artifact_retrying(&self, key: &str, retry: u64, err: &UploadError) {}

    /// The artifact has been uploaded in its entirety
    fn artifact_uploaded(&self, key: &str, size: u64) {}

    /// The artifact could not be uploaded, and all retries have been used up
    fn artifact_failed(&self, key: &str, size: u64, err: &UploadError) {}

    /// All of the workers are done.
    fn upload_finished(
        &self,
        uploaded_artifacts: usize,
        uploaded_bytes: u64,
        failed_artifacts: usize,
        duration: Duration,
    ) {
    }
}

/// The outcome of an upload run
#[derive(Debug, Default)]
pub struct UploadSummary {
    /// Every artifact that was processed by a worker, with its upload result
    artifacts: Vec<Artifact>,

    /// What the feeder queued.  If the feeder stopped early, this is zero.
    pub queued: FeedSummary,

    /// Why the feeder stopped early, if it did.
    ///
    /// Usually this is [`UploadError::SizeExceeded`].  Artifacts queued before the error are
    /// still uploaded.
    pub feed_error: Option<UploadError>,

    /// Bytes counted against [`Config::max_size`], including the artifact that went over the
    /// limit if one did
    pub fed_bytes: u64,

    pub duration: Duration,
}

impl UploadSummary {
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn uploaded(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|artifact| artifact.upload_result().ok())
            .count()
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.artifacts
            .iter()
            .filter(|artifact| artifact.upload_result().ok())
            .map(Artifact::size)
            .sum()
    }

    /// The artifacts that failed to upload
    pub fn failures(&self) -> Vec<&Artifact> {
        self.artifacts
            .iter()
            .filter(|artifact| !artifact.upload_result().ok())
            .collect()
    }

    /// `true` if every queued artifact was uploaded and the feeder didn't stop early
    pub fn is_success(&self) -> bool {
        self.feed_error.is_none() && self.failures().is_empty()
    }
}

/// An upload job, ready to run.
#[derive(Debug)]
pub struct Uploader {
    config: Config,
    paths: PathSet,
    provider: Arc<dyn Provider>,
}

impl Uploader {
    /// Prepare an upload with the provider selected in `config`.
    ///
    /// An empty cache control is replaced with the default, and an unrecognized provider name is
    /// replaced with `s3`.  The configuration isn't validated until [`Self::run`].
    pub fn new(mut config: Config) -> Self {
        if config.cache_control.as_deref().map_or(true, str::is_empty) {
            config.cache_control = Some(DEFAULT_CACHE_CONTROL.to_string());
        }

        config.provider = ProviderKind::from_name(&config.provider).to_string();

        let paths = config
            .paths
            .iter()
            .map(|entry| PathSpec::parse(&config.working_dir, entry))
            .collect::<PathSet>();

        let provider = provider::make_provider(&config);

        Self {
            config,
            paths,
            provider,
        }
    }

    /// Upload with `provider` instead of the one selected by the configuration.
    ///
    /// The configuration is still validated against the configured provider name.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &PathSet {
        &self.paths
    }

    /// Alternative to [`Self::run`] which doesn't require a [`UploadProgressCallback`]
    /// implementation, for callers that do not care about progress information.
    pub async fn run_without_progress(
        self,
        abort: impl Future<Output = ()>,
    ) -> Result<UploadSummary> {
        struct NoProgress {}
        impl UploadProgressCallback for NoProgress {}

        self.run(abort, NoProgress {}).await
    }

    /// Run the upload, returning only when every queued artifact has been processed (or the
    /// upload failed to start).
    ///
    /// Artifacts that fail to upload don't make this fail; they're reported in the returned
    /// summary.  This fails if the configuration is invalid, if none of the workers could set up
    /// their provider, or if a worker task panics.
    ///
    /// If the `abort` future is completed, it's a signal that the upload should be aborted.
    /// In-progress transfers are abandoned and queued artifacts are dropped, then this method
    /// returns an abort error.
    #[instrument(skip_all, fields(provider = self.provider.name(), concurrency = self.config.concurrency))]
    pub async fn run<Abort, Progress>(
        self,
        abort: Abort,
        progress: Progress,
    ) -> Result<UploadSummary>
    where
        Abort: Future<Output = ()>,
        Progress: UploadProgressCallback + 'static,
    {
        self.config.validate()?;

        let started = Instant::now();
        let concurrency = self.config.concurrency;
        let progress: Arc<dyn UploadProgressCallback> = Arc::new(progress);

        info!(
            paths = self.paths.len(),
            target_paths = ?self.config.target_paths,
            max_size = %self.config.max_size.get_appropriate_unit(false),
            "Starting upload"
        );

        let size_guard = Arc::new(SizeGuard::new(self.config.max_size_bytes()));
        let (artifact_sender, artifact_receiver) = mpsc::channel(concurrency);
        let (result_sender, mut result_receiver) = mpsc::channel(concurrency);

        let feeder = Feeder::new(
            &self.paths,
            self.config.target_paths.clone(),
            self.config.permission,
            size_guard.clone(),
        )
        .spawn(artifact_sender, progress.clone());

        // The workers hold the only references to the queue receiver, so if they all stop the
        // feeder's next send fails instead of blocking forever
        let artifact_receiver = Arc::new(Mutex::new(artifact_receiver));
        let policy = RetryPolicy::from_config(&self.config);
        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            workers.spawn(provider::run_worker(
                worker_id,
                self.provider.clone(),
                policy,
                artifact_receiver.clone(),
                result_sender.clone(),
                progress.clone(),
            ));
        }
        drop(artifact_receiver);
        drop(result_sender);

        let mut summary = UploadSummary::default();
        let mut worker_errors = Vec::new();
        let mut results_open = true;

        tokio::pin!(abort);

        while results_open || !workers.is_empty() {
            tokio::select! {
                artifact = result_receiver.recv(), if results_open => match artifact {
                    Some(artifact) => summary.artifacts.push(artifact),
                    None => results_open = false,
                },
                joined = workers.join_next(), if !workers.is_empty() => match joined {
                    Some(Ok(Ok(processed))) => debug!(processed, "Upload worker completed"),
                    Some(Ok(Err(e))) => worker_errors.push(e),
                    Some(Err(e)) => {
                        error!(err = ?e, "Upload worker task panicked; aborting upload");
                        workers.abort_all();

                        return Err(e).context(WorkerTaskSnafu);
                    }
                    None => {}
                },
                _ = &mut abort => {
                    warn!("Upload aborted");
                    workers.abort_all();

                    return AbortedSnafu.fail();
                }
            }
        }

        // Every worker is gone by now, so the feeder can't be blocked on a send
        let feed_result = feeder.await.context(FeederTaskSnafu)?;

        if !worker_errors.is_empty() {
            if worker_errors.len() == concurrency {
                let count = worker_errors.len();
                return Err(worker_errors.swap_remove(0)).context(AllWorkersFailedSnafu { count });
            }

            warn!(
                failed_workers = worker_errors.len(),
                concurrency, "Some upload workers failed to start"
            );
        }

        match feed_result {
            Ok(queued) => summary.queued = queued,
            Err(e) => summary.feed_error = Some(e),
        }

        summary.fed_bytes = size_guard.total();
        summary.duration = started.elapsed();

        let failures = summary.failures();
        for artifact in &failures {
            error!(
                source = %artifact.source.display(),
                key = %artifact.full_destination_key(),
                err = ?artifact.upload_result().err(),
                "Artifact upload failed"
            );
        }
        let failed = failures.len();

        let uploaded = summary.uploaded();
        let uploaded_bytes = summary.uploaded_bytes();
        progress.upload_finished(uploaded, uploaded_bytes, failed, summary.duration);

        let uploaded_size = byte_unit::Byte::from_bytes(uploaded_bytes as u128);
        let fed_size = byte_unit::Byte::from_bytes(summary.fed_bytes as u128);
        info!(
            uploaded,
            uploaded_bytes = %uploaded_size.get_appropriate_unit(false),
            fed_size = %fed_size.get_appropriate_unit(false),
            failed,
            duration = ?summary.duration,
            "Upload finished"
        );

        Ok(summary)
    }
}

/// Upload everything `config` describes, with the provider it selects.
///
/// Shorthand for [`Uploader::new`] followed by [`Uploader::run_without_progress`] with an abort
/// future that never completes.
pub async fn upload(config: Config) -> Result<UploadSummary> {
    Uploader::new(config)
        .run_without_progress(futures::future::pending())
        .await
}
