//! Upload backends, and the worker loop that drives them.
//!
//! Each backend implements [`Provider`], which knows how to transfer one artifact in one attempt.
//! Everything else (pulling artifacts off the shared queue, retrying failed attempts, timing out
//! hung attempts, reporting results) is handled the same way for every backend by
//! [`run_worker`].
use crate::{Artifact, Config, Result, UploadProgressCallback};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, instrument, warn};

mod null;
mod s3;
mod save_service;

pub use null::NullProvider;
pub use s3::S3Provider;
pub use save_service::SaveServiceProvider;

/// A destination that artifacts can be uploaded to.
///
/// Implementations are shared between all of the upload workers in a run, so any state they
/// need (clients, sessions) must be safe to use concurrently.
#[async_trait::async_trait]
pub trait Provider: std::fmt::Debug + Sync + Send + 'static {
    /// Short name used in log messages
    fn name(&self) -> &'static str;

    /// Set up whatever the provider needs before its first transfer.
    ///
    /// Called once by every worker before it starts taking artifacts, so implementations that
    /// build a shared client must make sure only the first call does so.  A failure here ends
    /// the worker.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Attempt to transfer one artifact.
    ///
    /// This is a single attempt; the caller takes care of retrying.
    async fn transfer(&self, artifact: &Artifact) -> Result<()>;

    /// Whether failed transfers should be retried.
    fn retries_transfers(&self) -> bool {
        true
    }
}

/// The available [`Provider`] implementations, by their configured name
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    S3,
    Artifacts,
    Null,
}

impl ProviderKind {
    /// Look up a provider by name.  Unknown names fall back to S3 with a warning.
    pub fn from_name(name: &str) -> Self {
        name.trim().parse().unwrap_or_else(|_| {
            warn!(provider = name, "Unrecognized upload provider; falling back to s3");
            Self::S3
        })
    }
}

/// Construct the provider that `config` selects
///
/// No connections are made here; providers set themselves up in [`Provider::prepare`].
pub fn make_provider(config: &Config) -> Arc<dyn Provider> {
    let provider: Arc<dyn Provider> = match ProviderKind::from_name(&config.provider) {
        ProviderKind::S3 => Arc::new(S3Provider::new(config)),
        ProviderKind::Artifacts => Arc::new(SaveServiceProvider::new(config)),
        ProviderKind::Null => Arc::new(NullProvider::new(Vec::<String>::new())),
    };

    debug!(provider = provider.name(), "Constructed upload provider");

    provider
}

/// How failed transfers are retried
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; an artifact gets at most `max_retries + 1` attempts
    pub max_retries: u64,

    /// Fixed delay before each retry
    pub interval: Duration,

    /// Limit on the duration of each individual attempt
    pub timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.retries,
            interval: config.retry_interval,
            timeout: config.transfer_timeout,
        }
    }
}

/// Body of one upload worker.
///
/// Takes artifacts off the shared `input` queue until it's closed, transfers each one with
/// retries, records the outcome on the artifact, and passes every artifact it took on to
/// `output`.  Returns the number of artifacts processed.
///
/// If [`Provider::prepare`] fails the worker returns that error without taking any artifacts.
#[instrument(skip_all, fields(worker = worker_id, provider = provider.name()))]
pub(crate) async fn run_worker(
    worker_id: usize,
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    input: Arc<Mutex<mpsc::Receiver<Artifact>>>,
    output: mpsc::Sender<Artifact>,
    progress: Arc<dyn UploadProgressCallback>,
) -> Result<usize> {
    if let Err(e) = provider.prepare().await {
        error!(err = ?e, "Upload provider setup failed; worker stopping");
        return Err(e);
    }

    debug!("Upload worker ready");

    let mut processed = 0usize;

    loop {
        // Only one worker waits on the queue at a time; the rest wait on the lock
        let next = input.lock().await.recv().await;
        let Some(mut artifact) = next else {
            break;
        };

        let key = artifact.full_destination_key();
        let size = artifact.size();

        match transfer_with_retry(provider.as_ref(), &policy, &artifact, &key, progress.as_ref())
            .await
        {
            Ok(()) => {
                debug!(source = %artifact.source.display(), %key, "Upload succeeded");
                progress.artifact_uploaded(&key, size);
                artifact.mark_succeeded();
            }
            Err(e) => {
                debug!(source = %artifact.source.display(), %key, err = ?e, "Upload failed");
                progress.artifact_failed(&key, size, &e);
                artifact.mark_failed(e);
            }
        }

        processed += 1;

        if output.send(artifact).await.is_err() {
            debug!("Upload result receiver dropped; worker stopping");
            break;
        }
    }

    debug!(processed, "Upload worker finished");

    Ok(processed)
}

async fn transfer_with_retry(
    provider: &dyn Provider,
    policy: &RetryPolicy,
    artifact: &Artifact,
    key: &str,
    progress: &dyn UploadProgressCallback,
) -> Result<()> {
    let attempts = if provider.retries_transfers() {
        policy.max_retries.saturating_add(1)
    } else {
        1
    };

    let mut attempt = 1u64;

    loop {
        match transfer_once(provider, policy.timeout, artifact, key).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!(
                    %key,
                    retry = attempt,
                    max_retries = attempts - 1,
                    err = %e,
                    "Upload attempt failed; retrying after {:?}",
                    policy.interval
                );
                progress.artifact_retrying(key, attempt, &e);

                tokio::time::sleep(policy.interval).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn transfer_once(
    provider: &dyn Provider,
    timeout: Option<Duration>,
    artifact: &Artifact,
    key: &str,
) -> Result<()> {
    match timeout {
        None => provider.transfer(artifact).await,
        Some(timeout) => tokio::time::timeout(timeout, provider.transfer(artifact))
            .await
            .unwrap_or_else(|_| crate::error::TransferTimedOutSnafu { key, timeout }.fail()),
    }
}
