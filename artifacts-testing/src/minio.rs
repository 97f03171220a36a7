//! Wrapper around the `minio` server binary, to run throwaway S3-compatible servers for tests
//! of the S3 upload provider.
use crate::Result;
use aws_credential_types::Credentials;
use color_eyre::eyre::eyre;
use duct::Handle;
use once_cell::sync::Lazy;
use rand::prelude::*;
use regex::Regex;
use std::{
    net::{SocketAddr, TcpListener},
    path::PathBuf,
    sync::{Arc, Weak},
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::debug;

/// Access key and secret key of a freshly started minio server
pub const MINIO_CREDENTIALS: &str = "minioadmin";

/// What a test needs to know about an uploaded object
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

pub struct MinioServer {
    // Holds minio's data; deleted when the server is dropped
    #[allow(dead_code)]
    data_dir: TempDir,
    handle: Handle,
    endpoint: SocketAddr,
}

impl MinioServer {
    /// Get a server shared with any other test that is still using one, or start a new one.
    ///
    /// Starting minio takes a while, so tests should prefer this over [`Self::start`].
    pub async fn get() -> Result<Arc<Self>> {
        // Held across the `start` await, so it has to be a tokio mutex
        static SHARED: Lazy<Mutex<Weak<MinioServer>>> = Lazy::new(|| Mutex::new(Weak::new()));

        let mut shared = SHARED.lock().await;

        let server = match shared.upgrade() {
            Some(server) => server,
            None => {
                let server = Arc::new(Self::start().await?);
                *shared = Arc::downgrade(&server);

                server
            }
        };

        debug!(endpoint = %server.endpoint, "Using minio server");

        server.wait_until_ready().await?;

        Ok(server)
    }

    /// Start a new minio server listening on a random local port.
    ///
    /// The `minio` binary is found with the `MINIO_PATH` env var if it's set, otherwise on the
    /// `PATH`.
    pub async fn start() -> Result<Self> {
        let minio = Self::find_minio()?;
        let endpoint = Self::free_local_endpoint()?;
        let data_dir = Self::make_data_dir()?;

        let handle = duct::cmd!(
            minio,
            "server",
            data_dir.path(),
            "--address",
            endpoint.to_string(),
            "--quiet"
        )
        .start()?;

        let server = Self {
            data_dir,
            handle,
            endpoint,
        };

        debug!(endpoint = %server.endpoint, "Waiting for minio to start");
        server.wait_until_ready().await?;
        debug!(endpoint = %server.endpoint, "Minio started");

        Ok(server)
    }

    /// The S3 API endpoint of this server, suitable for `Config::s3_endpoint`
    pub fn endpoint_url(&self) -> url::Url {
        url::Url::parse(&format!("http://{}/", self.endpoint))
            .expect("BUG: a socket address always makes a valid URL")
    }

    /// An S3 client for inspecting this server
    pub async fn aws_client(&self) -> Result<aws_sdk_s3::Client> {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_types::region::Region::new("us-east-1"))
            .credentials_provider(Credentials::new(
                MINIO_CREDENTIALS,
                MINIO_CREDENTIALS,
                None,
                None,
                "minio",
            ))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .endpoint_url(format!("http://{}", self.endpoint))
            .force_path_style(true)
            .build();

        Ok(aws_sdk_s3::Client::from_conf(s3_config))
    }

    /// Create a bucket with a unique name derived from `name`, and return the actual name.
    ///
    /// Tests share the server, so every bucket gets a random prefix to keep them apart.
    pub async fn create_bucket(&self, name: impl AsRef<str>) -> Result<String> {
        // Letters, digits, `.` and `-`, at most 63 characters
        static INVALID_CHARS: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"[^0-9a-z\.\-]+").unwrap());

        let name = INVALID_CHARS.replace_all(&name.as_ref().to_lowercase(), "-").into_owned();
        let name = &name[..name.len().min(63 - 9)];
        let bucket = format!("{:08x}-{name}", rand::thread_rng().next_u32());

        debug!(%bucket, "Creating bucket");

        let client = self.aws_client().await?;
        client.create_bucket().bucket(&bucket).send().await?;

        // Bucket creation isn't always visible right away
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        if let Err(e) = policy
            .retry(|| client.head_bucket().bucket(&bucket).send())
            .await
        {
            return Err(eyre!(
                "Bucket {bucket} is not accessible even after it was created.  Last error was:\n{e}"
            ));
        }

        Ok(bucket)
    }

    /// All object keys in `bucket`, sorted
    pub async fn list_keys(&self, bucket: &str) -> Result<Vec<String>> {
        let client = self.aws_client().await?;
        let mut keys = Vec::new();

        let mut pages = client
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            keys.extend(
                page?
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }

        keys.sort();

        Ok(keys)
    }

    /// Read back an object along with the headers the uploader sets
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        let client = self.aws_client().await?;

        let response = client.get_object().bucket(bucket).key(key).send().await?;
        let content_type = response.content_type().map(str::to_string);
        let cache_control = response.cache_control().map(str::to_string);
        let data = response.body.collect().await?.into_bytes().to_vec();

        Ok(StoredObject {
            data,
            content_type,
            cache_control,
        })
    }

    async fn wait_until_ready(&self) -> Result<()> {
        // Slow CI machines can take several seconds to bring minio up
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        let client = self.aws_client().await?;

        policy
            .retry(|| client.list_buckets().send())
            .await
            .map_err(|e| eyre!("Minio didn't come online in time.  Last ListBuckets error:\n{e}"))?;

        Ok(())
    }

    fn find_minio() -> Result<PathBuf> {
        std::env::var_os("MINIO_PATH")
            .map(PathBuf::from)
            .or_else(|| which::which("minio").ok())
            .ok_or_else(|| {
                eyre!("Unable to find `minio`; set MINIO_PATH or put the minio executable on the PATH")
            })
    }

    fn free_local_endpoint() -> Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0")?;

        Ok(listener.local_addr()?)
    }

    /// Minio refuses to keep its data on `tmpfs` (it needs `O_DIRECT`), which rules out `/tmp` on
    /// most Linux systems, so the data lives in a temporary directory under `$HOME` instead.
    fn make_data_dir() -> Result<TempDir> {
        let home = dirs::home_dir().ok_or_else(|| eyre!("Unable to determine home directory"))?;

        Ok(tempfile::Builder::new()
            .prefix("artifacts-minio-")
            .tempdir_in(home)?)
    }
}

impl Drop for MinioServer {
    fn drop(&mut self) {
        debug!(pids = ?self.handle.pids(), "Stopping minio");

        if let Err(e) = self.handle.kill() {
            eprintln!("Error killing minio process: {e}");
        }
    }
}
