use crate::env::{self, EnvLookup};
use crate::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Cache-Control header applied to uploads when none is configured
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=315360000";

/// Region used when the configured S3 region is missing or not recognized
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Canned access control applied to each uploaded artifact.
///
/// The string forms are the ones S3 uses for canned ACLs.
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Permission {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl Permission {
    pub(crate) fn as_canned_acl(&self) -> aws_sdk_s3::types::ObjectCannedAcl {
        use aws_sdk_s3::types::ObjectCannedAcl;

        match self {
            Self::Private => ObjectCannedAcl::Private,
            Self::PublicRead => ObjectCannedAcl::PublicRead,
            Self::PublicReadWrite => ObjectCannedAcl::PublicReadWrite,
            Self::AuthenticatedRead => ObjectCannedAcl::AuthenticatedRead,
            Self::BucketOwnerRead => ObjectCannedAcl::BucketOwnerRead,
            Self::BucketOwnerFullControl => ObjectCannedAcl::BucketOwnerFullControl,
        }
    }
}

/// The configuration settings that control an upload run.
///
/// Construct it with [`Config::from_env`] to pick up the conventional `ARTIFACTS_*` and
/// `TRAVIS_*` variables, or start from [`Config::default`] and set the fields directly.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Access key for S3.  Required by the `s3` provider, along with the secret key.
    pub access_key: String,

    pub secret_key: String,

    /// The S3 bucket artifacts are uploaded into
    pub bucket_name: String,

    /// Cache-Control header set on each uploaded object.
    ///
    /// When `None`, [`DEFAULT_CACHE_CONTROL`] is used.
    pub cache_control: Option<String>,

    /// Canned ACL applied to each uploaded object
    pub permission: Permission,

    /// The AWS region of the bucket.
    ///
    /// Unknown regions are replaced by [`DEFAULT_S3_REGION`] with a warning.
    pub region: String,

    /// Use a custom S3 endpoint instead of AWS.
    ///
    /// Use this to upload to a non-Amazon S3-compatible service like minio.
    pub s3_endpoint: Option<Url>,

    /// The number of upload workers that run concurrently
    pub concurrency: usize,

    /// The maximum combined size of all artifacts in a single run.
    ///
    /// Once the queued artifacts would exceed this, no further artifacts are queued.
    pub max_size: byte_unit::Byte,

    /// Local paths to upload, each of the form `from[:to]`
    pub paths: Vec<String>,

    /// Name of the upload provider: `s3`, `artifacts` or `null`
    pub provider: String,

    /// How many times a failed upload is retried before giving up on that artifact
    pub retries: u64,

    /// How long to wait between retries of a failed upload
    pub retry_interval: Duration,

    /// Give up on a single upload attempt if it takes longer than this.
    ///
    /// A timed out attempt counts as a failure and is retried like any other.
    pub transfer_timeout: Option<Duration>,

    /// Remote prefixes to upload under.  Every artifact is uploaded once per target path.
    pub target_paths: Vec<String>,

    /// Relative `paths` are resolved against this directory
    pub working_dir: PathBuf,

    /// Base URL of the artifacts save service
    pub save_host: String,

    pub auth_token: String,

    pub repo_slug: String,
    pub build_number: String,
    pub build_id: String,
    pub job_number: String,
    pub job_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            secret_key: String::new(),
            bucket_name: String::new(),
            cache_control: None,
            permission: Permission::Private,
            region: DEFAULT_S3_REGION.to_string(),
            s3_endpoint: None,
            concurrency: 5,
            max_size: byte_unit::Byte::from_bytes(1024 * 1024 * 1000),
            paths: Vec::new(),
            provider: "s3".to_string(),
            retries: 2,
            retry_interval: Duration::from_secs(3),
            transfer_timeout: None,
            target_paths: vec![default_target_path("", "")],
            working_dir: std::env::current_dir().unwrap_or_default(),
            save_host: String::new(),
            auth_token: String::new(),
            repo_slug: String::new(),
            build_number: String::new(),
            build_id: String::new(),
            job_number: String::new(),
            job_id: String::new(),
        }
    }
}

impl Config {
    /// Build a config from environment variables, falling back to the defaults for anything
    /// that isn't set.
    ///
    /// Values that fail to parse are logged and ignored rather than treated as errors.
    pub fn from_env(env: &impl EnvLookup) -> Self {
        let defaults = Self::default();

        let build_number = env::get_or(env, "TRAVIS_BUILD_NUMBER", "");
        let job_number = env::get_or(env, "TRAVIS_JOB_NUMBER", "");

        let target_paths = env::slice(env, "ARTIFACTS_TARGET_PATHS", ':')
            .filter(|paths| !paths.is_empty())
            .unwrap_or_else(|| vec![default_target_path(&build_number, &job_number)]);

        let permission = match env::get(env, "ARTIFACTS_PERMISSIONS") {
            None => defaults.permission,
            Some(value) => value.parse::<Permission>().unwrap_or_else(|e| {
                warn!(%value, err = %e, "Ignoring invalid ARTIFACTS_PERMISSIONS");
                defaults.permission
            }),
        };

        let s3_endpoint = env::get(env, "ARTIFACTS_S3_ENDPOINT").and_then(|value| {
            value
                .parse::<Url>()
                .map_err(|e| warn!(%value, err = %e, "Ignoring invalid ARTIFACTS_S3_ENDPOINT"))
                .ok()
        });

        Self {
            access_key: env::cascade(
                env,
                &[
                    "ARTIFACTS_KEY",
                    "ARTIFACTS_AWS_ACCESS_KEY",
                    "AWS_ACCESS_KEY_ID",
                    "AWS_ACCESS_KEY",
                ],
            )
            .unwrap_or_default(),
            secret_key: env::cascade(
                env,
                &[
                    "ARTIFACTS_SECRET",
                    "ARTIFACTS_AWS_SECRET_KEY",
                    "AWS_SECRET_ACCESS_KEY",
                    "AWS_SECRET_KEY",
                ],
            )
            .unwrap_or_default(),
            bucket_name: env::cascade(env, &["ARTIFACTS_BUCKET", "ARTIFACTS_S3_BUCKET"])
                .unwrap_or_default(),
            cache_control: env::get(env, "ARTIFACTS_CACHE_CONTROL"),
            permission,
            region: env::get_or(env, "ARTIFACTS_S3_REGION", DEFAULT_S3_REGION),
            s3_endpoint,
            concurrency: env::uint(env, "ARTIFACTS_CONCURRENCY", defaults.concurrency as u64)
                as usize,
            max_size: env::size(env, "ARTIFACTS_MAX_SIZE", defaults.max_size),
            paths: env::slice(env, "ARTIFACTS_PATHS", ':').unwrap_or_default(),
            provider: env::get_or(env, "ARTIFACTS_UPLOAD_PROVIDER", &defaults.provider),
            retries: env::uint(env, "ARTIFACTS_RETRIES", defaults.retries),
            retry_interval: defaults.retry_interval,
            transfer_timeout: defaults.transfer_timeout,
            target_paths,
            working_dir: env::get(env, "TRAVIS_BUILD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.working_dir),
            save_host: env::get_or(env, "ARTIFACTS_SAVE_HOST", ""),
            auth_token: env::get_or(env, "ARTIFACTS_AUTH_TOKEN", ""),
            repo_slug: env::get_or(env, "TRAVIS_REPO_SLUG", ""),
            build_number,
            build_id: env::get_or(env, "TRAVIS_BUILD_ID", ""),
            job_number,
            job_id: env::get_or(env, "TRAVIS_JOB_ID", ""),
        }
    }

    /// Check that the settings the selected provider depends on are present.
    ///
    /// An unrecognized provider name is validated as `s3`, since that's what it falls back to.
    pub fn validate(&self) -> Result<()> {
        snafu::ensure!(self.concurrency > 0, crate::error::InvalidConcurrencySnafu);

        match crate::provider::ProviderKind::from_name(&self.provider) {
            crate::provider::ProviderKind::S3 => {
                snafu::ensure!(
                    !self.bucket_name.trim().is_empty(),
                    crate::error::MissingBucketSnafu
                );
                snafu::ensure!(
                    !self.access_key.is_empty(),
                    crate::error::MissingAccessKeySnafu
                );
                snafu::ensure!(
                    !self.secret_key.is_empty(),
                    crate::error::MissingSecretKeySnafu
                );
            }
            crate::provider::ProviderKind::Artifacts => {
                snafu::ensure!(
                    !self.save_host.trim().is_empty(),
                    crate::error::MissingSaveHostSnafu
                );
            }
            crate::provider::ProviderKind::Null => {}
        }

        Ok(())
    }

    /// The Cache-Control header value to send, with the default applied
    pub fn effective_cache_control(&self) -> &str {
        self.cache_control
            .as_deref()
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_CACHE_CONTROL)
    }

    /// The target path used when none is configured, built from this config's build and job
    /// numbers
    pub fn job_target_path(&self) -> String {
        default_target_path(&self.build_number, &self.job_number)
    }

    pub(crate) fn max_size_bytes(&self) -> u64 {
        u64::try_from(self.max_size.get_bytes()).unwrap_or(u64::MAX)
    }
}

/// `artifacts/<build number>/<job number>`, skipping whichever parts are empty
fn default_target_path(build_number: &str, job_number: &str) -> String {
    ["artifacts", build_number, job_number]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
