use artifacts::{env, Config, Permission, Uploader};
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::eyre;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use url::Url;

mod progress;

type Result<T> = color_eyre::Result<T>;

/// Upload CI build artifacts to S3 or the artifacts save service
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Operation to perform
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    globals: Globals,
}

/// Arguments that apply regardless of command
#[derive(Parser, Debug)]
struct Globals {
    /// Enable verbose log output
    #[clap(short = 'v', long, conflicts_with = "quiet", global = true)]
    verbose: bool,

    /// Be quiet, suppress almost all output (except errors)
    #[clap(short = 'q', long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    /// Format of log output.
    ///
    /// If not given, the `ARTIFACTS_LOG_FORMAT` environment variable is used, and failing that,
    /// `text`.
    #[clap(short = 'f', long, value_enum, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload local files and directories as build artifacts.
    ///
    /// Every setting defaults to the value of the corresponding `ARTIFACTS_*` or `TRAVIS_*`
    /// environment variable; options given on the command line take precedence.
    Upload(UploadArgs),
}

#[derive(Parser, Debug)]
struct UploadArgs {
    /// S3 access key
    #[clap(long, value_name = "KEY")]
    key: Option<String>,

    /// S3 secret key
    #[clap(long, value_name = "SECRET")]
    secret: Option<String>,

    /// S3 bucket to upload into
    #[clap(long, value_name = "BUCKET")]
    bucket: Option<String>,

    /// Cache-Control header set on uploaded artifacts
    #[clap(long, value_name = "VALUE")]
    cache_control: Option<String>,

    /// Canned ACL applied to uploaded artifacts, for example `public-read`
    #[clap(long, value_name = "PERMISSION")]
    permissions: Option<Permission>,

    /// AWS region of the S3 bucket
    #[clap(long, value_name = "REGION")]
    s3_region: Option<String>,

    /// Use a custom S3 endpoint instead of AWS.
    ///
    /// Use this to upload to a non-Amazon S3-compatible service like minio.
    #[clap(long, value_name = "URL")]
    s3_endpoint: Option<Url>,

    /// The number of uploads that run concurrently
    #[clap(long)]
    concurrency: Option<usize>,

    /// The maximum combined size of all artifacts.
    ///
    /// Can be specified as an integer, ie "1000000", or with a suffix ie "10MB".
    #[clap(long, value_name = "SIZE")]
    max_size: Option<byte_unit::Byte>,

    /// Where to upload to: `s3`, `artifacts` (the save service) or `null`
    #[clap(long, value_name = "PROVIDER")]
    upload_provider: Option<String>,

    /// How many times a failed upload is retried
    #[clap(long)]
    retries: Option<u64>,

    /// Remote prefixes to upload under, separated by `:`.  Every artifact is uploaded once per
    /// target path.
    #[clap(long, value_name = "PATHS")]
    target_paths: Option<String>,

    /// Directory that relative paths are resolved against
    #[clap(long, value_name = "DIR")]
    working_dir: Option<PathBuf>,

    /// Base URL of the artifacts save service
    #[clap(long, value_name = "URL")]
    save_host: Option<String>,

    /// Token sent to the artifacts save service
    #[clap(long, value_name = "TOKEN")]
    auth_token: Option<String>,

    #[clap(long, value_name = "OWNER/REPO")]
    repo_slug: Option<String>,

    #[clap(long)]
    build_number: Option<String>,

    #[clap(long)]
    build_id: Option<String>,

    #[clap(long)]
    job_number: Option<String>,

    #[clap(long)]
    job_id: Option<String>,

    /// Give up on a single upload attempt after this many seconds
    #[clap(long, value_name = "SECONDS")]
    transfer_timeout: Option<u64>,

    /// Local files or directories to upload, each of the form `from[:to]`.
    ///
    /// These are added to any paths in `ARTIFACTS_PATHS`.
    #[clap(value_name = "PATHS")]
    paths: Vec<String>,
}

impl UploadArgs {
    /// Apply the options that were given on top of `config`
    fn apply(self, config: &mut Config) {
        fn set<T>(field: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *field = value;
            }
        }

        // The default target path is derived from the build and job numbers, so if those are
        // overridden it has to be derived again
        let job_changed = self.build_number.is_some() || self.job_number.is_some();
        let target_paths_defaulted = config.target_paths == [config.job_target_path()];

        set(&mut config.access_key, self.key);
        set(&mut config.secret_key, self.secret);
        set(&mut config.bucket_name, self.bucket);
        set(&mut config.permission, self.permissions);
        set(&mut config.region, self.s3_region);
        set(&mut config.concurrency, self.concurrency);
        set(&mut config.max_size, self.max_size);
        set(&mut config.provider, self.upload_provider);
        set(&mut config.retries, self.retries);
        set(&mut config.working_dir, self.working_dir);
        set(&mut config.save_host, self.save_host);
        set(&mut config.auth_token, self.auth_token);
        set(&mut config.repo_slug, self.repo_slug);
        set(&mut config.build_number, self.build_number);
        set(&mut config.build_id, self.build_id);
        set(&mut config.job_number, self.job_number);
        set(&mut config.job_id, self.job_id);

        if self.cache_control.is_some() {
            config.cache_control = self.cache_control;
        }
        if self.s3_endpoint.is_some() {
            config.s3_endpoint = self.s3_endpoint;
        }
        if let Some(timeout) = self.transfer_timeout {
            config.transfer_timeout = Some(Duration::from_secs(timeout));
        }

        let target_paths = self
            .target_paths
            .map(|paths| {
                paths
                    .split(':')
                    .map(str::trim)
                    .filter(|path| !path.is_empty())
                    .map(|path| env::expand(&env::process_env, path))
                    .collect::<Vec<_>>()
            })
            .filter(|paths| !paths.is_empty());

        match target_paths {
            Some(target_paths) => config.target_paths = target_paths,
            None if job_changed && target_paths_defaulted => {
                config.target_paths = vec![config.job_target_path()];
            }
            None => {}
        }

        config.paths.extend(
            self.paths
                .iter()
                .map(|path| env::expand(&env::process_env, path)),
        );
    }
}

fn init_logging(globals: &Globals) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if globals.verbose {
        "debug"
    } else if globals.quiet {
        "error"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let format = match globals.log_format {
        Some(format) => format,
        None => match env::get(&env::process_env, "ARTIFACTS_LOG_FORMAT") {
            Some(value) => LogFormat::from_str(&value, true)
                .map_err(|e| eyre!("Invalid ARTIFACTS_LOG_FORMAT '{value}': {e}"))?,
            None => LogFormat::Text,
        },
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(globals.verbose);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| eyre!("Failed to install tracing subscriber: {e}"))?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    init_logging(&args.globals)?;

    match args.command {
        Command::Upload(upload_args) => {
            let mut config = Config::from_env(&env::process_env);
            upload_args.apply(&mut config);

            let uploader = Uploader::new(config);
            let summary = progress::run_upload(&args.globals, uploader).await?;

            if let Some(e) = &summary.feed_error {
                error!(err = %e, "Not every artifact was queued for upload");
            }

            info!(
                uploaded = summary.uploaded(),
                failed = summary.failures().len(),
                "Done"
            );
        }
    }

    Ok(())
}
