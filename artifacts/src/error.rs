use snafu::prelude::*;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum UploadError {
    #[snafu(display("No bucket name given"))]
    MissingBucket,

    #[snafu(display("No access key given"))]
    MissingAccessKey,

    #[snafu(display("No secret key given"))]
    MissingSecretKey,

    #[snafu(display("No save host given for the artifacts save service"))]
    MissingSaveHost,

    #[snafu(display("Concurrency must be at least 1"))]
    InvalidConcurrency,

    #[snafu(display(
        "Max combined upload size would be exceeded: {current} bytes queued, max is {max} bytes"
    ))]
    SizeExceeded { current: u64, max: u64 },

    #[snafu(display("All upload workers have stopped; no more artifacts can be queued"))]
    ArtifactQueueClosed,

    #[snafu(display("The artifact feeder task failed to run to completion"))]
    FeederTask { source: tokio::task::JoinError },

    #[snafu(display("Error opening artifact source '{}'", path.display()))]
    OpenSource {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Error streaming artifact source '{}'", path.display()))]
    ReadSourceStream {
        path: PathBuf,
        source: aws_smithy_types::byte_stream::error::Error,
    },

    #[snafu(display("Error uploading object '{key}' to S3 bucket '{bucket}'"))]
    PutObject {
        bucket: String,
        key: String,
        source: aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>,
    },

    #[snafu(display("Error constructing the HTTP client for the artifacts save service"))]
    BuildHttpClient { source: reqwest::Error },

    #[snafu(display("The artifacts save URL '{url}' is invalid"))]
    InvalidSaveUrl {
        url: String,
        source: url::ParseError,
    },

    #[snafu(display("Error putting artifact to '{url}'"))]
    SaveServiceRequest { url: String, source: reqwest::Error },

    #[snafu(display("The artifacts save service rejected '{url}' with HTTP status {status}"))]
    SaveServiceRejected { url: String, status: u16 },

    #[snafu(display("Upload of '{}' failed", path.display()))]
    NullUploadFailed { path: PathBuf },

    #[snafu(display("Upload of '{key}' did not complete within {timeout:?}"))]
    TransferTimedOut { key: String, timeout: Duration },

    #[snafu(display("An upload worker task panicked or was cancelled"))]
    WorkerTask { source: tokio::task::JoinError },

    #[snafu(display("All {count} upload workers failed to start"))]
    AllWorkersFailed {
        count: usize,
        #[snafu(source(from(UploadError, Box::new)))]
        source: Box<UploadError>,
    },

    #[snafu(display("The upload was aborted"))]
    Aborted,
}
