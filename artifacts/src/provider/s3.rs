use super::Provider;
use crate::error::{PutObjectSnafu, ReadSourceStreamSnafu};
use crate::{config, Artifact, Config, Result};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_types::region::Region;
use snafu::prelude::*;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Regions S3 is known to be available in.  Anything else is assumed to be a typo.
const KNOWN_REGIONS: &[&str] = &[
    "af-south-1",
    "ap-east-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ca-central-1",
    "cn-north-1",
    "cn-northwest-1",
    "eu-central-1",
    "eu-central-2",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "il-central-1",
    "me-central-1",
    "me-south-1",
    "sa-east-1",
    "us-east-1",
    "us-east-2",
    "us-gov-east-1",
    "us-gov-west-1",
    "us-west-1",
    "us-west-2",
];

/// Uploads artifacts to an S3 bucket, or a bucket on an S3-compatible server such as minio.
pub struct S3Provider {
    bucket: String,
    region: String,
    endpoint: Option<Url>,
    access_key: String,
    secret_key: String,
    cache_control: String,

    /// Built on first use and then shared by every worker
    client: OnceCell<aws_sdk_s3::Client>,
}

impl S3Provider {
    pub fn new(config: &Config) -> Self {
        Self {
            bucket: config.bucket_name.trim().to_string(),
            region: validated_region(&config.region),
            endpoint: config.s3_endpoint.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            cache_control: config.effective_cache_control().to_string(),
            client: OnceCell::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn client(&self) -> &aws_sdk_s3::Client {
        self.client.get_or_init(|| self.make_s3_client()).await
    }

    async fn make_s3_client(&self) -> aws_sdk_s3::Client {
        debug!(region = %self.region, endpoint = ?self.endpoint, "Creating S3 client");

        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(Credentials::new(
                &self.access_key,
                &self.secret_key,
                None,
                None,
                "artifacts",
            ))
            .load()
            .await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if let Some(endpoint) = &self.endpoint {
            // S3-compatible servers generally don't support virtual-hosted bucket addressing
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint.as_str().trim_end_matches('/'))
                .force_path_style(true);
        }

        aws_sdk_s3::Client::from_conf(s3_config_builder.build())
    }

    /// The URL the object can be downloaded from, if it's been made public
    fn public_url(&self, key: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.as_str().trim_end_matches('/'),
                self.bucket,
                key
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

#[async_trait::async_trait]
impl Provider for S3Provider {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn prepare(&self) -> Result<()> {
        self.client().await;

        Ok(())
    }

    #[instrument(skip_all, fields(bucket = %self.bucket, source = %artifact.source.display()))]
    async fn transfer(&self, artifact: &Artifact) -> Result<()> {
        let client = self.client().await;
        let key = artifact.full_destination_key();
        let size = artifact.size();

        let file = artifact.reader().await?;
        let body = ByteStream::read_from()
            .file(file)
            .build()
            .await
            .context(ReadSourceStreamSnafu {
                path: &artifact.source,
            })?;

        debug!(%key, size, content_type = artifact.content_type(), permission = %artifact.permission, "Uploading artifact to S3");

        client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type(artifact.content_type())
            .content_length(i64::try_from(size).unwrap_or(i64::MAX))
            .cache_control(&self.cache_control)
            .acl(artifact.permission.as_canned_acl())
            .send()
            .await
            .context(PutObjectSnafu {
                bucket: &self.bucket,
                key: &key,
            })?;

        info!(%key, url = %self.public_url(&key), "Uploaded artifact");

        Ok(())
    }
}

impl std::fmt::Debug for S3Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Provider")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// `region` if it's a known S3 region, otherwise the default region
fn validated_region(region: &str) -> String {
    let region = region.trim();

    if KNOWN_REGIONS.contains(&region) {
        region.to_string()
    } else {
        warn!(
            region,
            default = config::DEFAULT_S3_REGION,
            "Unrecognized S3 region; using the default region instead"
        );

        config::DEFAULT_S3_REGION.to_string()
    }
}
