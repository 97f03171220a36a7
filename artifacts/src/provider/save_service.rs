use super::Provider;
use crate::error::{
    BuildHttpClientSnafu, InvalidSaveUrlSnafu, SaveServiceRejectedSnafu, SaveServiceRequestSnafu,
};
use crate::{Artifact, Config, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use snafu::prelude::*;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};
use url::Url;

/// Uploads artifacts to the artifacts save service with one HTTP `PUT` per artifact.
///
/// Artifacts are stored at `<save host>/<repo slug>/jobs/<job id>/<destination key>`.
pub struct SaveServiceProvider {
    save_host: String,
    auth_token: String,
    repo_slug: String,
    job_id: String,
    job_number: String,

    client: OnceCell<reqwest::Client>,
}

impl SaveServiceProvider {
    pub fn new(config: &Config) -> Self {
        Self {
            save_host: config.save_host.trim().to_string(),
            auth_token: config.auth_token.clone(),
            repo_slug: config.repo_slug.clone(),
            job_id: config.job_id.clone(),
            job_number: config.job_number.clone(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async {
                debug!(save_host = %self.save_host, "Creating HTTP client for artifacts save service");

                reqwest::Client::builder()
                    .user_agent(concat!("artifacts/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .context(BuildHttpClientSnafu)
            })
            .await
    }

    /// The URL an artifact with destination key `key` is `PUT` to
    fn artifact_url(&self, key: &str) -> Result<Url> {
        let path = [self.repo_slug.as_str(), "jobs", self.job_id.as_str(), key]
            .into_iter()
            .flat_map(|part| part.split('/'))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");

        let url = format!("{}/{}", self.save_host.trim_end_matches('/'), path);

        Url::parse(&url).context(InvalidSaveUrlSnafu { url })
    }
}

#[async_trait::async_trait]
impl Provider for SaveServiceProvider {
    fn name(&self) -> &'static str {
        "artifacts"
    }

    async fn prepare(&self) -> Result<()> {
        self.client().await?;

        Ok(())
    }

    #[instrument(skip_all, fields(source = %artifact.source.display()))]
    async fn transfer(&self, artifact: &Artifact) -> Result<()> {
        let client = self.client().await?;
        let key = artifact.full_destination_key();
        let url = self.artifact_url(&key)?;
        let size = artifact.size();

        let file = artifact.reader().await?;
        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));

        debug!(%url, size, content_type = artifact.content_type(), "Putting artifact to save service");

        let mut request = client
            .put(url.clone())
            .header("Artifacts-Repo-Slug", &self.repo_slug)
            .header("Artifacts-Source", &*artifact.source.to_string_lossy())
            .header("Artifacts-Dest", &key)
            .header("Artifacts-Job-Number", &self.job_number)
            .header("Artifacts-Size", size)
            .header(CONTENT_TYPE, artifact.content_type())
            .header(CONTENT_LENGTH, size);

        if !self.auth_token.is_empty() {
            request = request.header(AUTHORIZATION, format!("token {}", self.auth_token));
        }

        let response = request
            .body(body)
            .send()
            .await
            .context(SaveServiceRequestSnafu { url: url.as_str() })?;

        let status = response.status();
        ensure!(
            status == StatusCode::OK,
            SaveServiceRejectedSnafu {
                url: url.as_str(),
                status: status.as_u16(),
            }
        );

        let response_body = response.text().await.unwrap_or_default();
        debug!(%url, response = %response_body, "Save service accepted artifact");
        info!(%key, %url, "Uploaded artifact");

        Ok(())
    }
}

impl std::fmt::Debug for SaveServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveServiceProvider")
            .field("save_host", &self.save_host)
            .field("repo_slug", &self.repo_slug)
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}
