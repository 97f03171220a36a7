use super::Provider;
use crate::error::NullUploadFailedSnafu;
use crate::{Artifact, Result};
use tracing::debug;

/// A provider that doesn't upload anything.
///
/// Every artifact succeeds, except those whose source path is in the list of sources to fail.
/// Useful for dry runs, and for exercising the upload pipeline without a real backend.
#[derive(Clone, Debug, Default)]
pub struct NullProvider {
    /// Kept sorted so lookups can use a binary search
    sources_to_fail: Vec<String>,
}

impl NullProvider {
    pub fn new<I, S>(sources_to_fail: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sources_to_fail = sources_to_fail
            .into_iter()
            .map(Into::into)
            .collect::<Vec<_>>();
        sources_to_fail.sort();

        Self { sources_to_fail }
    }

    fn should_fail(&self, source: &str) -> bool {
        self.sources_to_fail
            .binary_search_by(|candidate| candidate.as_str().cmp(source))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl Provider for NullProvider {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn transfer(&self, artifact: &Artifact) -> Result<()> {
        let source = artifact.source.to_string_lossy();

        debug!(%source, key = %artifact.full_destination_key(), "Not really uploading");

        snafu::ensure!(
            !self.should_fail(&source),
            NullUploadFailedSnafu {
                path: &artifact.source
            }
        );

        Ok(())
    }

    fn retries_transfers(&self) -> bool {
        false
    }
}
