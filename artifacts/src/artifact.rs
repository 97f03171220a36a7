//! A single local file, paired with the remote location it's uploaded to.
use crate::config::Permission;
use crate::error::OpenSourceSnafu;
use crate::{sniff, Result, UploadError};
use once_cell::sync::OnceCell;
use snafu::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The outcome of uploading an [`Artifact`].
///
/// Starts out as not-ok with no error, and is set once by the upload worker that processed the
/// artifact.
#[derive(Debug, Default)]
pub struct UploadResult {
    ok: bool,
    err: Option<UploadError>,
}

impl UploadResult {
    /// `true` if the upload succeeded within the retry budget
    pub fn ok(&self) -> bool {
        self.ok
    }

    /// The error from the last failed attempt, if the upload failed
    pub fn err(&self) -> Option<&UploadError> {
        self.err.as_ref()
    }
}

/// One file to upload to one target path.
///
/// A local file uploaded to N target paths produces N artifacts.  Ownership of an artifact moves
/// from the feeder to an upload worker and then back to the uploader, so at any moment exactly
/// one task can touch it.
#[derive(Debug)]
pub struct Artifact {
    /// Local file to upload
    pub source: PathBuf,

    /// Logical remote path of the file, relative to `prefix`
    pub destination: String,

    /// The target path this artifact is uploaded under
    pub prefix: String,

    pub permission: Permission,

    content_type: OnceCell<String>,
    size: OnceCell<u64>,
    upload_result: UploadResult,
}

impl Artifact {
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<String>,
        prefix: impl Into<String>,
        permission: Permission,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            prefix: prefix.into(),
            permission,
            content_type: OnceCell::new(),
            size: OnceCell::new(),
            upload_result: UploadResult::default(),
        }
    }

    /// The MIME type to upload this artifact with.
    ///
    /// Looked up by file extension first.  If the extension isn't known, the first bytes of the
    /// file are inspected.  This never fails: if the file can't be read the type is
    /// `application/octet-stream`.
    pub fn content_type(&self) -> &str {
        self.content_type
            .get_or_init(|| detect_content_type(&self.source))
    }

    /// The size of the source file in bytes, or 0 if it can't be determined
    pub fn size(&self) -> u64 {
        *self.size.get_or_init(|| match std::fs::metadata(&self.source) {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                debug!(source = %self.source.display(), err = %e, "Unable to stat artifact; treating size as 0");
                0
            }
        })
    }

    /// Open the source file for streaming.
    ///
    /// Unlike [`Self::size`] this fails if the file can't be opened.
    pub async fn reader(&self) -> Result<tokio::fs::File> {
        tokio::fs::File::open(&self.source)
            .await
            .context(OpenSourceSnafu { path: &self.source })
    }

    /// The object key this artifact is stored under: `prefix` and `destination` joined with `/`,
    /// with empty, `.` and `..` components resolved, and no leading `/`.
    pub fn full_destination_key(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();

        for part in self.prefix.split('/').chain(self.destination.split('/')) {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                part => parts.push(part),
            }
        }

        parts.join("/")
    }

    pub fn upload_result(&self) -> &UploadResult {
        &self.upload_result
    }

    pub(crate) fn mark_succeeded(&mut self) {
        self.upload_result = UploadResult {
            ok: true,
            err: None,
        };
    }

    pub(crate) fn mark_failed(&mut self, err: UploadError) {
        self.upload_result = UploadResult {
            ok: false,
            err: Some(err),
        };
    }
}

fn detect_content_type(path: &Path) -> String {
    if let Some(content_type) = mime_guess::from_path(path).first_raw() {
        // Text types from the extension table don't carry a charset
        return if content_type.starts_with("text/") && !content_type.contains(';') {
            format!("{content_type}; charset=utf-8")
        } else {
            content_type.to_string()
        };
    }

    let mut buffer = Vec::with_capacity(sniff::SNIFF_LEN);
    let read = std::fs::File::open(path)
        .and_then(|file| file.take(sniff::SNIFF_LEN as u64).read_to_end(&mut buffer));

    match read {
        Ok(_) => sniff::sniff(&buffer),
        Err(e) => {
            debug!(source = %path.display(), err = %e, "Unable to read artifact to detect content type");
            sniff::OCTET_STREAM.to_string()
        }
    }
}
