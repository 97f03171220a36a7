//! Upload CI build artifacts to S3, an S3-compatible server, or the artifacts save service.
//!
//! The local paths to upload are listed in a [`Config`], usually built from the environment of
//! the CI job with [`Config::from_env`].  Each path is either a file or a directory; directories
//! are walked recursively.  Every file found becomes one [`Artifact`] per configured target path,
//! and artifacts are uploaded concurrently by a pool of workers with retries.  The combined size of
//! all artifacts in a run is capped by [`Config::max_size`].
//!
//! ```no_run
//! # async fn example() -> artifacts::Result<()> {
//! let config = artifacts::Config::from_env(&artifacts::env::process_env);
//! let summary = artifacts::upload(config).await?;
//!
//! for failure in summary.failures() {
//!     eprintln!("{} was not uploaded", failure.source.display());
//! }
//! # Ok(())
//! # }
//! ```

mod artifact;
mod config;
pub mod env;
mod error;
mod feeder;
mod path;
pub mod provider;
mod size_guard;
mod sniff;
mod upload;

pub use artifact::{Artifact, UploadResult};
pub use config::{Config, Permission, DEFAULT_CACHE_CONTROL, DEFAULT_S3_REGION};
pub use error::{Result, UploadError};
pub use feeder::{FeedSummary, Feeder};
pub use path::{PathSet, PathSpec};
pub use size_guard::SizeGuard;
pub use upload::*;
