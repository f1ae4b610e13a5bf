//! Release lookup, download and unpacking.
//!
//! The pipeline talks to the package index through the [`PackageIndex`]
//! trait so tests can substitute an in-memory index.
//!
//! ```text
//!  release_urls(name, version) ──► Vec<ReleaseArtifact>
//!                                        │
//!                              select_sdist()
//!                                        │
//!  download(artifact, dir)  ◄────────────┘   (behind SingleResourceGate)
//!        │
//!        ▼
//!  archive::extract(file, dir) ──► unpacked source directory
//! ```

pub mod archive;
pub mod pypi;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use archive::{ArchiveError, ArchiveFormat, extract};
pub use pypi::PyPiIndex;

/// Result type for package index operations.
pub type PackageResult<T> = Result<T, PackageError>;

/// Package type of a source distribution.
pub const SDIST: &str = "sdist";

/// Errors that can occur while talking to the package index.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// The index answered with an unexpected HTTP status.
    #[error("Package index returned {status} for {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The release metadata is not valid JSON of the expected shape.
    #[error("Malformed release metadata from {url}: {source}")]
    Metadata {
        /// Requested URL.
        url: String,
        /// Decoding error.
        source: serde_json::Error,
    },

    /// The artifact URL has no usable file name.
    #[error("Cannot derive a file name from {0}")]
    BadUrl(String),

    /// I/O error while writing the download.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseArtifact {
    /// Download URL.
    pub url: String,

    /// Artifact kind, e.g. `sdist` or `bdist_wheel`.
    pub packagetype: String,

    /// File name as published; derived from the URL when absent.
    #[serde(default)]
    pub filename: Option<String>,
}

impl ReleaseArtifact {
    /// Creates an artifact descriptor without an explicit file name.
    pub fn new(url: impl Into<String>, packagetype: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            packagetype: packagetype.into(),
            filename: None,
        }
    }

    /// File name the artifact is saved under.
    ///
    /// Uses the published file name when known, otherwise the last path
    /// segment of the URL (query and fragment stripped).
    pub fn basename(&self) -> PackageResult<String> {
        if let Some(name) = &self.filename
            && !name.is_empty()
        {
            return Ok(name.clone());
        }

        let path = self
            .url
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        path.rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PackageError::BadUrl(self.url.clone()))
    }

    /// Returns `true` for source distributions.
    pub fn is_sdist(&self) -> bool {
        self.packagetype == SDIST
    }
}

/// Picks the source distribution out of a release's artifacts.
///
/// Wheels and other binary artifacts are ignored; the first sdist wins.
pub fn select_sdist(artifacts: &[ReleaseArtifact]) -> Option<&ReleaseArtifact> {
    artifacts.iter().find(|a| a.is_sdist())
}

/// Source of release metadata and artifacts.
///
/// # Thread Safety
///
/// Implementations are shared by all workers and must be `Send + Sync`.
/// [`download`](Self::download) is nevertheless only ever called by one job
/// at a time; the pipeline serializes it through the download gate.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Lists the artifacts published for `name` at `version`.
    async fn release_urls(&self, name: &str, version: &str)
    -> PackageResult<Vec<ReleaseArtifact>>;

    /// Downloads `artifact` into `dest_dir`, returning the saved file.
    async fn download(&self, artifact: &ReleaseArtifact, dest_dir: &Path)
    -> PackageResult<PathBuf>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_sdist_ignores_wheels() {
        let artifacts = vec![
            ReleaseArtifact::new(
                "https://files.example/pytest_foo-1.0-py3-none-any.whl",
                "bdist_wheel",
            ),
            ReleaseArtifact::new("https://files.example/pytest-foo-1.0.tar.gz", "sdist"),
        ];

        let sdist = select_sdist(&artifacts).unwrap();
        assert_eq!(sdist.basename().unwrap(), "pytest-foo-1.0.tar.gz");
    }

    #[test]
    fn test_select_sdist_none() {
        let artifacts = vec![
            ReleaseArtifact::new("https://files.example/a.whl", "bdist_wheel"),
            ReleaseArtifact::new("https://files.example/a.egg", "bdist_egg"),
        ];
        assert!(select_sdist(&artifacts).is_none());
        assert!(select_sdist(&[]).is_none());
    }

    #[test]
    fn test_basename_prefers_filename() {
        let artifact = ReleaseArtifact {
            url: "https://files.example/download?id=3".to_string(),
            packagetype: "sdist".to_string(),
            filename: Some("pytest-foo-1.0.zip".to_string()),
        };
        assert_eq!(artifact.basename().unwrap(), "pytest-foo-1.0.zip");
    }

    #[test]
    fn test_basename_strips_query() {
        let artifact =
            ReleaseArtifact::new("https://files.example/p/pytest-foo-1.0.tgz?sig=abc#frag", "sdist");
        assert_eq!(artifact.basename().unwrap(), "pytest-foo-1.0.tgz");
    }

    #[test]
    fn test_basename_trailing_slash() {
        let artifact = ReleaseArtifact::new("https://files.example/p/", "sdist");
        assert!(matches!(artifact.basename(), Err(PackageError::BadUrl(_))));
    }
}
