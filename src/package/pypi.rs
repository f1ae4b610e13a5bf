//! PyPI JSON API client.
//!
//! Release metadata comes from `GET {url}/{name}/{version}/json`, whose
//! `urls` array lists every file of the release:
//!
//! ```json
//! {"urls": [
//!   {"url": "https://files.pythonhosted.org/.../pytest-foo-1.0.tar.gz",
//!    "packagetype": "sdist", "filename": "pytest-foo-1.0.tar.gz"}
//! ]}
//! ```
//!
//! An unknown release (HTTP 404) is reported as having no artifacts.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{PackageError, PackageIndex, PackageResult, ReleaseArtifact};
use crate::config::PackageIndexConfig;

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    #[serde(default)]
    urls: Vec<ReleaseArtifact>,
}

/// Package index backed by a PyPI-compatible JSON API.
pub struct PyPiIndex {
    base_url: String,
    client: Client,
}

impl PyPiIndex {
    /// Creates a client for the configured index.
    pub fn new(config: &PackageIndexConfig) -> PackageResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("plugincompat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn release_url(&self, name: &str, version: &str) -> String {
        format!("{}/{}/{}/json", self.base_url, name, version)
    }
}

/// Extracts the artifact list from a release metadata document.
fn parse_release(body: &str) -> serde_json::Result<Vec<ReleaseArtifact>> {
    let response: ReleaseResponse = serde_json::from_str(body)?;
    Ok(response.urls)
}

#[async_trait]
impl PackageIndex for PyPiIndex {
    async fn release_urls(
        &self,
        name: &str,
        version: &str,
    ) -> PackageResult<Vec<ReleaseArtifact>> {
        let url = self.release_url(name, version);
        debug!("Fetching release metadata: {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            debug!("{}-{} is not on the index", name, version);
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(PackageError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        parse_release(&body).map_err(|source| PackageError::Metadata { url, source })
    }

    async fn download(
        &self,
        artifact: &ReleaseArtifact,
        dest_dir: &Path,
    ) -> PackageResult<PathBuf> {
        let basename = artifact.basename()?;
        debug!("Downloading {}", artifact.url);

        let response = self.client.get(&artifact.url).send().await?;
        if !response.status().is_success() {
            return Err(PackageError::Status {
                url: artifact.url.clone(),
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        let size = bytes.len();

        // Only complete downloads appear under the final name.
        let dest = dest_dir.join(&basename);
        let dir = dest_dir.to_path_buf();
        let target = dest.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = tempfile::NamedTempFile::new_in(&dir)?;
            file.write_all(&bytes)?;
            file.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;

        debug!("Saved {} ({} bytes)", dest.display(), size);
        Ok(dest)
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{HttpResponder, body_response};

    fn config(url: &str) -> PackageIndexConfig {
        PackageIndexConfig {
            url: url.to_string(),
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn test_parse_release_ignores_extra_fields() {
        let artifacts = parse_release(
            r#"{
                "info": {"name": "pytest-foo"},
                "urls": [
                    {"url": "https://f/pytest_foo-1.0-py3-none-any.whl",
                     "packagetype": "bdist_wheel", "filename": "pytest_foo-1.0-py3-none-any.whl",
                     "size": 1234},
                    {"url": "https://f/pytest-foo-1.0.tar.gz",
                     "packagetype": "sdist", "filename": "pytest-foo-1.0.tar.gz"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[1].packagetype, "sdist");
        assert_eq!(artifacts[1].filename.as_deref(), Some("pytest-foo-1.0.tar.gz"));
    }

    #[test]
    fn test_parse_release_without_urls() {
        assert!(parse_release(r#"{"info": {}}"#).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_urls_over_http() {
        let server = HttpResponder::start(vec![body_response(
            200,
            r#"{"urls": [{"url": "http://f/pytest-foo-1.0.tar.gz", "packagetype": "sdist"}]}"#,
        )])
        .await;

        let index = PyPiIndex::new(&config(&server.url())).unwrap();
        let artifacts = index.release_urls("pytest-foo", "1.0").await.unwrap();

        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].is_sdist());
        let requests = server.requests().await;
        assert!(requests[0].starts_with("GET /pytest-foo/1.0/json "));
    }

    #[tokio::test]
    async fn test_release_urls_malformed_metadata() {
        let server = HttpResponder::start(vec![body_response(200, r#"{"urls": "nope"}"#)]).await;

        let index = PyPiIndex::new(&config(&server.url())).unwrap();
        let err = index.release_urls("pytest-foo", "1.0").await.unwrap_err();

        assert!(matches!(err, PackageError::Metadata { .. }));
        assert!(err.to_string().contains("/pytest-foo/1.0/json"));
    }

    #[tokio::test]
    async fn test_release_urls_not_found_is_empty() {
        let server = HttpResponder::start(vec![body_response(404, "Not Found")]).await;

        let index = PyPiIndex::new(&config(&server.url())).unwrap();
        let artifacts = index.release_urls("pytest-nope", "0.0").await.unwrap();
        assert!(artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_release_urls_server_error() {
        let server = HttpResponder::start(vec![body_response(503, "busy")]).await;

        let index = PyPiIndex::new(&config(&server.url())).unwrap();
        let err = index.release_urls("pytest-foo", "1.0").await.unwrap_err();
        assert!(matches!(err, PackageError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let server = HttpResponder::start(vec![body_response(200, "archive-bytes")]).await;
        let temp_dir = tempfile::TempDir::new().unwrap();

        let index = PyPiIndex::new(&config(&server.url())).unwrap();
        let artifact = ReleaseArtifact::new(
            format!("{}/packages/pytest-foo-1.0.tar.gz", server.url()),
            "sdist",
        );
        let path = index.download(&artifact, temp_dir.path()).await.unwrap();

        assert_eq!(path, temp_dir.path().join("pytest-foo-1.0.tar.gz"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "archive-bytes");
    }
}
