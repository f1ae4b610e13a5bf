//! Client for the results site.
//!
//! The site serves two purposes:
//!
//! - **Skip check**: `GET {base}/output/{name}-{version}?py={env}&pytest={version}`
//!   answers 200 when a result for that combination is already stored.
//! - **Submission**: `POST {base}` with `{"secret": ..., "results": [...]}`
//!   uploads the final report. Anything but 200 is a failed submission.
//!
//! Both are behind traits ([`SkipCheck`], [`ReportSink`]) so the pipeline and
//! orchestrator can be exercised without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::index::PluginSpec;
use crate::orchestrator::ReportEntry;

/// Result type for site operations.
pub type SiteResult<T> = Result<T, SiteError>;

/// Errors talking to the results site.
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    /// The site answered with a status other than 200.
    #[error("Results site rejected the request with status {0}")]
    Rejected(u16),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Asks whether a plugin has already been tested.
#[async_trait]
pub trait SkipCheck: Send + Sync {
    /// Returns `true` if a result for `spec` under `env` and
    /// `pytest_version` already exists.
    ///
    /// `Ok(false)` covers every non-200 answer; errors are transport
    /// failures, which callers treat as "not tested".
    async fn already_tested(
        &self,
        spec: &PluginSpec,
        env: &str,
        pytest_version: &str,
    ) -> SiteResult<bool>;
}

/// Destination for the final report.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Uploads `results`, authenticated with `secret`.
    async fn submit(&self, secret: &str, results: &[ReportEntry]) -> SiteResult<()>;
}

#[derive(Serialize)]
struct Submission<'a> {
    secret: &'a str,
    results: &'a [ReportEntry],
}

/// HTTP client for the results site.
#[derive(Clone)]
pub struct SiteClient {
    base_url: String,
    client: Client,
}

impl SiteClient {
    /// Creates a client for the site at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> SiteResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("plugincompat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.to_string(),
            client,
        })
    }

    /// Base URL as configured; submissions are posted here unchanged.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn output_url(&self, spec: &PluginSpec) -> String {
        format!("{}/output/{}", self.base_url.trim_end_matches('/'), spec)
    }
}

#[async_trait]
impl SkipCheck for SiteClient {
    async fn already_tested(
        &self,
        spec: &PluginSpec,
        env: &str,
        pytest_version: &str,
    ) -> SiteResult<bool> {
        let url = self.output_url(spec);
        let response = self
            .client
            .get(&url)
            .query(&[("py", env), ("pytest", pytest_version)])
            .send()
            .await?;

        debug!("Skip check {} -> {}", url, response.status());
        Ok(response.status() == reqwest::StatusCode::OK)
    }
}

#[async_trait]
impl ReportSink for SiteClient {
    async fn submit(&self, secret: &str, results: &[ReportEntry]) -> SiteResult<()> {
        let response = self
            .client
            .post(&self.base_url)
            .header("content-type", "application/json")
            .json(&Submission { secret, results })
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            debug!("Submission rejected: {} {}", status, text);
            return Err(SiteError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}
