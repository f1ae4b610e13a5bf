//! Processing of a single plugin, from skip check to classified outcome.
//!
//! ```text
//!  skip check ──hit──► SKIPPED
//!      │ miss / error
//!      ▼
//!  release_urls ──no sdist──► NO_SOURCE
//!      │
//!      ▼
//!  download (gated) ─► extract (blocking pool) ─► run with deadline
//!                                                     │
//!                              PASSED / FAILED / timed out FAILED
//! ```
//!
//! Any error along the way becomes an `ERROR` outcome; [`JobPipeline::process`]
//! cannot fail.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::gate::SingleResourceGate;
use crate::index::PluginSpec;
use crate::outcome::{JobOutcome, RunStatus, classify};
use crate::package::{self, PackageIndex, select_sdist};
use crate::runner::IsolatedRunner;
use crate::site::{SiteClient, SkipCheck};

/// How long a cancelled runner gets to reap its process.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(10);

/// Per-run settings shared by every job.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent of the per-job directories.
    pub work_dir: PathBuf,
    /// tox environment / results tag.
    pub env: String,
    /// pytest version under test.
    pub pytest_version: String,
    /// Deadline for one runner invocation.
    pub run_timeout: Duration,
    /// Grace period for the runner to exit after cancellation.
    pub kill_grace: Duration,
}

impl PipelineSettings {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        env: impl Into<String>,
        pytest_version: impl Into<String>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            env: env.into(),
            pytest_version: pytest_version.into(),
            run_timeout: Duration::from_secs(300),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Directory of the job for `spec`.
    pub fn job_dir(&self, spec: &PluginSpec) -> PathBuf {
        self.work_dir.join(spec.to_string())
    }
}

/// Runs every stage for one plugin.
///
/// Shared by all workers; downloads from every job go through the same
/// [`SingleResourceGate`].
pub struct JobPipeline<I, R, C = SiteClient> {
    index: I,
    runner: R,
    skip_check: Option<C>,
    gate: SingleResourceGate,
    settings: PipelineSettings,
}

impl<I, R, C> JobPipeline<I, R, C>
where
    I: PackageIndex,
    R: IsolatedRunner,
    C: SkipCheck,
{
    /// Creates a pipeline without a skip check.
    pub fn new(index: I, runner: R, settings: PipelineSettings) -> Self {
        Self {
            index,
            runner,
            skip_check: None,
            gate: SingleResourceGate::new(),
            settings,
        }
    }

    /// Asks `check` before processing each plugin.
    pub fn with_skip_check(mut self, check: C) -> Self {
        self.skip_check = Some(check);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Processes `spec` and classifies the result.
    pub async fn process(&self, spec: PluginSpec) -> JobOutcome {
        let start = Instant::now();

        if self.already_tested(&spec).await {
            info!("{} already tested, skipping", spec);
            return JobOutcome::skipped(spec, start.elapsed());
        }

        match self.execute(&spec).await {
            Ok(Some(run)) => classify(spec, run, start.elapsed()),
            Ok(None) => {
                info!("{}: no sdist found", spec);
                JobOutcome::no_source(spec, start.elapsed())
            }
            Err(e) => {
                error!("{} errored: {:#}", spec, e);
                JobOutcome::error(spec, &e, start.elapsed())
            }
        }
    }

    async fn already_tested(&self, spec: &PluginSpec) -> bool {
        let Some(check) = &self.skip_check else {
            return false;
        };

        match check
            .already_tested(spec, &self.settings.env, &self.settings.pytest_version)
            .await
        {
            Ok(tested) => tested,
            Err(e) => {
                warn!("Skip check for {} failed, testing anyway: {}", spec, e);
                false
            }
        }
    }

    /// Returns `None` when the release has no source distribution.
    async fn execute(&self, spec: &PluginSpec) -> anyhow::Result<Option<RunStatus>> {
        let artifacts = self
            .index
            .release_urls(&spec.name, &spec.version)
            .await
            .with_context(|| format!("Failed to look up {} on {}", spec, self.index.name()))?;
        let Some(sdist) = select_sdist(&artifacts) else {
            return Ok(None);
        };

        let job_dir = self.settings.job_dir(spec);
        tokio::fs::create_dir_all(&job_dir)
            .await
            .with_context(|| format!("Failed to create {}", job_dir.display()))?;

        let archive = self
            .gate
            .acquire_and_run(|| self.index.download(sdist, &job_dir))
            .await
            .with_context(|| format!("Failed to download {}", sdist.url))?;

        let source_dir = unpack(archive, job_dir).await?;
        debug!("{} unpacked into {}", spec, source_dir.display());

        Ok(Some(self.run_with_deadline(spec, &source_dir).await))
    }

    async fn run_with_deadline(&self, spec: &PluginSpec, source_dir: &Path) -> RunStatus {
        let token = CancellationToken::new();
        let run = self.runner.run(source_dir, token.clone());
        tokio::pin!(run);

        let finished = tokio::select! {
            result = &mut run => Some(result),
            _ = tokio::time::sleep(self.settings.run_timeout) => None,
        };

        match finished {
            Some(Ok(output)) => {
                debug!(
                    "{}: {} exited with {} after {:.1?}",
                    spec,
                    self.runner.name(),
                    output.exit_code,
                    output.duration
                );
                RunStatus::Completed {
                    exit_code: output.exit_code,
                    output: output.output,
                }
            }
            Some(Err(e)) => {
                let err = anyhow::Error::new(e).context(format!("{} failed", self.runner.name()));
                RunStatus::Crashed(format!("{:?}", err))
            }
            None => {
                warn!(
                    "{}: run exceeded {:?}, cancelling",
                    spec, self.settings.run_timeout
                );
                token.cancel();
                if tokio::time::timeout(self.settings.kill_grace, run).await.is_err() {
                    warn!("{}: runner did not stop within {:?}", spec, self.settings.kill_grace);
                }
                RunStatus::TimedOut
            }
        }
    }
}

async fn unpack(archive: PathBuf, dest: PathBuf) -> anyhow::Result<PathBuf> {
    let name = archive.display().to_string();
    tokio::task::spawn_blocking(move || package::extract(&archive, &dest))
        .await
        .context("Extraction task failed")?
        .with_context(|| format!("Failed to unpack {}", name))
}
