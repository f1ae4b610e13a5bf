//! Compatibility run orchestration.
//!
//! This module ties the per-plugin pipeline, the worker pool and the result
//! aggregator together into a complete run.
//!
//! # Architecture
//!
//! ```text
//!   Vec<PluginSpec>
//!         │
//!         ▼
//!    WorkerPool ──── N workers ────► JobPipeline::process(spec)
//!         │                              │ skip check
//!         │                              │ resolve + gated download
//!         │                              │ unpack
//!         │                              │ run with deadline
//!         │                              ▼
//!         │◄──────────────────────── JobOutcome
//!         │  (completion order)
//!         ▼
//!   Reporter::on_job_complete ──► ResultAggregator::record
//!                                        │
//!                                        ▼
//!                                  CompatReport (sorted)
//!                                        │
//!                      Reporter::on_run_complete, then publish()
//! ```
//!
//! # Key Components
//!
//! - [`Orchestrator`]: Main entry point coordinating the run
//! - [`JobPipeline`]: Processes a single plugin
//! - [`WorkerPool`]: Bounded parallel execution
//! - [`ResultAggregator`]: Sorted report and counters
//!
//! # Example
//!
//! ```no_run
//! use plugincompat::config::Config;
//! use plugincompat::index::read_plugins_index;
//! use plugincompat::orchestrator::{JobPipeline, Orchestrator, PipelineSettings};
//! use plugincompat::package::PyPiIndex;
//! use plugincompat::report::ConsoleReporter;
//! use plugincompat::runner::tox::ToxRunner;
//! use plugincompat::site::SiteClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let plugins = read_plugins_index(&config.compat.index_file)?;
//!
//!     let index = PyPiIndex::new(&config.package_index)?;
//!     let runner = ToxRunner::new(config.runner.clone(), "py311", "8.2.0")?;
//!     let settings = PipelineSettings::new(&config.compat.work_dir, "py311", "8.2.0");
//!     let pipeline: JobPipeline<_, _, SiteClient> = JobPipeline::new(index, runner, settings);
//!
//!     let orchestrator = Orchestrator::new(pipeline, 8, ConsoleReporter::new(false));
//!     let result = orchestrator.run(plugins).await?;
//!     println!("{} run, {} skipped", result.summary().run, result.summary().skipped);
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod pipeline;
pub mod pool;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tracing::{error, info, warn};

use crate::index::PluginSpec;
use crate::package::PackageIndex;
use crate::report::Reporter;
use crate::runner::IsolatedRunner;
use crate::site::{ReportSink, SkipCheck};

pub use aggregate::{CompatReport, ReportEntry, ReportStatus, ResultAggregator, RunSummary};
pub use pipeline::{JobPipeline, PipelineSettings};
pub use pool::WorkerPool;

/// Results of an entire compatibility run.
///
/// Failing plugins do not make the run unsuccessful; the process exit code
/// depends only on whether the report could be published (see
/// [`Publication::exit_code`]).
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The sorted report.
    pub report: CompatReport,
}

impl RunResult {
    pub fn summary(&self) -> &RunSummary {
        &self.report.summary
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.report.entries
    }
}

/// The coordinator of a compatibility run.
///
/// # Type Parameters
///
/// - `I`: The package index type
/// - `R`: The isolated runner type
/// - `C`: The skip check type
/// - `Rep`: The reporter type
pub struct Orchestrator<I, R, C, Rep> {
    pipeline: Arc<JobPipeline<I, R, C>>,
    pool: WorkerPool,
    reporter: Rep,
}

impl<I, R, C, Rep> Orchestrator<I, R, C, Rep>
where
    I: PackageIndex + 'static,
    R: IsolatedRunner + 'static,
    C: SkipCheck + 'static,
    Rep: Reporter,
{
    /// Creates an orchestrator running at most `max_parallel` jobs at once.
    pub fn new(pipeline: JobPipeline<I, R, C>, max_parallel: usize, reporter: Rep) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            pool: WorkerPool::new(max_parallel),
            reporter,
        }
    }

    /// Checks every plugin and returns the sorted report.
    ///
    /// The work directory is wiped and recreated first. A `(name, version)`
    /// listed more than once is checked once.
    ///
    /// # Errors
    ///
    /// Returns an error only if the work directory cannot be prepared.
    /// Failures of individual plugins end up in the report.
    pub async fn run(&self, plugins: Vec<PluginSpec>) -> anyhow::Result<RunResult> {
        let settings = self.pipeline.settings();
        prepare_work_dir(&settings.work_dir).await?;

        let plugins = dedupe(plugins);
        let total = plugins.len();
        info!(
            "Checking {} plugins against pytest {} ({}) with {} workers",
            total,
            settings.pytest_version,
            settings.env,
            self.pool.workers()
        );
        self.reporter.on_run_start(total).await;

        let mut aggregator =
            ResultAggregator::new(&settings.env, &settings.pytest_version, total);

        let pipeline = Arc::clone(&self.pipeline);
        let mut outcomes = self.pool.run(plugins, move |spec| {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.process(spec).await }
        });

        while let Some(outcome) = outcomes.next().await {
            self.reporter.on_job_complete(&outcome).await;
            aggregator.record(&outcome);
        }

        let report = aggregator.finish();
        self.reporter.on_run_complete(&report).await;

        Ok(RunResult { report })
    }
}

/// Keeps the first entry for every `(name, version)`; jobs of the same
/// plugin would share a job directory.
fn dedupe(plugins: Vec<PluginSpec>) -> Vec<PluginSpec> {
    let mut seen = HashSet::new();
    plugins
        .into_iter()
        .filter(|spec| {
            let first = seen.insert((spec.name.clone(), spec.version.clone()));
            if !first {
                warn!("{} is listed more than once, checking it once", spec);
            }
            first
        })
        .collect()
}

async fn prepare_work_dir(work_dir: &Path) -> anyhow::Result<()> {
    if tokio::fs::try_exists(work_dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(work_dir)
            .await
            .with_context(|| format!("Failed to remove {}", work_dir.display()))?;
    }
    tokio::fs::create_dir_all(work_dir)
        .await
        .with_context(|| format!("Failed to create {}", work_dir.display()))
}

/// What happened to the final report.
#[derive(Debug)]
pub enum Publication {
    /// No results site is configured.
    NotConfigured,
    /// The site accepted the report.
    Accepted,
    /// Submission failed.
    Failed(crate::site::SiteError),
}

impl Publication {
    /// Process exit code: 1 if a configured submission failed, else 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            Publication::NotConfigured | Publication::Accepted => 0,
            Publication::Failed(_) => 1,
        }
    }
}

/// Submits `report` to `sink`, if there is one.
pub async fn publish<S>(sink: Option<&S>, secret: &str, report: &CompatReport) -> Publication
where
    S: ReportSink + ?Sized,
{
    let Some(sink) = sink else {
        warn!("No results site configured, not posting");
        return Publication::NotConfigured;
    };

    info!("Posting {} results", report.entries.len());
    match sink.submit(secret, &report.entries).await {
        Ok(()) => {
            info!("Results posted");
            Publication::Accepted
        }
        Err(e) => {
            error!("Failed to post results: {}", e);
            Publication::Failed(e)
        }
    }
}
