//! Progress and result reporting.
//!
//! Reporters receive events as the run progresses: once at start with the
//! number of plugins, once per completed job, and once with the final
//! sorted report.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use crate::orchestrator::{CompatReport, ReportEntry, ReportStatus, RunSummary};
use crate::outcome::{JobOutcome, JobStatus};

/// Width of the `=` rules framing each block.
const RULE_WIDTH: usize = 60;

/// Column at which the status is printed in the summary table.
const TABLE_WIDTH: usize = 50;

/// A reporter receives events during a compatibility run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called before any job starts.
    async fn on_run_start(&self, total: usize);

    /// Called as each job finishes, in completion order.
    async fn on_job_complete(&self, outcome: &JobOutcome);

    /// Called with the final report.
    async fn on_run_complete(&self, report: &CompatReport);
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_run_start(&self, _total: usize) {}
    async fn on_job_complete(&self, _outcome: &JobOutcome) {}
    async fn on_run_complete(&self, _report: &CompatReport) {}
}

/// A reporter that combines multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    /// Create a new multi-reporter.
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Add a reporter to the multi-reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_run_start(&self, total: usize) {
        for reporter in &self.reporters {
            reporter.on_run_start(total).await;
        }
    }

    async fn on_job_complete(&self, outcome: &JobOutcome) {
        for reporter in &self.reporters {
            reporter.on_job_complete(outcome).await;
        }
    }

    async fn on_run_complete(&self, report: &CompatReport) {
        for reporter in &self.reporters {
            reporter.on_run_complete(report).await;
        }
    }
}

/// Formats the progress block printed when a job completes.
///
/// ```text
/// ============================================================
/// pytest-foo-1.0
/// -> tox returned 0
/// -> status: PASSED
/// -> time: 12.3 seconds
/// ```
pub fn format_outcome(outcome: &JobOutcome) -> String {
    outcome_block(outcome, outcome.status())
}

fn outcome_block(outcome: &JobOutcome, status: impl fmt::Display) -> String {
    format!(
        "{}\n{}\n-> tox returned {}\n-> status: {}\n-> time: {:.1} seconds",
        "=".repeat(RULE_WIDTH),
        outcome.spec(),
        outcome.status_code(),
        status,
        outcome.elapsed().as_secs_f64()
    )
}

/// Formats a duration as `{m}m {ss}s`.
pub fn format_elapsed(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}m {:02}s", secs / 60, secs % 60)
}

/// Formats the summary header.
pub fn format_summary(summary: &RunSummary) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    format!(
        "{rule}\nSummary\nTime: {}\nSkipped: {}\nRun: {}\n{rule}",
        format_elapsed(summary.duration),
        summary.skipped,
        summary.run,
    )
}

/// Formats one summary table row: `name-version`, padded, then `ok`/`fail`.
pub fn format_row(entry: &ReportEntry) -> String {
    table_row(entry, entry.status)
}

fn table_row(entry: &ReportEntry, status: impl fmt::Display) -> String {
    format!("{:<width$}{}", entry.package(), status, width = TABLE_WIDTH)
}

/// Console reporter with a progress bar and the summary table.
pub struct ConsoleReporter {
    progress: std::sync::Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    /// Create a new console reporter.
    ///
    /// When `verbose` is set, the captured output of failed jobs is printed
    /// after the table.
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: std::sync::Mutex::new(None),
            verbose,
        }
    }

    fn print(&self, text: &str) {
        let progress = self
            .progress
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().cloned());
        match progress {
            Some(pb) => pb.suspend(|| println!("{}", text)),
            None => println!("{}", text),
        }
    }
}

fn styled_label(status: JobStatus) -> console::StyledObject<&'static str> {
    let label = console::style(status.label());
    match status {
        JobStatus::Passed => label.green(),
        JobStatus::Failed => label.red(),
        JobStatus::Error => label.red().bold(),
        JobStatus::NoSource | JobStatus::Skipped => label.yellow(),
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_run_start(&self, total: usize) {
        println!("Processing {} packages", total);

        let pb = indicatif::ProgressBar::new(total as u64);
        let style = indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);

        if let Ok(mut progress) = self.progress.lock() {
            *progress = Some(pb);
        }
    }

    async fn on_job_complete(&self, outcome: &JobOutcome) {
        self.print(&outcome_block(outcome, styled_label(outcome.status())));

        if let Ok(progress) = self.progress.lock()
            && let Some(pb) = progress.as_ref()
        {
            pb.inc(1);
        }
    }

    async fn on_run_complete(&self, report: &CompatReport) {
        if let Ok(mut progress) = self.progress.lock()
            && let Some(pb) = progress.take()
        {
            pb.finish_and_clear();
        }

        println!("\n\n");
        println!("{}", format_summary(&report.summary));
        for entry in &report.entries {
            let status = match entry.status {
                ReportStatus::Ok => console::style(entry.status.as_str()).green(),
                ReportStatus::Fail => console::style(entry.status.as_str()).red(),
            };
            println!("{}", table_row(entry, status));
        }

        if self.verbose {
            for entry in report.entries.iter().filter(|e| e.status == ReportStatus::Fail) {
                println!();
                println!("{}", console::style(entry.package()).red().bold());
                for line in entry.output.lines() {
                    println!("    {}", line);
                }
            }
        }
    }
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    generated_at: String,
    summary: &'a RunSummary,
    entries: &'a [ReportEntry],
}

/// Writes the final report as JSON.
pub struct JsonReporter {
    path: PathBuf,
}

impl JsonReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn write(&self, report: &CompatReport) -> anyhow::Result<()> {
        let document = JsonDocument {
            generated_at: chrono::Utc::now().to_rfc3339(),
            summary: &report.summary,
            entries: &report.entries,
        };
        let json = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl Reporter for JsonReporter {
    async fn on_run_start(&self, _total: usize) {}

    async fn on_job_complete(&self, _outcome: &JobOutcome) {}

    async fn on_run_complete(&self, report: &CompatReport) {
        match self.write(report).await {
            Ok(()) => info!("Report written to {}", self.path.display()),
            Err(e) => error!("Failed to write report to {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use crate::index::PluginSpec;
    use crate::orchestrator::ResultAggregator;
    use crate::outcome::{RunStatus, classify};

    fn passed(name: &str) -> JobOutcome {
        classify(
            PluginSpec::new(name, "1.0", ""),
            RunStatus::Completed {
                exit_code: 0,
                output: "ok".to_string(),
            },
            Duration::from_millis(12_340),
        )
    }

    fn report() -> CompatReport {
        let mut aggregator = ResultAggregator::new("py311", "8.2.0", 3);
        aggregator.record(&passed("pytest-b"));
        aggregator.record(&classify(
            PluginSpec::new("pytest-a", "0.3", ""),
            RunStatus::TimedOut,
            Duration::from_secs(300),
        ));
        aggregator.finish()
    }

    #[test]
    fn test_format_outcome() {
        let block = format_outcome(&passed("pytest-foo"));
        let lines: Vec<&str> = block.lines().collect();

        assert_eq!(lines[0], "=".repeat(60));
        assert_eq!(lines[1], "pytest-foo-1.0");
        assert_eq!(lines[2], "-> tox returned 0");
        assert_eq!(lines[3], "-> status: PASSED");
        assert_eq!(lines[4], "-> time: 12.3 seconds");
    }

    #[test]
    fn test_format_outcome_error_code() {
        let outcome = JobOutcome::error(
            PluginSpec::new("pytest-x", "2.0", ""),
            &anyhow::anyhow!("boom"),
            Duration::ZERO,
        );
        let block = format_outcome(&outcome);
        assert!(block.contains("-> tox returned error"));
        assert!(block.contains("-> status: ERROR"));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0m 00s");
        assert_eq!(format_elapsed(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_elapsed(Duration::from_secs(3600)), "60m 00s");
    }

    #[test]
    fn test_format_summary_and_rows() {
        let report = report();

        let summary = format_summary(&report.summary);
        assert!(summary.contains("\nSummary\n"));
        assert!(summary.contains("\nSkipped: 1\n"));
        assert!(summary.contains("\nRun: 2\n"));

        let rows: Vec<String> = report.entries.iter().map(format_row).collect();
        assert_eq!(rows[0], format!("{:<50}fail", "pytest-a-0.3"));
        assert_eq!(rows[1], format!("{:<50}ok", "pytest-b-1.0"));
        assert_eq!(rows[1].len(), 52);
    }

    #[tokio::test]
    async fn test_json_reporter_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out").join("report.json");
        let reporter = JsonReporter::new(&path);

        reporter.on_run_complete(&report()).await;

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["summary"]["total"], 3);
        assert_eq!(json["summary"]["run"], 2);
        assert_eq!(json["entries"][0]["name"], "pytest-a");
        assert_eq!(json["entries"][0]["status"], "fail");
        assert!(json["generated_at"].is_string());
    }

    struct CountingReporter {
        events: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Reporter for CountingReporter {
        async fn on_run_start(&self, total: usize) {
            self.events.fetch_add(total, Ordering::SeqCst);
        }
        async fn on_job_complete(&self, _outcome: &JobOutcome) {
            self.events.fetch_add(10, Ordering::SeqCst);
        }
        async fn on_run_complete(&self, _report: &CompatReport) {
            self.events.fetch_add(100, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_multi_reporter_forwards() {
        let events = Arc::new(AtomicUsize::new(0));
        let multi = MultiReporter::new()
            .with_reporter(CountingReporter {
                events: Arc::clone(&events),
            })
            .with_reporter(NullReporter)
            .with_reporter(CountingReporter {
                events: Arc::clone(&events),
            });

        multi.on_run_start(1).await;
        multi.on_job_complete(&passed("pytest-foo")).await;
        multi.on_run_complete(&report()).await;

        assert_eq!(events.load(Ordering::SeqCst), 2 * (1 + 10 + 100));
    }
}
