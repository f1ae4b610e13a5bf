//! Job outcomes and their classification.
//!
//! Every plugin produces exactly one [`JobOutcome`]. Outcomes are built by
//! constructors that keep the status label and the status code consistent:
//!
//! | Status | Code | Output |
//! |--------|------|--------|
//! | `SKIPPED` | `0` | `Skipped` |
//! | `PASSED` | `0` | runner output + elapsed time |
//! | `FAILED` | nonzero | runner output (or `tox run timed out`) + elapsed time |
//! | `NO SOURCE` | `1` | `No sdist found` |
//! | `ERROR` | `error` | `traceback:` + error chain + elapsed time |
//!
//! The runner stage reports a structured [`RunStatus`]; [`classify`] turns it
//! into an outcome without any error propagation.

use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::index::PluginSpec;

/// Output recorded for a plugin that has no source distribution.
pub const NO_SOURCE_MESSAGE: &str = "No sdist found";

/// Output recorded when the test run exceeded its deadline.
pub const TIMED_OUT_MESSAGE: &str = "tox run timed out";

/// Exit status of a job: the runner's exit code, or the error sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Exit code reported by the runner (or a fixed code for synthetic results).
    Code(i32),
    /// The job crashed before producing an exit code.
    Error,
}

impl StatusCode {
    /// Returns `true` only for exit code zero.
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Code(0))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Code(code) => write!(f, "{}", code),
            StatusCode::Error => write!(f, "error"),
        }
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StatusCode::Code(code) => serializer.serialize_i32(*code),
            StatusCode::Error => serializer.serialize_str("error"),
        }
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// The results site already has a result for this plugin.
    Skipped,
    /// tox exited with code zero.
    Passed,
    /// tox exited nonzero or timed out.
    Failed,
    /// The release has no source distribution.
    NoSource,
    /// The job crashed.
    Error,
}

impl JobStatus {
    /// Label printed in progress lines.
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Skipped => "SKIPPED",
            JobStatus::Passed => "PASSED",
            JobStatus::Failed => "FAILED",
            JobStatus::NoSource => "NO SOURCE",
            JobStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the runner stage of a job produced.
#[derive(Debug, Clone)]
pub enum RunStatus {
    /// The runner exited on its own.
    Completed {
        /// Exit code of the runner.
        exit_code: i32,
        /// Combined stdout/stderr.
        output: String,
    },
    /// The deadline expired and the run was cancelled.
    TimedOut,
    /// Anything else went wrong; carries the formatted error chain.
    Crashed(String),
}

/// The classified result of checking one plugin.
///
/// Fields are private so that status and code can only be combined through
/// the constructors below.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    spec: PluginSpec,
    status_code: StatusCode,
    status: JobStatus,
    output: String,
    elapsed: Duration,
}

impl JobOutcome {
    /// Outcome for a plugin the results site already knows about.
    pub fn skipped(spec: PluginSpec, elapsed: Duration) -> Self {
        Self {
            spec,
            status_code: StatusCode::Code(0),
            status: JobStatus::Skipped,
            output: "Skipped".to_string(),
            elapsed,
        }
    }

    /// Outcome for a release without a source distribution.
    pub fn no_source(spec: PluginSpec, elapsed: Duration) -> Self {
        Self {
            spec,
            status_code: StatusCode::Code(1),
            status: JobStatus::NoSource,
            output: NO_SOURCE_MESSAGE.to_string(),
            elapsed,
        }
    }

    /// Outcome for a job that failed outside of the runner itself.
    ///
    /// Equivalent to classifying a [`RunStatus::Crashed`].
    pub fn error(spec: PluginSpec, error: &anyhow::Error, elapsed: Duration) -> Self {
        classify(spec, RunStatus::Crashed(format!("{:?}", error)), elapsed)
    }

    /// The plugin this outcome belongs to.
    pub fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    /// Runner exit code or the error sentinel.
    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    /// Terminal status.
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Captured output, verbatim.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Time from job acceptance to classification.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Whether this outcome takes part in the pass/fail report.
    ///
    /// Skipped plugins and releases without an sdist are only counted in
    /// the "skipped" summary.
    pub fn is_reported(&self) -> bool {
        !matches!(self.status, JobStatus::Skipped | JobStatus::NoSource)
    }
}

/// Turns the result of the runner stage into an outcome.
///
/// Appends `Time: N.N seconds` to the output. Exit code zero is the only way
/// to reach [`JobStatus::Passed`].
pub fn classify(spec: PluginSpec, run: RunStatus, elapsed: Duration) -> JobOutcome {
    let (status_code, mut output) = match run {
        RunStatus::Completed { exit_code, output } => (StatusCode::Code(exit_code), output),
        RunStatus::TimedOut => (StatusCode::Code(1), TIMED_OUT_MESSAGE.to_string()),
        RunStatus::Crashed(trace) => (StatusCode::Error, format!("traceback:\n{}", trace)),
    };

    output.push_str(&format!("\n\nTime: {:.1} seconds", elapsed.as_secs_f64()));

    let status = match status_code {
        StatusCode::Code(0) => JobStatus::Passed,
        StatusCode::Code(_) => JobStatus::Failed,
        StatusCode::Error => JobStatus::Error,
    };

    JobOutcome {
        spec,
        status_code,
        status,
        output,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PluginSpec {
        PluginSpec::new("pytest-foo", "1.0", "d1")
    }

    #[test]
    fn test_classify_exit_zero_passes() {
        let outcome = classify(
            spec(),
            RunStatus::Completed {
                exit_code: 0,
                output: "congratulations :)".to_string(),
            },
            Duration::from_millis(2500),
        );

        assert_eq!(outcome.status(), JobStatus::Passed);
        assert_eq!(outcome.status_code(), StatusCode::Code(0));
        assert!(outcome.output().starts_with("congratulations :)"));
        assert!(outcome.output().ends_with("\n\nTime: 2.5 seconds"));
    }

    #[test]
    fn test_classify_nonzero_fails() {
        for code in [1, 2, -1, 127] {
            let outcome = classify(
                spec(),
                RunStatus::Completed {
                    exit_code: code,
                    output: String::new(),
                },
                Duration::ZERO,
            );
            assert_eq!(outcome.status(), JobStatus::Failed);
            assert_eq!(outcome.status_code(), StatusCode::Code(code));
        }
    }

    #[test]
    fn test_classify_timeout() {
        let outcome = classify(spec(), RunStatus::TimedOut, Duration::from_secs(300));

        assert_eq!(outcome.status(), JobStatus::Failed);
        assert_eq!(outcome.status_code(), StatusCode::Code(1));
        assert!(outcome.output().contains("timed out"));
        assert_eq!(outcome.elapsed(), Duration::from_secs(300));
    }

    #[test]
    fn test_classify_crash() {
        let outcome = classify(
            spec(),
            RunStatus::Crashed("boom\n\nCaused by:\n    disk full".to_string()),
            Duration::ZERO,
        );

        assert_eq!(outcome.status(), JobStatus::Error);
        assert_eq!(outcome.status_code(), StatusCode::Error);
        assert!(outcome.output().starts_with("traceback:\nboom"));
        assert!(outcome.output().contains("disk full"));
    }

    #[test]
    fn test_error_keeps_context_chain() {
        let err = anyhow::anyhow!("disk full").context("Failed to unpack");
        let outcome = JobOutcome::error(spec(), &err, Duration::ZERO);

        assert_eq!(outcome.status(), JobStatus::Error);
        assert!(outcome.output().contains("Failed to unpack"));
        assert!(outcome.output().contains("disk full"));
    }

    #[test]
    fn test_no_source() {
        let outcome = JobOutcome::no_source(spec(), Duration::from_secs(1));

        assert_eq!(outcome.status(), JobStatus::NoSource);
        assert_eq!(outcome.status_code(), StatusCode::Code(1));
        assert_eq!(outcome.output(), NO_SOURCE_MESSAGE);
        assert!(!outcome.is_reported());
    }

    #[test]
    fn test_skipped_not_reported() {
        let outcome = JobOutcome::skipped(spec(), Duration::from_millis(40));

        assert_eq!(outcome.status(), JobStatus::Skipped);
        assert!(!outcome.is_reported());
        assert_eq!(outcome.elapsed(), Duration::from_millis(40));
    }

    #[test]
    fn test_status_code_serialization() {
        assert_eq!(serde_json::to_string(&StatusCode::Code(0)).unwrap(), "0");
        assert_eq!(serde_json::to_string(&StatusCode::Code(3)).unwrap(), "3");
        assert_eq!(
            serde_json::to_string(&StatusCode::Error).unwrap(),
            "\"error\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::NoSource).unwrap(),
            "\"NO_SOURCE\""
        );
    }

    #[test]
    fn test_labels() {
        assert_eq!(JobStatus::NoSource.to_string(), "NO SOURCE");
        assert_eq!(StatusCode::Error.to_string(), "error");
        assert_eq!(StatusCode::Code(2).to_string(), "2");
    }
}
