//! Collects job outcomes into the final, sorted report.
//!
//! Outcomes arrive in completion order. The aggregator keeps reported ones
//! in a map keyed by `(name, version)` so the report comes out sorted no
//! matter which job finished first. Only the task draining the outcome
//! stream touches the map.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize, Serializer};

use crate::outcome::{JobOutcome, StatusCode};

/// Pass/fail verdict as stored by the results site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// tox exited with code zero.
    Ok,
    /// Anything else.
    Fail,
}

impl ReportStatus {
    /// `Ok` for exit code zero, `Fail` otherwise.
    pub fn from_code(code: StatusCode) -> Self {
        if code.is_success() {
            ReportStatus::Ok
        } else {
            ReportStatus::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Ok => "ok",
            ReportStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the report, in the shape the results site accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub name: String,
    pub version: String,
    /// tox environment, e.g. `py311`.
    pub env: String,
    /// pytest version the plugin was checked against.
    pub pytest: String,
    pub status: ReportStatus,
    /// Captured runner output with the elapsed time appended.
    pub output: String,
    pub description: String,
}

impl ReportEntry {
    /// `name-version`, as printed in the summary table.
    pub fn package(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// Run-level counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Plugins submitted.
    pub total: usize,
    /// Plugins that appear in the report.
    pub run: usize,
    /// `total - run`: skipped by the site or without a source distribution.
    pub skipped: usize,
    /// Reported entries with status `ok`.
    pub passed: usize,
    /// Reported entries with status `fail`.
    pub failed: usize,
    /// Wall-clock time of the whole run.
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// The sorted report plus its summary.
#[derive(Debug, Clone, Serialize)]
pub struct CompatReport {
    pub entries: Vec<ReportEntry>,
    pub summary: RunSummary,
}

impl CompatReport {
    /// Returns `true` if every reported entry passed.
    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }
}

#[derive(Debug)]
struct Retained {
    status_code: StatusCode,
    output: String,
    description: String,
}

/// Accumulates outcomes as they complete.
#[derive(Debug)]
pub struct ResultAggregator {
    env: String,
    pytest_version: String,
    total: usize,
    started: Instant,
    results: BTreeMap<(String, String), Retained>,
}

impl ResultAggregator {
    /// Creates an aggregator for a run of `total` plugins.
    pub fn new(env: impl Into<String>, pytest_version: impl Into<String>, total: usize) -> Self {
        Self {
            env: env.into(),
            pytest_version: pytest_version.into(),
            total,
            started: Instant::now(),
            results: BTreeMap::new(),
        }
    }

    /// Records one outcome. Outcomes that are not reported are only counted
    /// implicitly, as the difference between total and retained.
    pub fn record(&mut self, outcome: &JobOutcome) {
        if !outcome.is_reported() {
            return;
        }
        self.results.insert(
            outcome.spec().key(),
            Retained {
                status_code: outcome.status_code(),
                output: outcome.output().to_string(),
                description: outcome.spec().description.clone(),
            },
        );
    }

    /// Number of outcomes retained so far.
    pub fn retained(&self) -> usize {
        self.results.len()
    }

    /// Builds the sorted report.
    pub fn finish(self) -> CompatReport {
        let duration = self.started.elapsed();
        let run = self.results.len();

        let entries: Vec<ReportEntry> = self
            .results
            .into_iter()
            .map(|((name, version), retained)| ReportEntry {
                name,
                version,
                env: self.env.clone(),
                pytest: self.pytest_version.clone(),
                status: ReportStatus::from_code(retained.status_code),
                output: retained.output,
                description: retained.description,
            })
            .collect();

        let passed = entries
            .iter()
            .filter(|e| e.status == ReportStatus::Ok)
            .count();

        CompatReport {
            summary: RunSummary {
                total: self.total,
                run,
                skipped: self.total.saturating_sub(run),
                passed,
                failed: run - passed,
                duration,
            },
            entries,
        }
    }
}
