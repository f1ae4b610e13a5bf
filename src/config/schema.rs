//! Configuration schema definitions for plugincompat.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. Every section is optional; missing sections and
//! fields fall back to the defaults documented on each field.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── CompatConfig           - Core settings (parallelism, timeout, work dir)
//! ├── PackageIndexConfig     - Where release artifacts are resolved
//! ├── RunnerConfig           - How the isolated test runner is invoked
//! └── ReportConfig           - Local report output
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for plugincompat.
///
/// # TOML Structure
///
/// ```toml
/// [compat]
/// max_parallel = 8
/// run_timeout_secs = 300
///
/// [package_index]
/// url = "https://pypi.org/pypi"
///
/// [runner]
/// program = "tox"
///
/// [report]
/// json_file = "results.json"
/// ```
///
/// # Example
///
/// ```
/// use plugincompat::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [compat]
///     max_parallel = 2
///
///     [runner]
///     program = "python -m tox"
/// "#).unwrap();
///
/// assert_eq!(config.compat.max_parallel, 2);
/// assert_eq!(config.runner.shell, "/bin/sh");
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Core settings (parallelism, timeout, work directory).
    #[serde(default)]
    pub compat: CompatConfig,

    /// Package index used to resolve and download release artifacts.
    #[serde(default)]
    pub package_index: PackageIndexConfig,

    /// Isolated test runner invocation.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Local report output.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Core execution settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `max_parallel` | 8 |
/// | `run_timeout_secs` | 300 (5 minutes) |
/// | `work_dir` | `.work` |
/// | `index_file` | `index.json` |
/// | `env` | None (detected from `python`) |
/// | `python` | `python3` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompatConfig {
    /// Number of plugins checked at the same time.
    ///
    /// Balances download contention against the CPU and process overhead
    /// of concurrent tox runs.
    ///
    /// Default: 8
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Wall-clock limit for a single tox run, in seconds.
    ///
    /// A run exceeding it is killed and reported as failed.
    ///
    /// Default: 300 (5 minutes)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// Scratch directory for downloads and unpacked sources.
    ///
    /// Removed and recreated at the start of every run.
    ///
    /// Default: `.work`
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// JSON index listing the plugins to check.
    ///
    /// Default: `index.json`
    #[serde(default = "default_index_file")]
    pub index_file: PathBuf,

    /// tox environment / results tag, e.g. `py311`.
    ///
    /// When unset it is derived from the version of `python`.
    pub env: Option<String>,

    /// Interpreter used to derive the env tag.
    ///
    /// Default: `python3`
    #[serde(default = "default_python")]
    pub python: String,
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            run_timeout_secs: default_run_timeout(),
            work_dir: default_work_dir(),
            index_file: default_index_file(),
            env: None,
            python: default_python(),
        }
    }
}

fn default_max_parallel() -> usize {
    8
}

fn default_run_timeout() -> u64 {
    300 // 5 minutes
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".work")
}

fn default_index_file() -> PathBuf {
    PathBuf::from("index.json")
}

fn default_python() -> String {
    "python3".to_string()
}

/// Package index settings.
///
/// # Example
///
/// ```toml
/// [package_index]
/// url = "https://pypi.org/pypi"
/// request_timeout_secs = 60
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackageIndexConfig {
    /// Base URL of a PyPI-compatible JSON API.
    ///
    /// Release metadata is fetched from `{url}/{name}/{version}/json`.
    ///
    /// Default: `https://pypi.org/pypi`
    #[serde(default = "default_index_url")]
    pub url: String,

    /// Timeout for a single metadata request or download, in seconds.
    ///
    /// Default: 60
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for PackageIndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_index_url() -> String {
    "https://pypi.org/pypi".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// Isolated test runner settings.
///
/// The runner is invoked as
/// `{program} --result-json={result_file} -e {env} --force-dep=pytest=={version}`
/// through `{shell} -c` inside the unpacked plugin directory.
///
/// # Example
///
/// ```toml
/// [runner]
/// program = "python -m tox"
/// shell = "/bin/bash"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Command used to start tox. May contain arguments.
    ///
    /// Default: `tox`
    #[serde(default = "default_runner_program")]
    pub program: String,

    /// Shell used to run the command.
    ///
    /// Default: `/bin/sh`
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Result file tox writes inside the plugin directory.
    ///
    /// Default: `result.json`
    #[serde(default = "default_result_file")]
    pub result_file: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: default_runner_program(),
            shell: default_shell(),
            result_file: default_result_file(),
        }
    }
}

fn default_runner_program() -> String {
    "tox".to_string()
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_result_file() -> String {
    "result.json".to_string()
}

/// Local report output.
///
/// # Example
///
/// ```toml
/// [report]
/// json_file = "build/plugincompat.json"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Write the final report as JSON to this file.
    ///
    /// Default: not written
    pub json_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.compat.max_parallel, 8);
        assert_eq!(config.compat.run_timeout_secs, 300);
        assert_eq!(config.compat.work_dir, PathBuf::from(".work"));
        assert_eq!(config.compat.index_file, PathBuf::from("index.json"));
        assert!(config.compat.env.is_none());
        assert_eq!(config.package_index.url, "https://pypi.org/pypi");
        assert_eq!(config.runner.program, "tox");
        assert_eq!(config.runner.result_file, "result.json");
        assert!(config.report.json_file.is_none());
    }

    #[test]
    fn test_default_matches_empty_toml() {
        let parsed: Config = toml::from_str("").unwrap();
        let built = Config::default();

        assert_eq!(parsed.compat.max_parallel, built.compat.max_parallel);
        assert_eq!(parsed.compat.python, built.compat.python);
        assert_eq!(parsed.runner.shell, built.runner.shell);
        assert_eq!(
            parsed.package_index.request_timeout_secs,
            built.package_index.request_timeout_secs
        );
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [compat]
            run_timeout_secs = 30
            env = "py312"

            [report]
            json_file = "out/results.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.compat.run_timeout_secs, 30);
        assert_eq!(config.compat.max_parallel, 8);
        assert_eq!(config.compat.env.as_deref(), Some("py312"));
        assert_eq!(
            config.report.json_file,
            Some(PathBuf::from("out/results.json"))
        );
    }

    #[test]
    fn test_roundtrip_serialize() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.compat.work_dir, config.compat.work_dir);
    }
}
