//! Configuration loading and schema definitions for plugincompat.
//!
//! Settings come from two places: an optional TOML file (worker count,
//! timeouts, package index, runner) and the process environment, which
//! carries the pytest version under test, the submission secret and the
//! optional results site.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Environment variable holding the pytest version to force into tox.
pub const PYTEST_VERSION_VAR: &str = "PYTEST_VERSION";

/// Environment variable holding the secret sent along with the results.
pub const POST_KEY_VAR: &str = "POST_KEY";

/// Environment variable holding the base URL of the results site.
pub const SITE_VAR: &str = "PLUGINCOMPAT_SITE";

/// Errors raised while assembling the run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("Required environment variable ${0} is not set")]
    MissingEnv(&'static str),

    /// The env tag could not be determined from the local interpreter.
    #[error("Failed to detect env tag: {0}")]
    EnvTagDetection(String),
}

/// Loads plugincompat configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not match the schema.
///
/// # Example
///
/// ```no_run
/// use plugincompat::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("plugincompat.toml"))?;
/// println!("Max parallel: {}", config.compat.max_parallel);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from `path`, falling back to defaults when the file
/// does not exist.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

/// Loads plugincompat configuration from a TOML string.
///
/// # Example
///
/// ```
/// use plugincompat::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [compat]
///     max_parallel = 4
/// "#)?;
///
/// assert_eq!(config.compat.max_parallel, 4);
/// assert_eq!(config.compat.run_timeout_secs, 300);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Values read from the process environment.
#[derive(Debug, Clone)]
pub struct Environment {
    /// pytest version forced into every tox run.
    pub pytest_version: String,

    /// Secret included in the submitted results.
    pub secret: String,

    /// Base URL of the results site, if results should be checked and posted.
    pub site: Option<String>,
}

impl Environment {
    /// Reads the environment of the current process.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the environment from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let pytest_version =
            get(PYTEST_VERSION_VAR).ok_or(ConfigError::MissingEnv(PYTEST_VERSION_VAR))?;
        let secret = get(POST_KEY_VAR).ok_or(ConfigError::MissingEnv(POST_KEY_VAR))?;
        let site = get(SITE_VAR);

        Ok(Self {
            pytest_version,
            secret,
            site,
        })
    }
}

/// Returns the env tag (`py{major}{minor}`) of the local `python3`.
///
/// Used when `compat.env` is not configured.
pub async fn detect_env_tag(python: &str) -> Result<String, ConfigError> {
    let output = tokio::process::Command::new(python)
        .arg("-c")
        .arg("import sys; print('py%d%d' % sys.version_info[:2])")
        .output()
        .await
        .map_err(|e| ConfigError::EnvTagDetection(format!("{}: {}", python, e)))?;

    if !output.status.success() {
        return Err(ConfigError::EnvTagDetection(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let tag = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if tag.is_empty() {
        return Err(ConfigError::EnvTagDetection("empty output".to_string()));
    }
    Ok(tag)
}
