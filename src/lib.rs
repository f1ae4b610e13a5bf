//! plugincompat: checks third-party pytest plugins against a pytest release.
//!
//! Every plugin listed in the index is downloaded from the package index,
//! unpacked and exercised under tox with pytest pinned to the requested
//! version. Jobs run on a bounded worker pool; their outcomes are collected
//! into a sorted report that can be posted to a results site.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Index**: The plugins to check ([`index::PluginSpec`])
//! - **Package**: Release lookup, download and unpacking (PyPI, sdist archives)
//! - **Runner**: The isolated test runner (tox) with a forced pytest version
//! - **Orchestrator**: Job pipeline, worker pool and result aggregation
//! - **Report**: Console/JSON reporters and the results site client
//!
//! # Example
//!
//! ```no_run
//! use plugincompat::config::load_config;
//! use plugincompat::index::read_plugins_index;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("plugincompat.toml"))?;
//!     let plugins = read_plugins_index(&config.compat.index_file)?;
//!     // ... set up the package index, runner and reporter ...
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod gate;
pub mod index;
pub mod orchestrator;
pub mod outcome;
pub mod package;
pub mod report;
pub mod runner;
pub mod site;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::{Config, Environment, load_config};
pub use gate::SingleResourceGate;
pub use index::PluginSpec;
pub use orchestrator::{Orchestrator, RunResult};
pub use outcome::{JobOutcome, JobStatus, StatusCode};
pub use report::Reporter;
