//! plugincompat CLI - checks pytest plugins against a pytest release.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use plugincompat::config::{self, Config, Environment};
use plugincompat::index::read_plugins_index;
use plugincompat::orchestrator::{self, JobPipeline, Orchestrator, PipelineSettings};
use plugincompat::package::PyPiIndex;
use plugincompat::report::{ConsoleReporter, JsonReporter, MultiReporter};
use plugincompat::runner::tox::ToxRunner;
use plugincompat::site::SiteClient;

const DEFAULT_CONFIG_FILE: &str = "plugincompat.toml";

#[derive(Parser)]
#[command(name = "plugincompat")]
#[command(about = "Check pytest plugins against a pytest release", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every plugin in the index and post the results
    Run {
        /// Override the number of plugins checked at once
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Override the per-plugin tox timeout, in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Override the plugin index file
        #[arg(short, long)]
        index: Option<PathBuf>,

        /// Override the tox environment (e.g. py311)
        #[arg(short, long)]
        env: Option<String>,

        /// Also write the report as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            parallel,
            timeout,
            index,
            env,
            output,
        } => {
            let overrides = Overrides {
                parallel,
                timeout,
                index,
                env,
                output,
            };
            run(&cli.config, overrides, cli.verbose).await
        }
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(&cli.config),
    }
}

struct Overrides {
    parallel: Option<usize>,
    timeout: Option<u64>,
    index: Option<PathBuf>,
    env: Option<String>,
    output: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(parallel) = self.parallel {
            config.compat.max_parallel = parallel;
        }
        if let Some(timeout) = self.timeout {
            config.compat.run_timeout_secs = timeout;
        }
        if let Some(index) = self.index {
            config.compat.index_file = index;
        }
        if let Some(env) = self.env {
            config.compat.env = Some(env);
        }
        if let Some(output) = self.output {
            config.report.json_file = Some(output);
        }
    }
}

async fn run(config_path: &Path, overrides: Overrides, verbose: bool) -> Result<()> {
    let environment = Environment::from_env()?;

    let mut config = config::load_config_or_default(config_path)?;
    overrides.apply(&mut config);

    let env = match &config.compat.env {
        Some(env) => env.clone(),
        None => config::detect_env_tag(&config.compat.python).await?,
    };

    let plugins = read_plugins_index(&config.compat.index_file)?;
    info!(
        "Loaded {} plugins from {}",
        plugins.len(),
        config.compat.index_file.display()
    );

    let index = PyPiIndex::new(&config.package_index)
        .context("Failed to set up package index client")?;
    let runner = ToxRunner::new(config.runner.clone(), &env, &environment.pytest_version)?;
    let settings = PipelineSettings::new(&config.compat.work_dir, &env, &environment.pytest_version)
        .with_run_timeout(Duration::from_secs(config.compat.run_timeout_secs));

    let site = environment
        .site
        .as_deref()
        .map(|url| {
            SiteClient::new(
                url,
                Duration::from_secs(config.package_index.request_timeout_secs),
            )
        })
        .transpose()
        .context("Failed to set up results site client")?;

    let mut pipeline = JobPipeline::new(index, runner, settings);
    if let Some(site) = &site {
        info!("Using results site {}", site.base_url());
        pipeline = pipeline.with_skip_check(site.clone());
    }

    let reporter = create_reporter(&config, verbose);
    let orchestrator = Orchestrator::new(pipeline, config.compat.max_parallel, reporter);
    let result = orchestrator.run(plugins).await?;

    let publication =
        orchestrator::publish(site.as_ref(), &environment.secret, &result.report).await;
    std::process::exit(publication.exit_code());
}

fn validate_config(config_path: &Path) -> Result<()> {
    let loaded = if config_path.exists() {
        config::load_config(config_path)
    } else {
        println!(
            "{} not found, showing defaults",
            config_path.display()
        );
        Ok(Config::default())
    };

    match loaded {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Max parallel: {}", config.compat.max_parallel);
            println!("  Run timeout: {}s", config.compat.run_timeout_secs);
            println!("  Work dir: {}", config.compat.work_dir.display());
            println!("  Index file: {}", config.compat.index_file.display());
            println!(
                "  Env: {}",
                config.compat.env.as_deref().unwrap_or("(detected)")
            );
            println!("  Package index: {}", config.package_index.url);
            println!("  Runner: {} (via {})", config.runner.program, config.runner.shell);

            if let Some(path) = &config.report.json_file {
                println!("  JSON report: {}", path.display());
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
        std::process::exit(1);
    }

    let config = r#"# plugincompat configuration file

[compat]
max_parallel = 8
run_timeout_secs = 300
work_dir = ".work"
index_file = "index.json"
# env = "py311"       # detected from `python` when unset
python = "python3"

[package_index]
url = "https://pypi.org/pypi"
request_timeout_secs = 60

[runner]
program = "tox"
shell = "/bin/sh"
result_file = "result.json"

[report]
# json_file = "results.json"
"#;

    std::fs::write(path, config)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Set PYTEST_VERSION and POST_KEY (and optionally PLUGINCOMPAT_SITE), then run:");
    println!("  plugincompat run");

    Ok(())
}

fn create_reporter(config: &Config, verbose: bool) -> MultiReporter {
    let mut multi = MultiReporter::new().with_reporter(ConsoleReporter::new(verbose));

    if let Some(path) = &config.report.json_file {
        multi = multi.with_reporter(JsonReporter::new(path.clone()));
    }

    multi
}
