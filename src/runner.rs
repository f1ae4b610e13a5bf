//! The isolated test runner and the commands it executes.
//!
//! A runner takes an unpacked plugin directory and runs the plugin's test
//! environment there, reporting the exit code and the combined output. The
//! built-in implementation is [`tox::ToxRunner`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      IsolatedRunner                          │
//! │                                                              │
//! │  run(dir, cancel) ──► spawn `{shell} -c "{command}"`         │
//! │                         │                                    │
//! │                         ├── stdout ─┐                        │
//! │                         └── stderr ─┴─► merged OutputLines   │
//! │                                           │                  │
//! │  cancel.cancelled() ──► kill child        ▼                  │
//! │                                       RunOutput              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deadlines are enforced by the caller: it cancels the token it passed to
//! [`IsolatedRunner::run`] and the runner kills the child process together
//! with everything it started.

pub mod tox;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur while running the isolated test environment.
///
/// A runner that starts and exits nonzero is NOT an error; that is reported
/// through [`RunOutput::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The configured command line could not be parsed.
    #[error("Invalid runner command: {0}")]
    InvalidCommand(String),

    /// The process could not be started or its output not captured.
    #[error("Failed to execute command: {0}")]
    ExecFailed(String),

    /// The run was cancelled and the process killed.
    #[error("Run cancelled")]
    Cancelled,

    /// I/O error while preparing the run directory.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A command to execute through the shell.
///
/// # Example
///
/// ```
/// use plugincompat::runner::Command;
///
/// let cmd = Command::new("tox")
///     .arg("-e")
///     .arg("py311")
///     .arg("--force-dep=pytest==8.2.0")
///     .working_dir("/work/pytest-foo-1.0");
///
/// assert_eq!(cmd.program, "tox");
/// assert_eq!(cmd.args.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct Command {
    /// The program/executable to run.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Working directory for command execution.
    pub working_dir: Option<String>,
}

impl Command {
    /// Creates a new command with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Adds a single argument to the command.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments to the command.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory for command execution.
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Converts the command to a shell-executable string.
    ///
    /// # Example
    ///
    /// ```
    /// use plugincompat::runner::Command;
    /// let cmd = Command::new("echo").arg("hello world");
    /// assert_eq!(cmd.to_shell_string(), "echo 'hello world'");
    /// ```
    pub fn to_shell_string(&self) -> String {
        let mut parts = vec![shell_escape(&self.program)];
        for arg in &self.args {
            parts.push(shell_escape(arg));
        }
        parts.join(" ")
    }
}

/// Escape a string for use in a shell command.
fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars().all(|c| {
            c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '=' | ':' | ',' | '+')
        })
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// A single line of output from a running command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    /// A line from standard output.
    Stdout(String),
    /// A line from standard error.
    Stderr(String),
}

impl OutputLine {
    /// The text of the line, regardless of stream.
    pub fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(s) | OutputLine::Stderr(s) => s,
        }
    }

    /// Consumes the line, returning its text.
    pub fn into_text(self) -> String {
        match self {
            OutputLine::Stdout(s) | OutputLine::Stderr(s) => s,
        }
    }

    /// Name of the stream the line came from.
    pub fn stream(&self) -> &'static str {
        match self {
            OutputLine::Stdout(_) => "stdout",
            OutputLine::Stderr(_) => "stderr",
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Exit code of the runner; `-1` if it was killed by a signal.
    pub exit_code: i32,

    /// Combined stdout and stderr, in arrival order.
    pub output: String,

    /// Wall-clock time the run took.
    pub duration: Duration,
}

impl RunOutput {
    /// Returns `true` if the runner exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a plugin's test environment in isolation.
///
/// # Cancellation
///
/// Implementations must watch `cancel` and, once it fires, terminate
/// whatever they started and return [`RunnerError::Cancelled`]. Dropping
/// the returned future must also not leave the child running.
#[async_trait]
pub trait IsolatedRunner: Send + Sync {
    /// Runs the test environment in `directory`.
    async fn run(&self, directory: &Path, cancel: CancellationToken) -> RunnerResult<RunOutput>;

    /// Name used in logs and progress lines.
    fn name(&self) -> &str;
}
