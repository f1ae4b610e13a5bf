//! tox-based isolated runner.
//!
//! Runs `{program} --result-json={result_file} -e {env} --force-dep=pytest=={version}`
//! through the configured shell inside the unpacked plugin directory. Plugins
//! that ship without a `tox.ini` get a placeholder one that installs pytest
//! and only checks that `py.test --help` still works with the plugin loaded.
//!
//! The shell `exec`s the program, so tox is our direct child. On Unix it
//! leads its own process group, and cancelling a run kills the whole group:
//! tox and whatever it started (pip, virtualenv builds, pytest).
//!
//! Output is read as raw bytes; lines that are not valid UTF-8 are decoded
//! lossily rather than dropped.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio_stream::wrappers::SplitStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Command, IsolatedRunner, OutputLine, RunOutput, RunnerError, RunnerResult};
use crate::config::RunnerConfig;

/// Written as `tox.ini` when a plugin has none.
pub const PLACEHOLDER_TOX: &str = "[tox]\n\n[testenv]\ndeps=pytest\ncommands=\n    py.test --help\n";

/// Writes [`PLACEHOLDER_TOX`] into `directory` unless a `tox.ini` exists.
///
/// Returns `true` if the placeholder was written.
pub async fn ensure_tox_ini(directory: &Path) -> std::io::Result<bool> {
    let path = directory.join("tox.ini");
    if tokio::fs::try_exists(&path).await? {
        return Ok(false);
    }
    tokio::fs::write(&path, PLACEHOLDER_TOX).await?;
    Ok(true)
}

/// Runs a plugin's tox environment against a pinned pytest version.
pub struct ToxRunner {
    config: RunnerConfig,
    program: Vec<String>,
    env: String,
    pytest_version: String,
}

impl ToxRunner {
    /// Creates a runner for the tox environment `env`.
    ///
    /// # Errors
    ///
    /// [`RunnerError::InvalidCommand`] if `config.program` is empty or not
    /// valid shell syntax.
    pub fn new(
        config: RunnerConfig,
        env: impl Into<String>,
        pytest_version: impl Into<String>,
    ) -> RunnerResult<Self> {
        let program = shell_words::split(&config.program)
            .map_err(|e| RunnerError::InvalidCommand(format!("{}: {}", config.program, e)))?;
        if program.is_empty() {
            return Err(RunnerError::InvalidCommand("runner program is empty".to_string()));
        }

        Ok(Self {
            config,
            program,
            env: env.into(),
            pytest_version: pytest_version.into(),
        })
    }

    /// The command run inside `directory`.
    pub fn command(&self, directory: &Path) -> Command {
        Command::new(&self.program[0])
            .args(self.program[1..].iter().cloned())
            .arg(format!("--result-json={}", self.config.result_file))
            .args(["-e", self.env.as_str()])
            .arg(format!("--force-dep=pytest=={}", self.pytest_version))
            .working_dir(directory.to_string_lossy())
    }

    fn spawn(&self, cmd: &Command) -> RunnerResult<Child> {
        let mut process = tokio::process::Command::new(&self.config.shell);
        process
            .arg("-c")
            .arg(format!("exec {}", cmd.to_shell_string()));
        if let Some(dir) = &cmd.working_dir {
            process.current_dir(dir);
        }
        process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        process.process_group(0);

        process
            .spawn()
            .map_err(|e| RunnerError::ExecFailed(format!("{}: {}", self.config.shell, e)))
    }
}

/// The process group led by a spawned runner.
///
/// Killed when dropped, so abandoning a run future (e.g. after the caller's
/// grace period) does not leave tox's children behind. `child` must be
/// declared before the group so the group is signalled before the leader is
/// reaped.
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { leader: child.id() }
    }

    fn kill(&mut self) {
        if let Some(leader) = self.leader.take() {
            kill_group(leader);
        }
    }

    /// Forgets the group once the leader has been reaped; its id may be
    /// reused from then on.
    fn disarm(&mut self) {
        self.leader = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(leader: u32) {
    let Ok(pgid) = libc::pid_t::try_from(leader) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!("Failed to kill process group {}: {}", leader, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_leader: u32) {}

async fn kill(child: &mut Child, group: &mut ProcessGroup) {
    group.kill();
    if let Err(e) = child.start_kill() {
        debug!("Failed to signal runner process: {}", e);
    }
    let _ = child.wait().await;
}

/// Raw `\n`-separated lines; a read error ends the stream.
fn raw_lines<R>(reader: R) -> impl Stream<Item = Vec<u8>> + Send + Unpin
where
    R: AsyncRead + Send + Unpin,
{
    SplitStream::new(BufReader::new(reader).split(b'\n'))
        .take_while(|line| future::ready(line.is_ok()))
        .filter_map(|line| future::ready(line.ok()))
}

/// Decodes one output line, replacing invalid UTF-8 and dropping a `\r`
/// left by CRLF endings.
fn decode_line(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    match String::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

#[async_trait]
impl IsolatedRunner for ToxRunner {
    async fn run(&self, directory: &Path, cancel: CancellationToken) -> RunnerResult<RunOutput> {
        let start = Instant::now();

        if ensure_tox_ini(directory).await? {
            debug!("No tox.ini in {}, wrote placeholder", directory.display());
        }

        let cmd = self.command(directory);
        debug!("Running in {}: {}", directory.display(), cmd.to_shell_string());

        let mut child = self.spawn(&cmd)?;
        let mut group = ProcessGroup::of(&child);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::ExecFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::ExecFailed("stderr not captured".to_string()))?;

        let stdout_stream = raw_lines(stdout).map(|raw| OutputLine::Stdout(decode_line(raw)));
        let stderr_stream = raw_lines(stderr).map(|raw| OutputLine::Stderr(decode_line(raw)));
        let mut lines = stream::select(stdout_stream, stderr_stream);

        let mut output = Vec::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                line = lines.next() => Some(line),
            };
            match next {
                None => {
                    debug!("Cancelling run in {}", directory.display());
                    kill(&mut child, &mut group).await;
                    return Err(RunnerError::Cancelled);
                }
                Some(Some(line)) => {
                    trace!("[{}] {}", line.stream(), line.text());
                    output.push(line.into_text());
                }
                Some(None) => break,
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status?),
        };
        let Some(status) = status else {
            kill(&mut child, &mut group).await;
            return Err(RunnerError::Cancelled);
        };
        group.disarm();

        Ok(RunOutput {
            exit_code: status.code().unwrap_or(-1),
            output: output.join("\n"),
            duration: start.elapsed(),
        })
    }

    fn name(&self) -> &str {
        &self.program[0]
    }
}
