//! External process execution with a hard timeout.
//!
//! Phase jobs never spawn subprocesses directly; they go through the
//! [`ProcessRunner`] trait so tests can substitute a fake that drives the
//! database the way the real scraper would.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

/// Stderr kept for error reporting is capped at this many bytes.
const STDERR_CAP: usize = 8 * 1024;

/// Stdout retained in the result (full output still streams to the caller).
const STDOUT_CAP: usize = 64 * 1024;

/// Command line + environment for one subprocess invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.cwd = Some(path.into());
        self
    }

    /// Render for logs: program followed by its arguments.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Result of a completed (not timed-out) subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process timed out after {after:?}")]
    TimedOut { after: Duration, stderr: String },
    #[error("io error while monitoring process: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs a command to completion under a hard timeout.
///
/// Each stdout line is forwarded over `output_tx` as it arrives so the
/// caller can track subprocess liveness while it runs. The sender is dropped
/// when the stream ends.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        spec: CommandSpec,
        timeout: Duration,
        output_tx: Option<UnboundedSender<String>>,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// Production runner backed by `tokio::process`.
pub struct ScraperProcess;

#[async_trait]
impl ProcessRunner for ScraperProcess {
    async fn run(
        &self,
        spec: CommandSpec,
        timeout: Duration,
        output_tx: Option<UnboundedSender<String>>,
    ) -> Result<ProcessOutput, ProcessError> {
        let started = Instant::now();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.envs {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Io(std::io::Error::other("child stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::Io(std::io::Error::other("child stderr not captured")))?;

        // Both pipes must be drained concurrently with wait(), otherwise a
        // chatty child can block on a full pipe and never exit.
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(tx) = &output_tx {
                    let _ = tx.send(line.clone());
                }
                if collected.len() < STDOUT_CAP {
                    collected.push_str(&line);
                    collected.push('\n');
                }
            }
            collected
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf).await;
            buf
        });

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(waited) => waited?,
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stdout_task.abort();
                let stderr = stderr_task.await.unwrap_or_default();
                return Err(ProcessError::TimedOut {
                    after: timeout,
                    stderr: truncate_output(stderr, STDERR_CAP),
                });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr: truncate_output(stderr, STDERR_CAP),
            duration: started.elapsed(),
        })
    }
}

/// Truncate at a char boundary, marking the cut.
pub fn truncate_output(mut text: String, cap: usize) -> String {
    if text.len() <= cap {
        return text;
    }
    let mut cut = cap;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("… [truncated]");
    text
}
