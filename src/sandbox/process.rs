//! Bounded subprocess execution.

use super::report::{REPORT_ENV, TestReport};
use crate::errors::SandboxError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    /// Cap applied to stdout and stderr independently
    pub max_output_bytes: usize,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl RunOptions {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
            cwd: None,
            env: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Structured report, if the command produced one
    pub report: Option<TestReport>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

/// Process-execution primitive consumed by the sandbox.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str, opts: &RunOptions) -> Result<ProcessOutput, SandboxError>;
}

/// Runs commands through `sh -c`.
///
/// The child runs in its own process group. When the timeout fires or either
/// stream exceeds the output cap the whole group is killed, so grandchildren
/// (test binaries, subshells) do not outlive the run. Each run gets a scratch file exported as `REMEDY_TEST_REPORT`;
/// if the command writes a report there it is returned alongside the output.
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str, opts: &RunOptions) -> Result<ProcessOutput, SandboxError> {
        let scratch = tempfile::tempdir()?;
        let report_path = scratch.path().join("report.json");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env(REPORT_ENV, &report_path)
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(ref cwd) = opts.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(SandboxError::Spawn)?;
        let pgid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = opts.max_output_bytes;

        let collect = async {
            let (stdout, stderr) =
                tokio::try_join!(read_capped(stdout, limit), read_capped(stderr, limit))?;
            let status = child.wait().await?;
            Ok::<_, SandboxError>((stdout, stderr, status))
        };

        let outcome = timeout(opts.timeout, collect).await;
        let (stdout, stderr, status) = match outcome {
            Ok(Ok(collected)) => collected,
            Ok(Err(e)) => {
                kill_group(&mut child, pgid);
                return Err(e);
            }
            Err(_) => {
                kill_group(&mut child, pgid);
                return Err(SandboxError::Timeout {
                    ms: opts.timeout.as_millis() as u64,
                });
            }
        };

        let report = match tokio::fs::read_to_string(&report_path).await {
            Ok(content) => match TestReport::parse(&content) {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!("ignoring malformed test report: {:#}", e);
                    None
                }
            },
            Err(_) => None,
        };

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code(),
            report,
        })
    }
}

fn kill_group(child: &mut Child, pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        // SAFETY: killpg only sends a signal; the group was created at spawn.
        unsafe {
            libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
    let _ = child.start_kill();
}

async fn read_capped<R>(reader: Option<R>, limit: usize) -> Result<Vec<u8>, SandboxError>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if buf.len() + n > limit {
            return Err(SandboxError::OutputLimitExceeded { limit });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf)
}
