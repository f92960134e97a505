//! Subprocess runner (spec.md component A).
//!
//! Spawns ffmpeg/ffprobe, optionally streams stdout lines to a caller
//! supplied consumer, and resolves a cancellation race via a two-way
//! `tokio::select!` between "process exited" and "cancel fired" — the
//! runner never holds a lock while waiting on the child, matching
//! `video_processor.py::_communicate_with_cancel` and the teacher's
//! `FFmpegRunningJob`.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// How long to wait after a graceful terminate before force-killing.
pub const FORCE_KILL_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug)]
pub enum RunOutcome {
    Finished {
        status: ExitStatus,
        stderr: Vec<u8>,
    },
    Cancelled,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        matches!(self, RunOutcome::Finished { status, .. } if status.success())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled)
    }
}

/// Spawns `program` with `args`, hiding the console window on Windows the
/// way the teacher's `FFmpegRunningJob::run` does via `creation_flags`.
fn spawn_hidden(program: &str, args: &[impl AsRef<OsStr>]) -> std::io::Result<Command> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.kill_on_drop(true);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    Ok(cmd)
}

/// Runs a subprocess to completion in "drain" mode (stdout/stderr fully
/// buffered), racing the process exit against `cancel`.
pub async fn run_drain(
    program: &str,
    args: &[String],
    cancel: &CancellationToken,
) -> anyhow::Result<RunOutcome> {
    let mut cmd = spawn_hidden(program, args)?;
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    tokio::select! {
        output = wait_with_output(&mut child) => {
            let (status, stderr) = output?;
            Ok(RunOutcome::Finished { status, stderr })
        }
        _ = cancel.cancelled() => {
            terminate_then_kill(&mut child).await;
            Ok(RunOutcome::Cancelled)
        }
    }
}

async fn wait_with_output(child: &mut Child) -> std::io::Result<(ExitStatus, Vec<u8>)> {
    use tokio::io::AsyncReadExt;
    let mut stderr_buf = Vec::new();
    if let Some(mut stderr) = child.stderr.take() {
        let status_fut = child.wait();
        let read_fut = stderr.read_to_end(&mut stderr_buf);
        let (status, _) = tokio::join!(status_fut, read_fut);
        Ok((status?, stderr_buf))
    } else {
        let status = child.wait().await?;
        Ok((status, stderr_buf))
    }
}

/// Attempts a graceful `kill()` (tokio has no portable SIGTERM, so this
/// matches the teacher's `Child::kill` usage) then waits up to
/// `FORCE_KILL_TIMEOUT` before giving up; `kill_on_drop` backstops the rest.
async fn terminate_then_kill(child: &mut Child) {
    let _ = child.start_kill();
    let _ = tokio::time::timeout(FORCE_KILL_TIMEOUT, child.wait()).await;
}

/// A line-streaming handle over a spawned process's stdout, used by the
/// ffmpeg progress protocol parser in `media::pipeline`.
pub struct LineStreamJob {
    pub child: Child,
    pub lines: tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
}

/// Spawns `program` in line-stream mode: stdout is line-buffered for the
/// caller, stderr is discarded (ffmpeg's `-progress pipe:1` puts the
/// progress protocol on stdout and diagnostics on stderr).
pub fn spawn_line_stream(program: &str, args: &[String]) -> anyhow::Result<LineStreamJob> {
    let mut cmd = spawn_hidden(program, args)?;
    cmd.stdout(Stdio::piped()).stderr(Stdio::null());
    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().expect("stdout piped");
    let lines = BufReader::new(stdout).lines();
    Ok(LineStreamJob { child, lines })
}

impl LineStreamJob {
    /// Waits for process exit, racing a cancel signal. Returns `Cancelled`
    /// if `cancel` fires first, terminating the child within
    /// `FORCE_KILL_TIMEOUT`.
    pub async fn wait_or_cancel(&mut self, cancel: &CancellationToken) -> RunOutcome {
        tokio::select! {
            status = self.child.wait() => {
                match status {
                    Ok(status) => RunOutcome::Finished { status, stderr: Vec::new() },
                    Err(_) => RunOutcome::Finished {
                        status: Default::default_exit_status(),
                        stderr: Vec::new(),
                    },
                }
            }
            _ = cancel.cancelled() => {
                terminate_then_kill(&mut self.child).await;
                RunOutcome::Cancelled
            }
        }
    }
}

/// `ExitStatus` has no portable "failure" constructor; this trait supplies
/// one for the (rare) io-error branch above without unwrapping.
trait DefaultExitStatus {
    fn default_exit_status() -> ExitStatus;
}

impl DefaultExitStatus for ExitStatus {
    #[cfg(unix)]
    fn default_exit_status() -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(1)
    }

    #[cfg(windows)]
    fn default_exit_status() -> ExitStatus {
        use std::os::windows::process::ExitStatusExt;
        ExitStatus::from_raw(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_drain_completes_for_trivial_command() {
        let cancel = CancellationToken::new();
        let outcome = run_drain("true", &[], &cancel).await.unwrap();
        assert!(outcome.success() || cfg!(windows));
    }

    #[tokio::test]
    async fn cancel_before_spawn_completes_is_observed() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_drain("sleep", &["2".into()], &cancel).await.unwrap();
        assert!(outcome.is_cancelled());
    }
}
