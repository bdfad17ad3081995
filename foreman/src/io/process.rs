//! Bounded, timeout-guarded child processes for git and session commands.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept per stream; the rest is drained and discarded.
pub const OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Run `cmd` to completion, killing it after `timeout`.
///
/// Both pipes are drained concurrently so a chatty child cannot deadlock on
/// a full pipe buffer.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn command")?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || drain_limited(stdout));
    let stderr_handle = thread::spawn(move || drain_limited(stderr));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!("command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let stdout = join(stdout_handle).context("join stdout")?;
    let stderr = join(stderr_handle).context("join stderr")?;
    debug!(exit_code = ?status.code(), timed_out, "command finished");

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

/// Like [`run_with_timeout`], but a non-zero exit or timeout is an error.
/// Returns trimmed stdout.
pub fn run_checked(cmd: Command, timeout: Duration, label: &str) -> Result<String> {
    let out = run_with_timeout(cmd, timeout).with_context(|| format!("run {label}"))?;
    if out.timed_out {
        return Err(anyhow!("{label} timed out after {}s", timeout.as_secs()));
    }
    if !out.status.success() {
        return Err(anyhow!(
            "{label} failed ({:?}): {}",
            out.status.code(),
            out.stderr.trim()
        ));
    }
    Ok(out.stdout.trim().to_string())
}

fn join(handle: thread::JoinHandle<Result<String>>) -> Result<String> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn drain_limited<R: Read>(mut reader: R) -> Result<String> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let room = OUTPUT_LIMIT_BYTES.saturating_sub(kept.len());
        let keep = n.min(room);
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
    if dropped > 0 {
        warn!(dropped, "output truncated");
    }
    Ok(String::from_utf8_lossy(&kept).into_owned())
}
