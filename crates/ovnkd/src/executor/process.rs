//! Child process execution.

use super::{ExecOutput, ProcessRunner};
use async_trait::async_trait;
use ovnk_common::{DiagError, DiagResult};
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

fn spawn(
    program: &str,
    args: &[String],
    piped_stdin: bool,
    cwd: Option<&Path>,
) -> DiagResult<Child> {
    debug!("Executing: {} {:?}", program, args);

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if piped_stdin { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    command.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => {
            DiagError::UnavailableTool(format!("{} is not installed or not in PATH", program))
        }
        _ => DiagError::execution(format!("failed to start {}: {}", program, e), "", None),
    })
}

/// Run `program args...` without a shell, capturing stdout and stderr.
///
/// The child is killed if the returned future is dropped. A missing
/// binary is reported as `UnavailableTool`.
pub async fn run_command(
    program: &str,
    args: &[String],
    stdin: Option<&[u8]>,
    cwd: Option<&Path>,
) -> DiagResult<ExecOutput> {
    let mut child = spawn(program, args, stdin.is_some(), cwd)?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input).await.map_err(|e| {
            DiagError::execution(format!("failed to write to {}: {}", program, e), "", None)
        })?;
        // closing stdin lets the child see EOF
        drop(pipe);
    }

    let output = child.wait_with_output().await.map_err(|e| {
        DiagError::execution(format!("failed to wait for {}: {}", program, e), "", None)
    })?;

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
        cut_short: false,
    })
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        // a read error still leaves what arrived before it
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

/// Like [`run_command`], but the child is killed once `window` has passed
/// and whatever it wrote until then is returned with `cut_short` set.
pub async fn run_command_for(
    program: &str,
    args: &[String],
    window: Duration,
) -> DiagResult<ExecOutput> {
    let mut child = spawn(program, args, false, None)?;
    let stdout = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr = tokio::spawn(read_pipe(child.stderr.take()));

    let (exit_code, cut_short) = match tokio::time::timeout(window, child.wait()).await {
        Ok(status) => {
            let status = status.map_err(|e| {
                DiagError::execution(format!("failed to wait for {}: {}", program, e), "", None)
            })?;
            (status.code(), false)
        }
        Err(_) => {
            debug!("{} still running after {}s, stopping it", program, window.as_secs());
            if let Err(e) = child.kill().await {
                warn!("Failed to stop {}: {}", program, e);
            }
            (None, true)
        }
    };

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&stdout.await.unwrap_or_default()).into_owned(),
        stderr: String::from_utf8_lossy(&stderr.await.unwrap_or_default()).into_owned(),
        exit_code,
        cut_short,
    })
}

/// Runs local tools with `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProcessRunner;

#[async_trait]
impl ProcessRunner for LocalProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> DiagResult<ExecOutput> {
        run_command(program, args, None, cwd).await
    }
}
