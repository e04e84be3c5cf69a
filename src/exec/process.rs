// src/exec/process.rs

//! Single job process: spawning, output capture, timeout and termination.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::exec::outcome::{ExitKind, ExitOutcome};
use crate::job::{Job, JobCommand, JobId, OutputBuffer};

/// How long to keep draining pipes after the process itself has exited.
///
/// Background grandchildren can hold the pipes open indefinitely.
const PIPE_DRAIN_LIMIT: Duration = Duration::from_secs(2);

/// Build the command for a job: merged capture, own process group, working
/// directory set.
fn build_command(job: &Job) -> Result<Command> {
    let mut cmd = match job.command() {
        JobCommand::Shell(line) => {
            if cfg!(windows) {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(line);
                c
            } else {
                let mut c = Command::new("sh");
                c.arg("-c").arg(line);
                c
            }
        }
        JobCommand::Argv(args) => {
            let Some((program, rest)) = args.split_first() else {
                bail!("job '{}' has an empty argument vector", job.id());
            };
            let mut c = Command::new(program);
            c.args(rest);
            c
        }
    };

    cmd.current_dir(job.working_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    Ok(cmd)
}

/// Spawn the job's process.
pub fn spawn(job: &Job) -> Result<Child> {
    let mut cmd = build_command(job)?;
    info!(
        job = %job.id(),
        cmd = %job.command(),
        cwd = %job.working_dir().display(),
        "starting job process"
    );
    cmd.spawn()
        .with_context(|| format!("spawning process for job '{}'", job.id()))
}

fn spawn_reader<R>(
    stream: Option<R>,
    job: JobId,
    label: &'static str,
    buffer: Arc<Mutex<OutputBuffer>>,
) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let stream = stream?;
    Some(tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&raw);
                    trace!(job = %job, "{label}: {}", line.trim_end());
                    if let Ok(mut buf) = buffer.lock() {
                        buf.push(&line);
                    }
                }
                Err(e) => {
                    debug!(job = %job, error = %e, "{label} read error; stopping capture");
                    break;
                }
            }
        }
    }))
}

/// Watch a spawned process until it exits, times out, or is cancelled.
///
/// Timeout and cancellation go through the same path: the whole process
/// group is terminated and the partial output is still returned.
pub async fn watch(
    mut child: Child,
    job: JobId,
    timeout: Duration,
    kill_grace: Duration,
    max_output_bytes: usize,
    mut cancel_rx: oneshot::Receiver<()>,
) -> ExitOutcome {
    let started = Instant::now();
    let buffer = Arc::new(Mutex::new(OutputBuffer::new(max_output_bytes)));

    let readers: Vec<JoinHandle<()>> = [
        spawn_reader(child.stdout.take(), job.clone(), "stdout", buffer.clone()),
        spawn_reader(child.stderr.take(), job.clone(), "stderr", buffer.clone()),
    ]
    .into_iter()
    .flatten()
    .collect();

    enum Ending {
        Exited(Option<i32>),
        WaitFailed(std::io::Error),
        TimedOut,
        Cancelled,
    }

    let ending = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Ending::Exited(status.code()),
            Err(e) => Ending::WaitFailed(e),
        },
        _ = tokio::time::sleep(timeout) => Ending::TimedOut,
        res = &mut cancel_rx => match res {
            Ok(()) => Ending::Cancelled,
            // Sender dropped: runner is gone; treat like a kill so nothing leaks.
            Err(_) => Ending::Cancelled,
        },
    };

    let (kind, exit_code) = match ending {
        Ending::Exited(code) => {
            info!(job = %job, exit_code = ?code, "job process exited");
            (ExitKind::Exited, code)
        }
        Ending::WaitFailed(e) => {
            warn!(job = %job, error = %e, "waiting for job process failed");
            terminate_process_group(&mut child, kill_grace).await;
            (ExitKind::RunnerError(format!("wait failed: {e}")), None)
        }
        Ending::TimedOut => {
            warn!(job = %job, timeout_secs = timeout.as_secs_f64(), "job timed out; terminating process group");
            terminate_process_group(&mut child, kill_grace).await;
            (ExitKind::TimedOut, None)
        }
        Ending::Cancelled => {
            info!(job = %job, "kill requested; terminating process group");
            terminate_process_group(&mut child, kill_grace).await;
            (ExitKind::Killed, None)
        }
    };

    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(PIPE_DRAIN_LIMIT, reader).await.is_err() {
            debug!(job = %job, "output pipe still open after exit; abandoning capture");
            abort.abort();
        }
    }

    let output = buffer
        .lock()
        .map(|b| b.contents())
        .unwrap_or_default();

    ExitOutcome {
        kind,
        exit_code,
        output,
        elapsed: started.elapsed(),
    }
}

/// Terminate a process group gracefully.
///
/// On Unix:
/// 1. Send SIGTERM to the process group
/// 2. Wait for the grace period
/// 3. Send SIGKILL to whatever is left of the group
/// 4. Reap the leader
#[cfg(unix)]
async fn terminate_process_group(child: &mut Child, grace: Duration) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };
    let pgid = Pid::from_raw(pid as i32);

    if let Err(e) = killpg(pgid, Signal::SIGTERM) {
        if e != Errno::ESRCH {
            warn!(pid, error = ?e, "SIGTERM to process group failed");
        }
    }

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        if e != Errno::ESRCH {
            warn!(pid, error = ?e, "SIGKILL to process group failed");
        }
    }

    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn terminate_process_group(child: &mut Child, _grace: Duration) {
    let _ = child.kill().await;
    let _ = child.wait().await;
}
