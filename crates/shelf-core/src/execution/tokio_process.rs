use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::execution::{
    ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    ProcessWaitFuture, RunningProcess,
};
use crate::models::{CoreError, CoreErrorKind, PackageAction, PackageSource};

/// How long a killed child gets to be reaped after a timeout.
const REAP_WINDOW: Duration = Duration::from_secs(1);

/// Pipes still held open by grandchildren of an exited `sh -c` are read for
/// at most this long.
const PIPE_DRAIN_WINDOW: Duration = Duration::from_millis(250);

/// Runs commands as real child processes on the tokio runtime. On unix each
/// child leads its own process group, so killing it also takes down the rest
/// of a shell pipeline.
pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let mut command = tokio::process::Command::new(&request.command.program);
        command
            .args(&request.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|error| {
            CoreError::new(
                CoreErrorKind::ProcessFailure,
                format!("failed to spawn '{}': {error}", request.command.program_name()),
            )
            .origin(request.origin)
            .action(request.action)
        })?;

        tracing::trace!(pid = ?child.id(), command = %request.command, "process spawned");
        Ok(Box::new(ChildProcess {
            pid: child.id(),
            child: Mutex::new(child),
            started: Instant::now(),
            timeout: request.timeout,
            origin: request.origin,
            action: request.action,
        }))
    }
}

struct ChildProcess {
    pid: Option<u32>,
    child: Mutex<tokio::process::Child>,
    started: Instant,
    timeout: Option<Duration>,
    origin: PackageSource,
    action: PackageAction,
}

impl ChildProcess {
    fn error(&self, kind: CoreErrorKind, message: String) -> CoreError {
        CoreError::new(kind, message)
            .origin(self.origin)
            .action(self.action)
    }
}

impl RunningProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[cfg(unix)]
    fn kill(&self) -> ExecutionResult<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        kill_process_group(pid).map_err(|error| {
            self.error(
                CoreErrorKind::ProcessFailure,
                format!("failed to kill process group {pid}: {error}"),
            )
        })
    }

    #[cfg(not(unix))]
    fn kill(&self) -> ExecutionResult<()> {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        child.start_kill().map_err(|error| {
            self.error(
                CoreErrorKind::ProcessFailure,
                format!("failed to kill process: {error}"),
            )
        })
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let ChildProcess {
            pid,
            child,
            started,
            timeout,
            origin,
            action,
        } = *self;
        let error = move |kind: CoreErrorKind, message: String| {
            CoreError::new(kind, message).origin(origin).action(action)
        };

        Box::pin(async move {
            let mut child = child.into_inner().unwrap_or_else(PoisonError::into_inner);
            let stdout = drain(child.stdout.take());
            let stderr = drain(child.stderr.take());

            let exit = match timeout {
                None => child.wait().await,
                Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                    Ok(exit) => exit,
                    Err(_) => {
                        force_kill(pid, &mut child);
                        let _ = tokio::time::timeout(REAP_WINDOW, child.wait()).await;
                        stdout.abort();
                        stderr.abort();
                        return Err(error(
                            CoreErrorKind::Timeout,
                            format!("process timed out after {}ms", limit.as_millis()),
                        ));
                    }
                },
            }
            .map_err(|wait_error| {
                error(
                    CoreErrorKind::ProcessFailure,
                    format!("failed to wait for process: {wait_error}"),
                )
            })?;

            Ok(ProcessOutput {
                status: exit
                    .code()
                    .map_or(ProcessExitStatus::Terminated, ProcessExitStatus::ExitCode),
                stdout: collect(stdout).await,
                stderr: collect(stderr).await,
                elapsed: started.elapsed(),
            })
        })
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer).await;
        }
        buffer
    })
}

async fn collect(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(PIPE_DRAIN_WINDOW, reader).await {
        Ok(Ok(buffer)) => buffer,
        _ => Vec::new(),
    }
}

#[cfg(unix)]
fn force_kill(pid: Option<u32>, _child: &mut tokio::process::Child) {
    if let Some(pid) = pid {
        let _ = kill_process_group(pid);
    }
}

#[cfg(not(unix))]
fn force_kill(_pid: Option<u32>, child: &mut tokio::process::Child) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn kill_process_group(pid: u32) -> std::io::Result<()> {
    let group = -(pid as libc::pid_t);
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the group created with `process_group(0)` at spawn.
    if unsafe { libc::kill(group, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let error = std::io::Error::last_os_error();
    if error.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(error)
    }
}
