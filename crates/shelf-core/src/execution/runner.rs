use crate::execution::{
    ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    spawn_validated,
};
use crate::models::{CoreError, CoreErrorKind, PackageAction, PackageSource};

/// Runs a command to completion without blocking the calling task.
pub async fn run_command(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<ProcessOutput> {
    tracing::trace!(
        origin = %request.origin,
        action = ?request.action,
        command = %request.command,
        "running command"
    );
    let process = spawn_validated(executor, request)?;
    process.wait().await
}

/// Blocking variant of [`run_command`].
///
/// Inside a tokio runtime this must be called from a thread that may block
/// (for example `tokio::task::spawn_blocking`); outside of one a private
/// current-thread runtime spawns and drives the child.
pub fn run_command_blocking(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<ProcessOutput> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return handle.block_on(run_command(executor, request));
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            CoreError::internal(format!("failed to start blocking runtime: {error}"))
                .origin(request.origin)
                .action(request.action)
        })?;
    runtime.block_on(run_command(executor, request))
}

/// Strict stdout extraction: anything but a zero exit is an error.
pub fn collect_stdout(
    output: ProcessOutput,
    origin: PackageSource,
    action: PackageAction,
) -> ExecutionResult<String> {
    if output.status.success() {
        return String::from_utf8(output.stdout).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ParseFailure,
                format!("process stdout is not valid UTF-8: {error}"),
            )
            .origin(origin)
            .action(action)
        });
    }
    match output.status {
        ProcessExitStatus::ExitCode(code) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(CoreError::new(
                CoreErrorKind::ProcessFailure,
                format!("process exited with code {code}: {}", stderr.trim()),
            )
            .origin(origin)
            .action(action))
        }
        ProcessExitStatus::Terminated => Err(CoreError::new(
            CoreErrorKind::ProcessFailure,
            "process was terminated by signal",
        )
        .origin(origin)
        .action(action)),
    }
}
