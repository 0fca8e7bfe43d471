pub mod runner;
pub mod tokio_process;

pub use runner::{collect_stdout, run_command, run_command_blocking};
pub use tokio_process::TokioProcessExecutor;

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind, PackageAction, PackageSource};

pub type ExecutionResult<T> = Result<T, CoreError>;

pub type ProcessWaitFuture = Pin<Box<dyn Future<Output = ExecutionResult<ProcessOutput>> + Send>>;

/// Boxed future returned by the source traits that sit between resolvers and
/// the outside world.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = ExecutionResult<T>> + Send + 'a>>;

/// A program and its argument vector. Arguments are passed as-is, never
/// through a shell, unless the command was built with [`CommandSpec::shell`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `sh -c <script>`, used for the pipelines that must keep their exact
    /// shell syntax.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Final path component of the program, for log fields.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), &'static str> {
        if self.program.as_os_str().is_empty() {
            return Err("command has no program");
        }
        if self.args.iter().any(|arg| arg.is_empty()) {
            return Err("command has an empty argument");
        }
        if self.args.iter().any(|arg| arg.contains('\0')) {
            return Err("command argument contains a NUL byte");
        }
        Ok(())
    }
}

/// `program arg1 arg2 ...`, space separated and unquoted.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A command plus the attribution carried into every error it produces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessSpawnRequest {
    pub origin: PackageSource,
    pub action: PackageAction,
    pub command: CommandSpec,
    pub timeout: Option<Duration>,
}

impl ProcessSpawnRequest {
    pub fn new(origin: PackageSource, action: PackageAction, command: CommandSpec) -> Self {
        Self {
            origin,
            action,
            command,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> ExecutionResult<()> {
        let problem = match self.command.check() {
            Err(problem) => problem,
            Ok(()) if self.timeout.is_some_and(|timeout| timeout.is_zero()) => {
                "timeout must be greater than zero"
            }
            Ok(()) => return Ok(()),
        };
        Err(CoreError::new(CoreErrorKind::InvalidInput, problem)
            .origin(self.origin)
            .action(self.action))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExitStatus {
    ExitCode(i32),
    /// Killed by a signal, no exit code.
    Terminated,
}

impl ProcessExitStatus {
    pub fn success(self) -> bool {
        self == Self::ExitCode(0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessOutput {
    pub status: ProcessExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// Output of a process that exited with `code` immediately.
    pub fn exited(code: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            status: ProcessExitStatus::ExitCode(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A spawned child. `kill` may be called while another task is waiting.
pub trait RunningProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    fn kill(&self) -> ExecutionResult<()>;

    fn wait(self: Box<Self>) -> ProcessWaitFuture;
}

pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>>;
}

pub fn spawn_validated(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<Box<dyn RunningProcess>> {
    request.validate()?;
    executor.spawn(request)
}
