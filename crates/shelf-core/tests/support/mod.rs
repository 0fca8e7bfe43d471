#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use shelf_core::execution::{
    ExecutionResult, ProcessExecutor, ProcessOutput, ProcessSpawnRequest, ProcessWaitFuture,
    RunningProcess, SourceFuture,
};
use shelf_core::icons::AppStreamCorpus;

enum Pattern {
    Exact(String),
    Containing(String),
}

impl Pattern {
    fn matches(&self, command_line: &str) -> bool {
        match self {
            Self::Exact(expected) => command_line == expected,
            Self::Containing(fragment) => command_line.contains(fragment.as_str()),
        }
    }
}

struct Route {
    pattern: Pattern,
    code: i32,
    stdout: String,
    stderr: String,
}

/// Answers commands from a script of routes, matched in registration order
/// against `program arg1 arg2 ...`. Unmatched commands exit 127.
#[derive(Default)]
pub struct ScriptedExecutor {
    routes: Vec<Route>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exact(self, command_line: &str, stdout: &str) -> Self {
        self.route(Pattern::Exact(command_line.to_string()), 0, stdout, "")
    }

    pub fn containing(self, fragment: &str, stdout: &str) -> Self {
        self.route(Pattern::Containing(fragment.to_string()), 0, stdout, "")
    }

    pub fn exact_failure(self, command_line: &str, code: i32, stderr: &str) -> Self {
        self.route(Pattern::Exact(command_line.to_string()), code, "", stderr)
    }

    pub fn containing_failure(self, fragment: &str, code: i32, stderr: &str) -> Self {
        self.route(Pattern::Containing(fragment.to_string()), code, "", stderr)
    }

    pub fn exact_with_stderr(self, command_line: &str, code: i32, stderr: &str) -> Self {
        self.route(Pattern::Exact(command_line.to_string()), code, "", stderr)
    }

    fn route(mut self, pattern: Pattern, code: i32, stdout: &str, stderr: &str) -> Self {
        self.routes.push(Route {
            pattern,
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_matching(&self, fragment: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.contains(fragment))
            .count()
    }
}

struct FakeProcess {
    output: ProcessOutput,
}

impl RunningProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn kill(&self) -> ExecutionResult<()> {
        Ok(())
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let output = self.output;
        Box::pin(async move { Ok(output) })
    }
}

impl ProcessExecutor for ScriptedExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let command_line = request.command.to_string();
        self.calls.lock().unwrap().push(command_line.clone());

        let output = match self
            .routes
            .iter()
            .find(|route| route.pattern.matches(&command_line))
        {
            Some(route) => ProcessOutput::exited(
                route.code,
                route.stdout.as_bytes(),
                route.stderr.as_bytes(),
            ),
            None => ProcessOutput::exited(
                127,
                Vec::<u8>::new(),
                format!("unscripted command: {command_line}"),
            ),
        };

        Ok(Box::new(FakeProcess { output }))
    }
}

/// In-memory AppStream corpus: one "file" per scan output.
pub struct StaticCorpus {
    scans: Vec<String>,
    pub scans_performed: AtomicUsize,
}

impl StaticCorpus {
    pub fn new(scans: &[&str]) -> Self {
        Self {
            scans: scans.iter().map(|scan| scan.to_string()).collect(),
            scans_performed: AtomicUsize::new(0),
        }
    }

    pub fn scans_performed(&self) -> usize {
        self.scans_performed.load(Ordering::SeqCst)
    }
}

impl AppStreamCorpus for StaticCorpus {
    fn list_files(&self) -> SourceFuture<'_, Vec<PathBuf>> {
        let files = (0..self.scans.len())
            .map(|index| PathBuf::from(format!("/fake/appstream-{index}.yml.gz")))
            .collect();
        Box::pin(async move { Ok(files) })
    }

    fn scan_file<'a>(&'a self, path: &'a Path) -> SourceFuture<'a, String> {
        Box::pin(async move {
            self.scans_performed.fetch_add(1, Ordering::SeqCst);
            let index: usize = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.trim_start_matches("appstream-").split('.').next())
                .and_then(|index| index.parse().ok())
                .unwrap_or(usize::MAX);
            Ok(self.scans.get(index).cloned().unwrap_or_default())
        })
    }
}

pub fn control_block(package: &str, version: &str, installed_size_kb: u64, section: &str) -> String {
    format!(
        "Package: {package}\nVersion: {version}\nInstalled-Size: {installed_size_kb}\nMaintainer: Jane Packager <jane@example.org>\nSection: {section}\nDescription: {package} summary line\n longer description of {package}\n"
    )
}
