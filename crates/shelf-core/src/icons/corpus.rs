use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::execution::{
    CommandSpec, ExecutionResult, ProcessExecutor, ProcessSpawnRequest, SourceFuture, run_command,
};
use crate::models::{CoreError, CoreErrorKind, PackageAction, PackageSource};

/// Pulls `Package:` / icon-name pairs out of an AppStream YAML document and
/// prints them as `package:icon`. Icon files are named
/// `<package>_<icon>.png`; the package prefix and extension are dropped.
const SCAN_AWK_PROGRAM: &str = r#"awk '
    /^Package:/ { pkg = $2 }
    /^  - name:/ && pkg != "" {
        icon = $3
        gsub(/^[ \t]+/, "", icon)
        if (icon != "") {
            split(icon, parts, "_")
            if (length(parts) > 1) {
                iconname = parts[2]
                gsub(/\.png$/, "", iconname)
            } else {
                iconname = icon
                gsub(/\.png$/, "", iconname)
            }
            print pkg ":" iconname
            pkg = ""
        }
    }
'"#;

/// The compressed AppStream metadata shipped by the distribution.
pub trait AppStreamCorpus: Send + Sync {
    fn list_files(&self) -> SourceFuture<'_, Vec<PathBuf>>;

    /// Raw `package:icon` lines for one metadata file.
    fn scan_file<'a>(&'a self, path: &'a Path) -> SourceFuture<'a, String>;
}

pub struct ProcessAppStreamCorpus {
    executor: Arc<dyn ProcessExecutor>,
    yaml_glob: String,
    timeout: Duration,
}

impl ProcessAppStreamCorpus {
    pub fn new(executor: Arc<dyn ProcessExecutor>, yaml_glob: impl Into<String>) -> Self {
        Self {
            executor,
            yaml_glob: yaml_glob.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_shell(&self, script: String) -> ExecutionResult<String> {
        let request = ProcessSpawnRequest::new(
            PackageSource::Debian,
            PackageAction::IndexBuild,
            CommandSpec::shell(script),
        )
        .timeout(self.timeout);
        // Both pipelines end in `|| true`; the exit status carries no signal.
        let output = run_command(self.executor.as_ref(), request).await?;
        Ok(output.stdout_lossy())
    }
}

impl AppStreamCorpus for ProcessAppStreamCorpus {
    fn list_files(&self) -> SourceFuture<'_, Vec<PathBuf>> {
        Box::pin(async move {
            let listing = self
                .run_shell(format!("ls {} 2>/dev/null || true", self.yaml_glob))
                .await?;
            Ok(listing
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect())
        })
    }

    fn scan_file<'a>(&'a self, path: &'a Path) -> SourceFuture<'a, String> {
        Box::pin(async move {
            let file = path.to_string_lossy();
            if !is_shell_safe_path(&file) {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("refusing to scan AppStream file with unsafe path '{file}'"),
                )
                .action(PackageAction::IndexBuild));
            }
            self.run_shell(format!(
                "zcat '{file}' 2>/dev/null | {SCAN_AWK_PROGRAM} || true"
            ))
            .await
        })
    }
}

fn is_shell_safe_path(path: &str) -> bool {
    !path.is_empty()
        && !path
            .chars()
            .any(|ch| matches!(ch, '\'' | '"' | '\\' | '$' | '`' | '\n' | '\r' | '\0'))
}

/// Parses `package:icon` lines. Malformed lines are skipped and a trailing
/// `-symbolic` is removed so the full-colour icon is preferred.
pub fn parse_scan_output(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split(':');
            let package = parts.next()?.trim();
            let icon = parts.next()?.trim();
            if parts.next().is_some() || package.is_empty() || icon.is_empty() {
                return None;
            }
            let icon = icon.strip_suffix("-symbolic").unwrap_or(icon);
            Some((package.to_string(), icon.to_string()))
        })
        .collect()
}
