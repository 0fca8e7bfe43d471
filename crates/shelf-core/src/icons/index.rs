use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex as AsyncMutex, watch};

use crate::cache::persist::write_atomic;
use crate::icons::corpus::{AppStreamCorpus, parse_scan_output};
use crate::icons::sections::section_icon;
use crate::models::{CoreError, PackageAction};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexState {
    Unbuilt,
    Loading,
    Ready,
}

/// Package-name variant to icon mapping built from the AppStream corpus.
///
/// The persisted document is trusted indefinitely once it holds entries. An
/// absent or empty document triggers a full scan of the corpus. Whatever the
/// outcome, initialization ends in [`IndexState::Ready`] so callers waiting on
/// the index are never stranded.
pub struct IconIndex {
    path: PathBuf,
    corpus: Arc<dyn AppStreamCorpus>,
    icon_dirs: Vec<PathBuf>,
    entries: RwLock<HashMap<String, String>>,
    state: watch::Sender<IndexState>,
    init_lock: AsyncMutex<()>,
}

/// Marks the index ready when dropped, including when `initialize` is
/// cancelled mid-build.
struct ReadyOnDrop<'a>(&'a watch::Sender<IndexState>);

impl Drop for ReadyOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(IndexState::Ready);
    }
}

impl IconIndex {
    pub fn new(
        path: impl Into<PathBuf>,
        corpus: Arc<dyn AppStreamCorpus>,
        icon_dirs: Vec<PathBuf>,
    ) -> Self {
        let (state, _) = watch::channel(IndexState::Unbuilt);
        Self {
            path: path.into(),
            corpus,
            icon_dirs,
            entries: RwLock::new(HashMap::new()),
            state,
            init_lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted index, or builds and persists it when there is
    /// nothing usable on disk. Concurrent callers share one initialization.
    pub async fn initialize(&self) {
        let _init = self.init_lock.lock().await;
        if self.is_ready() {
            return;
        }

        self.state.send_replace(IndexState::Loading);
        let _ready = ReadyOnDrop(&self.state);

        match self.load_persisted().await {
            Ok(Some(entries)) => {
                tracing::info!(
                    path = %self.path.display(),
                    entries = entries.len(),
                    "icon index loaded"
                );
                self.replace_entries(entries);
                return;
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(
                    path = %self.path.display(),
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to load icon index, rebuilding"
                );
            }
        }

        let entries = self.build().await;
        tracing::info!(entries = entries.len(), "icon index built");
        if let Err(error) = self.persist(&entries).await {
            tracing::error!(
                path = %self.path.display(),
                kind = ?error.kind,
                message = %error.message,
                "failed to persist icon index"
            );
        }
        self.replace_entries(entries);
    }

    pub fn state(&self) -> IndexState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == IndexState::Ready
    }

    /// Resolves once the index is ready. Does not start initialization.
    pub async fn wait_until_ready(&self) {
        let mut receiver = self.state.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = receiver
            .wait_for(|state| *state == IndexState::Ready)
            .await;
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Icon recorded for `package`, trying the exact name and then its base
    /// name (`firefox-esr` -> `firefox`).
    pub fn lookup(&self, package: &str) -> Option<String> {
        self.lookup_entry(package).map(|(_, icon)| icon)
    }

    /// Best icon for a Debian package: an indexed icon (as a `file://` URI
    /// when the PNG exists locally), else the generic icon for `section`.
    pub fn resolve_icon(&self, package: &str, section: &str) -> String {
        let Some((indexed_name, icon)) = self.lookup_entry(package) else {
            return section_icon(section).to_string();
        };

        if is_uri_or_path(&icon) {
            return icon;
        }

        // Icon files carry the name the icon was indexed under.
        let file_name = format!("{indexed_name}_{icon}.png");
        self.icon_dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
            .map(|found| format!("file://{}", found.display()))
            .unwrap_or(icon)
    }

    fn lookup_entry<'a>(&self, package: &'a str) -> Option<(&'a str, String)> {
        let entries = self.read_entries();
        if let Some(icon) = entries.get(package) {
            return Some((package, icon.clone()));
        }
        let base = base_name(package);
        if base == package {
            return None;
        }
        entries.get(base).map(|icon| (base, icon.clone()))
    }

    async fn load_persisted(&self) -> Result<Option<HashMap<String, String>>, CoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_index(&path))
            .await
            .map_err(|error| {
                CoreError::internal(format!("icon index load task failed: {error}"))
                    .action(PackageAction::IndexBuild)
            })?
    }

    async fn build(&self) -> HashMap<String, String> {
        let mut entries = HashMap::new();
        let files = match self.corpus.list_files().await {
            Ok(files) => files,
            Err(error) => {
                tracing::warn!(
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to enumerate AppStream metadata"
                );
                return entries;
            }
        };

        for file in &files {
            match self.corpus.scan_file(file).await {
                Ok(output) => {
                    for (package, icon) in parse_scan_output(&output) {
                        insert_variants(&mut entries, &package, &icon);
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        path = %file.display(),
                        kind = ?error.kind,
                        message = %error.message,
                        "skipping AppStream metadata file"
                    );
                }
            }
        }

        tracing::debug!(files = files.len(), entries = entries.len(), "AppStream corpus scanned");
        entries
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(entries).map_err(|error| {
            CoreError::internal(format!("failed to serialize icon index: {error}"))
        })?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|error| CoreError::internal(format!("icon index write task failed: {error}")))?
    }

    fn replace_entries(&self, entries: HashMap<String, String>) {
        let mut guard = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = entries;
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// `None` when there is no usable document: missing, blank, or `{}`.
fn load_index(path: &Path) -> Result<Option<HashMap<String, String>>, CoreError> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(CoreError::storage(format!(
                "failed to read icon index '{}': {error}",
                path.display()
            )));
        }
    };

    if contents.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let entries: HashMap<String, String> = serde_json::from_slice(&contents).map_err(|error| {
        CoreError::storage(format!(
            "failed to parse icon index '{}': {error}",
            path.display()
        ))
    })?;
    Ok((!entries.is_empty()).then_some(entries))
}

fn insert_variants(entries: &mut HashMap<String, String>, package: &str, icon: &str) {
    for variant in name_variants(package) {
        entries
            .entry(variant.to_string())
            .or_insert_with(|| icon.to_string());
    }
}

fn is_uri_or_path(icon: &str) -> bool {
    icon.starts_with("file://")
        || icon.starts_with("http://")
        || icon.starts_with("https://")
        || icon.starts_with('/')
}

/// Everything before the first `-` or `_`.
pub fn base_name(name: &str) -> &str {
    name.split(['-', '_']).next().unwrap_or(name)
}

/// Names a package is indexed under: the literal name, its base name and its
/// last dot-delimited segment. Duplicates are removed, order is kept.
pub fn name_variants(name: &str) -> Vec<&str> {
    let mut variants = vec![name];
    for variant in [base_name(name), name.rsplit('.').next().unwrap_or(name)] {
        if !variant.is_empty() && !variants.contains(&variant) {
            variants.push(variant);
        }
    }
    variants
}
