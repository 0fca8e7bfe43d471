use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::models::{CacheEntry, CoreError};

pub type CacheDocument = HashMap<String, CacheEntry>;

/// Reads the cache document. A missing file is an empty cache; anything else
/// that goes wrong is reported so the caller can log it and start empty.
pub fn load_document(path: &Path) -> Result<CacheDocument, CoreError> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(CacheDocument::new()),
        Err(error) => {
            return Err(CoreError::storage(format!(
                "failed to read cache document '{}': {error}",
                path.display()
            )));
        }
    };

    if contents.iter().all(u8::is_ascii_whitespace) {
        return Ok(CacheDocument::new());
    }

    serde_json::from_slice(&contents).map_err(|error| {
        CoreError::storage(format!(
            "failed to parse cache document '{}': {error}",
            path.display()
        ))
    })
}

/// Replaces `path` with `contents` through a sibling temp file and a rename,
/// so readers only ever see the previous or the new document.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|error| {
            CoreError::storage(format!(
                "failed to create cache directory '{}': {error}",
                parent.display()
            ))
        })?;
    }

    let temp_path = temp_path_for(path);
    let write_result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    write_result.map_err(|error| {
        let _ = fs::remove_file(&temp_path);
        CoreError::storage(format!(
            "failed to write '{}': {error}",
            path.display()
        ))
    })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{load_document, temp_path_for, write_atomic};
    use crate::models::CoreErrorKind;

    #[test]
    fn missing_document_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let document = load_document(&dir.path().join("packages-cache.json")).unwrap();
        assert!(document.is_empty());
    }

    #[test]
    fn corrupt_document_is_a_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages-cache.json");
        fs::write(&path, b"{ not json").unwrap();

        let error = load_document(&path).unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::StorageFailure);
    }

    #[test]
    fn atomic_write_creates_parents_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("packages-cache.json");

        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"{\"a\":1}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
        assert!(!temp_path_for(&path).exists());
    }
}
