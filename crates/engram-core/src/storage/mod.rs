//! On-disk layout and atomic file primitives
//!
//! Every (user, character) scope owns a directory under the data root:
//!
//! ```text
//! <root>/<user_id>/<character_id>/
//!   nodes.json
//!   edges.json
//!   episodes.jsonl
//!   indexes/{inverted,ngram,entity,temporal,fulltext}.json vector.bin
//!   contradictions/{pending,resolved}.json
//!   persistent_conditions.json
//!   absolute_rules.json
//! ```
//!
//! Any file is replaced atomically: write to a temp sibling, fsync, rename.
//! A file that fails to parse on startup is quarantined (renamed with a
//! `.corrupt` suffix) so the owner can rebuild from the source of truth.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, Result};

// ============================================================================
// PATHS
// ============================================================================

/// Resolved file locations for one (user, character) scope
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub root: PathBuf,
}

impl StorePaths {
    pub fn new(data_root: &Path, user_id: &str, character_id: &str) -> Self {
        Self {
            root: data_root
                .join(sanitize_component(user_id))
                .join(sanitize_component(character_id)),
        }
    }

    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.indexes_dir())?;
        std::fs::create_dir_all(self.contradictions_dir())?;
        Ok(())
    }

    pub fn nodes(&self) -> PathBuf {
        self.root.join("nodes.json")
    }

    pub fn edges(&self) -> PathBuf {
        self.root.join("edges.json")
    }

    pub fn graph_kv(&self) -> PathBuf {
        self.root.join("graph.redb")
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.root.join("indexes")
    }

    pub fn index_file(&self, name: &str) -> PathBuf {
        self.indexes_dir().join(name)
    }

    pub fn vector_bin(&self) -> PathBuf {
        self.indexes_dir().join("vector.bin")
    }

    pub fn contradictions_dir(&self) -> PathBuf {
        self.root.join("contradictions")
    }
}

/// Default data root when the caller configures none
pub fn default_data_root() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("dev", "engram", "core")
        .ok_or_else(|| EngineError::Fatal("could not determine project directories".into()))?;
    let dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Keep user-supplied ids from escaping the data root
fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// ATOMIC FILE PRIMITIVES
// ============================================================================

/// Serialize to JSON and atomically replace the target file
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string(value)?;
    atomic_write_bytes(path, text.as_bytes())
}

/// Atomically replace the target file with raw bytes
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| EngineError::Fatal(format!("no parent dir for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("dat")
    ));
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a JSON file, quarantining it on parse failure.
///
/// Returns `Ok(None)` when the file does not exist or was quarantined; the
/// caller rebuilds from its source of truth in that case.
pub fn load_json_or_quarantine<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    match serde_json::from_str(&text) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            let quarantine = path.with_extension(format!(
                "{}.corrupt",
                path.extension().and_then(|x| x.to_str()).unwrap_or("dat")
            ));
            tracing::warn!(
                path = %path.display(),
                quarantine = %quarantine.display(),
                error = %e,
                "quarantining corrupt file"
            );
            std::fs::rename(path, &quarantine)?;
            Ok(None)
        }
    }
}

/// Load a JSON source-of-truth file. Unlike indexes, a corrupt source of
/// truth is unrecoverable: refuse to start with a clear diagnostic.
pub fn load_json_strict<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map(Some).map_err(|e| {
        EngineError::CorruptIndex {
            path: path.to_path_buf(),
            reason: format!("source of truth failed to parse: {e}"),
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        atomic_write_json(&path, &vec![1u32, 2, 3]).unwrap();
        let loaded: Option<Vec<u32>> = load_json_or_quarantine(&path).unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_corrupt_file_is_quarantined() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "{not json").unwrap();

        let loaded: Option<Vec<u32>> = load_json_or_quarantine(&path).unwrap();
        assert!(loaded.is_none());
        assert!(!path.exists());
        assert!(path.with_extension("json.corrupt").exists());
    }

    #[test]
    fn test_corrupt_source_of_truth_refuses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        std::fs::write(&path, "][").unwrap();
        let result: Result<Option<Vec<u32>>> = load_json_strict(&path);
        assert!(matches!(result, Err(EngineError::CorruptIndex { .. })));
    }

    #[test]
    fn test_sanitize_blocks_traversal() {
        assert_eq!(sanitize_component("../../etc"), ".._.._etc");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("user-1"), "user-1");
    }

    #[test]
    fn test_store_paths_layout() {
        let dir = tempdir().unwrap();
        let paths = StorePaths::new(dir.path(), "u1", "c1");
        paths.ensure().unwrap();
        assert!(paths.indexes_dir().is_dir());
        assert!(paths.contradictions_dir().is_dir());
        assert!(paths.nodes().ends_with("u1/c1/nodes.json"));
    }
}
