//! Per-collection on-disk map of `relative_path -> {sha256, size, mtime}` (§4.3).
//!
//! Writes are transactional at file granularity: every `save` goes through a sibling
//! temp file followed by a rename, so a process killed mid-write never leaves a
//! half-written state file behind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub sha256: String,
    pub size: u64,
    pub mtime: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub files_processed: usize,
    pub entities_created: usize,
    pub relations_created: usize,
    pub implementation_chunks_created: usize,
    pub processing_time: f64,
    pub timestamp: f64,
}

const STATISTICS_KEY: &str = "_statistics";

/// Best-effort migration from the pre-project-local global state directory. No-op (not an
/// error) when `$HOME` is unavailable, the legacy file doesn't exist, or the copy fails for any
/// reason — the project simply starts with an empty state, same as a first-ever run.
fn migrate_legacy_global_state(new_path: &Path) {
    let Some(filename) = new_path.file_name() else { return };
    let Some(home) = dirs::home_dir() else { return };
    let legacy_path = home.join(".claude-indexer").join("state").join(filename);
    if !legacy_path.exists() {
        return;
    }
    let Ok(contents) = std::fs::read_to_string(&legacy_path) else { return };
    if let Some(parent) = new_path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    if std::fs::write(new_path, &contents).is_err() {
        return;
    }
    let _ = std::fs::remove_file(&legacy_path);
    tracing::info!(
        from = %legacy_path.display(),
        to = %new_path.display(),
        "migrated legacy global state file"
    );
}

#[derive(Debug, Clone, Default)]
pub struct StateStore {
    path: PathBuf,
    records: BTreeMap<String, FileRecord>,
    statistics: Option<Statistics>,
}

impl StateStore {
    /// Loads the state file at `path`. A missing file is an empty, fresh store. A malformed
    /// file is a `StateError`: the caller (orchestrator) treats it as empty and emits a
    /// warning, per §7, rather than propagating the error as run-fatal.
    ///
    /// Before reading, transparently migrates from the legacy global location
    /// `~/.claude-indexer/state/<collection>.json` if the project-local file doesn't exist yet
    /// (§4.3) — copies the content in, then removes the old file. Migration failures are
    /// swallowed: a missing `$HOME` or an unwritable legacy file just leaves the project
    /// starting fresh, same as if no legacy file had ever existed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            migrate_legacy_global_state(path);
        }

        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    path: path.to_path_buf(),
                    records: BTreeMap::new(),
                    statistics: None,
                })
            }
            Err(err) => {
                return Err(IndexError::State {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                })
            }
        };

        let mut raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&text).map_err(|err| IndexError::State {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;

        let statistics = raw
            .remove(STATISTICS_KEY)
            .and_then(|v| serde_json::from_value(v).ok());

        let mut records = BTreeMap::new();
        for (k, v) in raw {
            if let Ok(record) = serde_json::from_value::<FileRecord>(v) {
                records.insert(k, record);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            records,
            statistics,
        })
    }

    /// Empty store bound to `path`, used after a `StateError` fallback.
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            records: BTreeMap::new(),
            statistics: None,
        }
    }

    pub fn get_file_record(&self, rel_path: &str) -> Option<&FileRecord> {
        self.records.get(rel_path)
    }

    pub fn put_file_record(&mut self, rel_path: impl Into<String>, record: FileRecord) {
        self.records.insert(rel_path.into(), record);
    }

    pub fn delete_file_record(&mut self, rel_path: &str) {
        self.records.remove(rel_path);
    }

    pub fn put_statistics(&mut self, stats: Statistics) {
        self.statistics = Some(stats);
    }

    pub fn statistics(&self) -> Option<&Statistics> {
        self.statistics.as_ref()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn records(&self) -> &BTreeMap<String, FileRecord> {
        &self.records
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        self.records.contains_key(rel_path)
    }

    /// Writes the full document (records + `_statistics`) via temp-file-then-rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| IndexError::State {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        }

        let mut doc = serde_json::Map::new();
        for (k, v) in &self.records {
            doc.insert(k.clone(), serde_json::to_value(v).unwrap());
        }
        if let Some(stats) = &self.statistics {
            doc.insert(STATISTICS_KEY.to_string(), serde_json::to_value(stats).unwrap());
        }

        let text = serde_json::to_string_pretty(&doc).map_err(|err| IndexError::State {
            path: self.path.clone(),
            message: err.to_string(),
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, text).map_err(|err| IndexError::State {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|err| IndexError::State {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_records_and_statistics() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proj.json");

        let mut store = StateStore::load(&path).unwrap();
        store.put_file_record(
            "src/a.py",
            FileRecord {
                sha256: "abc".into(),
                size: 10,
                mtime: 1.0,
            },
        );
        store.put_statistics(Statistics {
            files_processed: 1,
            ..Default::default()
        });
        store.save().unwrap();

        let reloaded = StateStore::load(&path).unwrap();
        assert_eq!(reloaded.get_file_record("src/a.py").unwrap().sha256, "abc");
        assert_eq!(reloaded.statistics().unwrap().files_processed, 1);
    }

    #[test]
    fn malformed_file_is_a_state_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proj.json");
        std::fs::write(&path, "not json at all").unwrap();
        assert!(StateStore::load(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let store = StateStore::load(&path).unwrap();
        assert_eq!(store.records().len(), 0);
    }

    #[test]
    fn delete_file_record_removes_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proj.json");
        let mut store = StateStore::load(&path).unwrap();
        store.put_file_record(
            "a.py",
            FileRecord {
                sha256: "x".into(),
                size: 1,
                mtime: 0.0,
            },
        );
        store.delete_file_record("a.py");
        assert!(!store.contains("a.py"));
    }
}
