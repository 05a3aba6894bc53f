//! Diffs the current file tree against the loaded state store (§4.4).

use glob::Pattern;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::entity::file_hash;
use crate::scanner::{scan_workspace, FileEntry, ScanOptions};
use crate::state_store::StateStore;

#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub sha256: String,
    pub size: u64,
    pub mtime: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<ChangedFile>,
    pub modified: Vec<ChangedFile>,
    pub deleted: Vec<String>,
    /// Present in both trees with an unchanged hash — skipped by an incremental run, but
    /// reprocessed by `Mode::Full` (§4.8/§9 redesign: an explicit mode, not filesystem sniffing).
    pub unchanged: Vec<ChangedFile>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Files an incremental run must parse: newly seen or content-changed.
    pub fn changed(&self) -> impl Iterator<Item = &ChangedFile> {
        self.added.iter().chain(self.modified.iter())
    }

    /// Files a full run must parse: every current candidate, changed or not.
    pub fn all_for_full_run(&self) -> impl Iterator<Item = &ChangedFile> {
        self.added.iter().chain(self.modified.iter()).chain(self.unchanged.iter())
    }
}

fn matches_any(patterns: &[Pattern], rel_path: &str) -> bool {
    patterns.iter().any(|p| p.matches(rel_path))
}

fn compile_patterns(raw: &[String]) -> Vec<Pattern> {
    raw.iter().filter_map(|p| Pattern::new(p).ok()).collect()
}

fn passes_globs(entry: &FileEntry, include: &[Pattern], exclude: &[Pattern]) -> bool {
    let rel = entry.rel_path.to_string_lossy().replace('\\', "/");
    if !include.is_empty() && !matches_any(include, &rel) {
        return false;
    }
    if matches_any(exclude, &rel) {
        return false;
    }
    true
}

fn file_mtime_secs(path: &Path) -> f64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Enumerates the tree rooted at `target` (defaulting to `project_root` when equal), applies
/// include/exclude globs and the max-size cutoff, hashes candidates in parallel, and diffs
/// against `state` to produce the three disjoint lists `{added, modified, deleted}`.
pub fn detect_changes(project_root: &Path, target: &Path, config: &Config, state: &StateStore) -> ChangeSet {
    let opts = ScanOptions {
        repo_root: project_root.to_path_buf(),
        target: target.to_path_buf(),
        max_file_bytes: config.max_file_size,
        exclude_dir_names: config.exclude_dir_names.clone(),
    };

    let entries = scan_workspace(&opts).unwrap_or_default();
    let include = compile_patterns(&config.include);
    let exclude = compile_patterns(&config.exclude);

    let candidates: Vec<&FileEntry> = entries
        .iter()
        .filter(|e| passes_globs(e, &include, &exclude))
        .collect();

    let candidate_rel_paths: std::collections::HashSet<String> = candidates
        .iter()
        .map(|e| e.rel_path.to_string_lossy().replace('\\', "/"))
        .collect();

    let hashed: Vec<ChangedFile> = candidates
        .par_iter()
        .filter_map(|entry| {
            let bytes = std::fs::read(&entry.abs_path).ok()?;
            let sha256 = file_hash(&bytes);
            let rel_path = entry.rel_path.to_string_lossy().replace('\\', "/");
            Some(ChangedFile {
                abs_path: entry.abs_path.clone(),
                rel_path,
                sha256,
                size: entry.bytes,
                mtime: file_mtime_secs(&entry.abs_path),
            })
        })
        .collect();

    let mut set = ChangeSet::default();
    for file in hashed {
        match state.get_file_record(&file.rel_path) {
            None => set.added.push(file),
            Some(record) if record.sha256 != file.sha256 => set.modified.push(file),
            Some(_) => set.unchanged.push(file), // skipped by an incremental run; see `all_for_full_run`.
        }
    }

    for path in state.paths() {
        if !candidate_rel_paths.contains(path) {
            set.deleted.push(path.to_string());
        }
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::FileRecord;
    use tempfile::tempdir;

    #[test]
    fn fresh_tree_is_all_added() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f(): return 1").unwrap();
        let config = Config::default();
        let state = StateStore::empty(&dir.path().join(".claude-indexer/default.json"));
        let set = detect_changes(dir.path(), dir.path(), &config, &state);
        assert_eq!(set.added.len(), 1);
        assert!(set.modified.is_empty());
        assert!(set.deleted.is_empty());
    }

    #[test]
    fn unchanged_file_produces_no_changes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f(): return 1").unwrap();
        let config = Config::default();
        let mut state = StateStore::empty(&dir.path().join(".claude-indexer/default.json"));
        let bytes = std::fs::read(dir.path().join("a.py")).unwrap();
        state.put_file_record(
            "a.py",
            FileRecord {
                sha256: file_hash(&bytes),
                size: bytes.len() as u64,
                mtime: 0.0,
            },
        );
        let set = detect_changes(dir.path(), dir.path(), &config, &state);
        assert!(set.is_empty());
    }

    #[test]
    fn hash_change_is_modified_and_missing_file_is_deleted() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f(): return 2").unwrap();
        let config = Config::default();
        let mut state = StateStore::empty(&dir.path().join(".claude-indexer/default.json"));
        state.put_file_record(
            "a.py",
            FileRecord {
                sha256: "stale".into(),
                size: 1,
                mtime: 0.0,
            },
        );
        state.put_file_record(
            "gone.py",
            FileRecord {
                sha256: "stale".into(),
                size: 1,
                mtime: 0.0,
            },
        );
        let set = detect_changes(dir.path(), dir.path(), &config, &state);
        assert_eq!(set.modified.len(), 1);
        assert_eq!(set.deleted, vec!["gone.py".to_string()]);
    }

    #[test]
    fn max_file_size_excludes_oversized_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), vec![b'x'; 2048]).unwrap();
        let mut config = Config::default();
        config.max_file_size = 1024;
        let state = StateStore::empty(&dir.path().join(".claude-indexer/default.json"));
        let set = detect_changes(dir.path(), dir.path(), &config, &state);
        assert!(set.added.is_empty());
    }
}
