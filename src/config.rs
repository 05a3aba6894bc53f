//! Layered configuration: built-in defaults, overridden by `.claude-indexer.json` at the
//! project root, in turn overridable by CLI flags at the A7 boundary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

/// Files larger than this are always skipped, regardless of config (§4.4, P9).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1_000_000;

/// Scroll's mandatory loop-protection cap (§4.6, P11). Lives here rather than in
/// `vector_store` so it's configuration alongside the other run-wide limits, even though
/// only the vector store consults it.
pub const DEFAULT_SCROLL_ITERATION_CAP: usize = 10_000;

/// Per-call timeout the vector store adapter enforces (§5).
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Vector-space namespace for this project's points.
    pub collection: String,
    /// Glob patterns (relative to project root) a file must match at least one of.
    /// Empty means "match everything not excluded".
    pub include: Vec<String>,
    /// Glob patterns that exclude a file even if it matched `include`.
    pub exclude: Vec<String>,
    /// Directory *names* skipped anywhere in the tree (compared against path components).
    pub exclude_dir_names: Vec<String>,
    pub max_file_size: u64,
    /// Number of chunks embedded and upserted per batch (§5 backpressure).
    pub batch_size: usize,
    pub embedder: EmbedderConfig,
    /// `<root>/.claude-indexer/` by default; overridable for tests.
    pub state_dir: PathBuf,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// HuggingFace model repo id consumed by `model2vec-rs`.
    pub model: String,
    /// Chunk content longer than `max_tokens - 400` is truncated before embedding (§4.5).
    pub max_tokens: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model: "minishlab/potion-retrieval-32M".to_string(),
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Debounce window in milliseconds: rapid writes to the same file within this window
    /// coalesce into one triggered run (P13).
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collection: "default".to_string(),
            include: vec![],
            exclude: vec![],
            exclude_dir_names: vec![],
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            batch_size: 50,
            embedder: EmbedderConfig::default(),
            state_dir: PathBuf::from(".claude-indexer"),
            watch: WatchConfig::default(),
        }
    }
}

impl Config {
    /// Resolve `state_dir` against `project_root`, absolute if already given as one.
    pub fn state_dir_for(&self, project_root: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            project_root.join(&self.state_dir)
        }
    }

    pub fn state_file_for(&self, project_root: &Path) -> PathBuf {
        self.state_dir_for(project_root)
            .join(format!("{}.json", self.collection))
    }

    pub fn points_file_for(&self, project_root: &Path) -> PathBuf {
        self.state_dir_for(project_root)
            .join(format!("{}.points.json", self.collection))
    }
}

/// Loads `.claude-indexer.json` from `project_root`, falling back to defaults when the file
/// is absent. A syntax-invalid file is a hard `ConfigError`: the caller must abort before any
/// I/O against the tree (P12) rather than silently substitute defaults.
pub fn load_config(project_root: &Path) -> Result<Config> {
    let path = project_root.join(".claude-indexer.json");
    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(err) => {
            return Err(IndexError::Config {
                message: format!("failed to read {}: {err}", path.display()),
            })
        }
    };

    serde_json::from_str::<Config>(&text).map_err(|err| IndexError::Config {
        message: format!("invalid config at {}: {err}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load_config(dir.path()).unwrap();
        assert_eq!(cfg.collection, "default");
        assert_eq!(cfg.batch_size, 50);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".claude-indexer.json"), "{ not json").unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(matches!(err, IndexError::Config { .. }));
    }

    #[test]
    fn state_and_points_paths_are_collection_scoped() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.collection = "myproj".to_string();
        assert_eq!(
            cfg.state_file_for(dir.path()),
            dir.path().join(".claude-indexer/myproj.json")
        );
        assert_eq!(
            cfg.points_file_for(dir.path()),
            dir.path().join(".claude-indexer/myproj.points.json")
        );
    }
}
