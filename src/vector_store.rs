//! Vector Store Adapter: a thin contract over the vector backend (upsert, scroll, filter,
//! delete, find-by-file), plus `LocalVectorStore`, a concrete embedded/file-backed adapter.
//!
//! The adapter stores points as an in-memory index mirrored to a JSON file under
//! `.claude-indexer/<collection>.points.json`, persisted on every mutating call — the same
//! load/save discipline the rest of this crate's state uses, generalized to the full
//! chunk/point/payload model. Cosine similarity search follows a two-stage scoring scheme:
//! an exact symbol-name match wins outright, falling back to cosine distance otherwise.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tracing::warn;

use crate::config::DEFAULT_SCROLL_ITERATION_CAP;
use crate::error::{IndexError, Result};

const SCROLL_PAGE_SIZE: usize = 256;

/// Guaranteed score assigned to a point whose `entity_name` exactly matches the query text
/// (case-insensitive). Sits permanently above the cosine ceiling (1.0).
const EXACT_NAME_SCORE: f32 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub point: Point,
    pub score: f32,
}

/// A conjunction of payload equality checks. `find_entities_for_file` uses its own OR logic
/// directly rather than going through this type.
#[derive(Debug, Clone, Default)]
pub struct ScrollFilter {
    equals: Vec<(String, Value)>,
}

impl ScrollFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { equals: vec![(field.into(), value.into())] }
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    fn matches(&self, payload: &Map<String, Value>) -> bool {
        self.equals.iter().all(|(k, v)| payload.get(k) == Some(v))
    }
}

pub trait VectorStore: Send + Sync {
    fn ensure_collection(&self, name: &str, vector_size: usize) -> Result<()>;
    fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()>;
    fn scroll(&self, name: &str, filter: Option<&ScrollFilter>) -> Result<Vec<Point>>;
    fn find_entities_for_file(&self, name: &str, file_path: &str) -> Result<Vec<Point>>;
    fn delete_points(&self, name: &str, ids: &[u64]) -> Result<()>;
    fn search(
        &self,
        name: &str,
        query_vector: &[f32],
        query_text: Option<&str>,
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<&ScrollFilter>,
    ) -> Result<Vec<SearchHit>>;
    fn check_content_exists(&self, name: &str, content_hash: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CollectionData {
    vector_size: usize,
    points: BTreeMap<u64, Point>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDoc {
    collections: HashMap<String, CollectionData>,
}

pub struct LocalVectorStore {
    path: PathBuf,
    timeout: Duration,
    inner: Mutex<StoreDoc>,
}

/// Pages through `points` `page_size` at a time, applying `filter` to each page. Bails out
/// once more than `iteration_cap` pages have been scanned (S6/P11): a collection large enough
/// to trip this returns a truncated result rather than looping unbounded, and logs a warning so
/// the truncation is visible instead of silently dropping matches.
fn scroll_paged<'a>(
    collection_name: &str,
    points: impl Iterator<Item = &'a Point>,
    filter: Option<&ScrollFilter>,
    page_size: usize,
    iteration_cap: usize,
) -> Vec<Point> {
    let all: Vec<&Point> = points.collect();
    let mut matched = Vec::new();
    let mut iterations = 0usize;
    let mut offset = 0usize;
    while offset < all.len() {
        iterations += 1;
        if iterations > iteration_cap {
            warn!(
                collection = collection_name,
                iterations,
                cap = iteration_cap,
                scanned = offset,
                total = all.len(),
                "scroll loop-protection cap exceeded, results truncated"
            );
            break;
        }
        let end = (offset + page_size).min(all.len());
        for point in &all[offset..end] {
            if filter.map(|f| f.matches(&point.payload)).unwrap_or(true) {
                matched.push((*point).clone());
            }
        }
        offset = end;
    }
    matched
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl LocalVectorStore {
    pub fn open(path: &Path) -> Result<Self> {
        let doc = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|err| IndexError::Store {
                collection: "*".to_string(),
                operation: "open".to_string(),
                message: format!("malformed points file {}: {err}", path.display()),
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreDoc::default(),
            Err(err) => {
                return Err(IndexError::Store {
                    collection: "*".to_string(),
                    operation: "open".to_string(),
                    message: err.to_string(),
                })
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            timeout: Duration::from_secs(60),
            inner: Mutex::new(doc),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn save(&self, doc: &StoreDoc) -> Result<()> {
        let store_err = |operation: &str, message: String| IndexError::Store {
            collection: "*".to_string(),
            operation: operation.to_string(),
            message,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| store_err("create_dir_all", format!("{}: {err}", parent.display())))?;
        }
        let text = serde_json::to_string_pretty(doc)
            .map_err(|err| store_err("serialize", err.to_string()))?;
        let tmp_path = self.path.with_extension("points.json.tmp");
        std::fs::write(&tmp_path, text)
            .map_err(|err| store_err("write", format!("{}: {err}", tmp_path.display())))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|err| store_err("rename", format!("{} -> {}: {err}", tmp_path.display(), self.path.display())))?;
        Ok(())
    }

    fn check_timeout(&self, started: Instant, collection: &str, operation: &str) -> Result<()> {
        if started.elapsed() > self.timeout {
            return Err(IndexError::Store {
                collection: collection.to_string(),
                operation: operation.to_string(),
                message: format!("operation exceeded {:?} timeout", self.timeout),
            });
        }
        Ok(())
    }
}

impl VectorStore for LocalVectorStore {
    fn ensure_collection(&self, name: &str, vector_size: usize) -> Result<()> {
        let mut doc = self.inner.lock().unwrap();
        if !doc.collections.contains_key(name) {
            doc.collections.insert(
                name.to_string(),
                CollectionData { vector_size, points: BTreeMap::new() },
            );
            self.save(&doc)?;
        }
        Ok(())
    }

    fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()> {
        let started = Instant::now();
        let mut doc = self.inner.lock().unwrap();
        let collection = doc
            .collections
            .entry(name.to_string())
            .or_insert_with(|| CollectionData {
                vector_size: points.first().map(|p| p.vector.len()).unwrap_or(0),
                points: BTreeMap::new(),
            });
        for point in points {
            collection.points.insert(point.id, point);
        }
        self.check_timeout(started, name, "upsert")?;
        self.save(&doc)
    }

    fn scroll(&self, name: &str, filter: Option<&ScrollFilter>) -> Result<Vec<Point>> {
        let doc = self.inner.lock().unwrap();
        let Some(collection) = doc.collections.get(name) else {
            return Ok(Vec::new());
        };
        Ok(scroll_paged(
            name,
            collection.points.values(),
            filter,
            SCROLL_PAGE_SIZE,
            DEFAULT_SCROLL_ITERATION_CAP,
        ))
    }

    fn find_entities_for_file(&self, name: &str, file_path: &str) -> Result<Vec<Point>> {
        let all = self.scroll(name, None)?;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for point in all {
            let matches_file = point.payload.get("file_path").and_then(Value::as_str) == Some(file_path);
            let matches_entity = point.payload.get("entity_name").and_then(Value::as_str) == Some(file_path);
            if (matches_file || matches_entity) && seen.insert(point.id) {
                out.push(point);
            }
        }
        Ok(out)
    }

    fn delete_points(&self, name: &str, ids: &[u64]) -> Result<()> {
        let mut doc = self.inner.lock().unwrap();
        if let Some(collection) = doc.collections.get_mut(name) {
            for id in ids {
                collection.points.remove(id);
            }
        }
        self.save(&doc)
    }

    fn search(
        &self,
        name: &str,
        query_vector: &[f32],
        query_text: Option<&str>,
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<&ScrollFilter>,
    ) -> Result<Vec<SearchHit>> {
        let candidates = self.scroll(name, filter)?;
        let query_lower = query_text.map(|q| q.trim().to_lowercase());

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .map(|point| {
                let exact = query_lower
                    .as_deref()
                    .and_then(|q| point.payload.get("entity_name").and_then(Value::as_str).map(|n| n.to_lowercase() == q))
                    .unwrap_or(false);
                let score = if exact {
                    EXACT_NAME_SCORE
                } else {
                    cosine_similarity(query_vector, &point.vector)
                };
                SearchHit { point, score }
            })
            .filter(|hit| score_threshold.map(|t| hit.score >= t).unwrap_or(true))
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    fn check_content_exists(&self, name: &str, content_hash: &str) -> Result<bool> {
        let doc = self.inner.lock().unwrap();
        let Some(collection) = doc.collections.get(name) else {
            return Ok(false);
        };
        Ok(collection
            .points
            .values()
            .any(|p| p.payload.get("content_hash").and_then(Value::as_str) == Some(content_hash)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(id: u64, entity_name: &str, file_path: &str, content_hash: &str, vector: Vec<f32>) -> Point {
        let mut payload = Map::new();
        payload.insert("entity_name".into(), json!(entity_name));
        payload.insert("file_path".into(), json!(file_path));
        payload.insert("content_hash".into(), json!(content_hash));
        Point { id, vector, payload }
    }

    #[test]
    fn upsert_then_scroll_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 3).unwrap();
        store
            .upsert("c", vec![point(1, "f", "/a.py", "h1", vec![1.0, 0.0, 0.0])])
            .unwrap();
        let all = store.scroll("c", None).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn find_entities_for_file_matches_either_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 3).unwrap();
        store
            .upsert(
                "c",
                vec![
                    point(1, "f", "/a.py", "h1", vec![1.0, 0.0, 0.0]),
                    point(2, "/a.py", "/other.py", "h2", vec![0.0, 1.0, 0.0]),
                ],
            )
            .unwrap();
        let found = store.find_entities_for_file("c", "/a.py").unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn exact_name_match_outranks_cosine_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 3).unwrap();
        store
            .upsert(
                "c",
                vec![
                    point(1, "ConvertRequest", "/a.py", "h1", vec![0.0, 0.0, 1.0]),
                    point(2, "Unrelated", "/b.py", "h2", vec![1.0, 0.0, 0.0]),
                ],
            )
            .unwrap();
        let hits = store
            .search("c", &[1.0, 0.0, 0.0], Some("ConvertRequest"), 5, None, None)
            .unwrap();
        assert_eq!(hits[0].point.id, 1);
        assert!(hits[0].score >= EXACT_NAME_SCORE);
    }

    #[test]
    fn content_exists_check_finds_matching_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 3).unwrap();
        store
            .upsert("c", vec![point(1, "f", "/a.py", "deadbeef", vec![1.0, 0.0, 0.0])])
            .unwrap();
        assert!(store.check_content_exists("c", "deadbeef").unwrap());
        assert!(!store.check_content_exists("c", "other").unwrap());
    }

    #[test]
    fn scroll_cap_truncates_instead_of_looping_forever() {
        let points: Vec<Point> = (0..5).map(|i| point(i, "f", "/a.py", "h", vec![1.0])).collect();
        // page_size=1 makes each point its own page, so a cap of 2 trips after 2 points even
        // though the collection holds 5 — exercising the break without manufacturing millions
        // of points to outrun the real `SCROLL_PAGE_SIZE`.
        let matched = scroll_paged("c", points.iter(), None, 1, 2);
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn delete_points_removes_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 3).unwrap();
        store
            .upsert("c", vec![point(1, "f", "/a.py", "h1", vec![1.0, 0.0, 0.0])])
            .unwrap();
        store.delete_points("c", &[1]).unwrap();
        assert!(store.scroll("c", None).unwrap().is_empty());
    }
}
