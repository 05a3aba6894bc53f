//! Deletion propagation and orphan-relation cleanup (§4.7).
//!
//! Deleting a file removes every point `find_entities_for_file` turns up for it, then triggers
//! a sweep that removes any relation whose endpoints no longer resolve against the collection.
//! The sweep operates on a single `scroll` snapshot so a concurrent parse/delete between two
//! separate queries can never manufacture a false-positive orphan.

use serde_json::Value;
use std::collections::HashSet;

use crate::entity::is_external_file_reference;
use crate::error::{IndexError, Result};
use crate::state_store::StateStore;
use crate::vector_store::VectorStore;

/// Removes every point belonging to `abs_path` (by `file_path` or `entity_name`), drops its
/// state record, and runs orphan cleanup. `rel_path` is the key used in the state store.
pub fn delete_file(
    store: &dyn VectorStore,
    collection: &str,
    state: &mut StateStore,
    abs_path: &str,
    rel_path: &str,
) -> Result<usize> {
    let points = store.find_entities_for_file(collection, abs_path)?;
    let ids: Vec<u64> = points.iter().map(|p| p.id).collect();
    store.delete_points(collection, &ids)?;
    state.delete_file_record(rel_path);
    cleanup_orphaned_relations(store, collection)?;
    Ok(ids.len())
}

/// A dotted/relative import name "resolves" against the entity-name set `E` if:
/// - it matches an entity name exactly,
/// - stripping one or more leading dots (a relative import like `.chat.parser`) and matching
///   against any entity whose name ends with the remaining dotted path, or
/// - a bare package/module segment (no dots) matches a path component of any entity name (a
///   directory-style match, e.g. `pkg` resolving against `/repo/pkg/mod.py`).
fn resolves_to_entity(name: &str, entities: &HashSet<String>) -> bool {
    if entities.contains(name) {
        return true;
    }

    let stripped = name.trim_start_matches('.');
    if stripped != name && !stripped.is_empty() {
        let suffix = format!("::{}", stripped.replace('.', "::"));
        if entities.iter().any(|e| e.ends_with(stripped) || e.ends_with(&suffix)) {
            return true;
        }
        let last_segment = stripped.rsplit('.').next().unwrap_or(stripped);
        if entities.iter().any(|e| e == last_segment || e.ends_with(&format!("/{last_segment}"))) {
            return true;
        }
    }

    if !name.contains('.') && !name.is_empty() {
        let as_dir = format!("/{name}/");
        if entities.iter().any(|e| e.contains(&as_dir) || e.ends_with(&format!("/{name}"))) {
            return true;
        }
    }

    false
}

/// Sweeps a collection for relations whose `from`/`to` no longer resolve to a live entity.
/// Runs on one consistent `scroll` snapshot (see module docs). Returns the number deleted.
pub fn cleanup_orphaned_relations(store: &dyn VectorStore, collection: &str) -> Result<usize> {
    let points = store.scroll(collection, None)?;

    let mut entity_names: HashSet<String> = HashSet::new();
    let mut relation_point_ids: Vec<(u64, String, String)> = Vec::new();

    for point in &points {
        let chunk_kind = point.payload.get("chunk_kind").and_then(Value::as_str);
        match chunk_kind {
            Some("relation") => {
                let from = point.payload.get("entity_name").and_then(Value::as_str).unwrap_or("");
                let to = point.payload.get("relation_target").and_then(Value::as_str).unwrap_or("");
                relation_point_ids.push((point.id, from.to_string(), to.to_string()));
            }
            _ => {
                if let Some(name) = point.payload.get("entity_name").and_then(Value::as_str) {
                    entity_names.insert(name.to_string());
                }
            }
        }
    }

    let mut orphaned = Vec::new();
    for (id, from, to) in &relation_point_ids {
        let from_missing = !resolves_to_entity(from, &entity_names);
        let to_is_external = is_external_file_reference(to);
        let to_missing = !to_is_external && !resolves_to_entity(to, &entity_names);
        if from_missing || to_missing {
            orphaned.push(*id);
        }
    }

    if !orphaned.is_empty() {
        store.delete_points(collection, &orphaned)?;
    }

    if let Err(message) = verify_no_orphans_remain(store, collection) {
        return Err(IndexError::InvariantViolation { message });
    }

    Ok(orphaned.len())
}

/// Re-checks I1 after a cleanup pass: every relation's endpoints must now resolve. A failure
/// here means the module-resolution heuristic under- or over-matched on this run's data and is
/// logged as an `InvariantViolation` rather than retried automatically (§7).
fn verify_no_orphans_remain(store: &dyn VectorStore, collection: &str) -> std::result::Result<(), String> {
    let points = store.scroll(collection, None).map_err(|e| e.to_string())?;
    let mut entity_names: HashSet<String> = HashSet::new();
    let mut relations: Vec<(String, String)> = Vec::new();
    for point in &points {
        match point.payload.get("chunk_kind").and_then(Value::as_str) {
            Some("relation") => {
                let from = point.payload.get("entity_name").and_then(Value::as_str).unwrap_or("").to_string();
                let to = point.payload.get("relation_target").and_then(Value::as_str).unwrap_or("").to_string();
                relations.push((from, to));
            }
            _ => {
                if let Some(name) = point.payload.get("entity_name").and_then(Value::as_str) {
                    entity_names.insert(name.to_string());
                }
            }
        }
    }
    for (from, to) in relations {
        let from_ok = resolves_to_entity(&from, &entity_names);
        let to_ok = is_external_file_reference(&to) || resolves_to_entity(&to, &entity_names);
        if !from_ok || !to_ok {
            return Err(format!("relation {from} -> {to} survived cleanup with a dangling endpoint"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::LocalVectorStore;
    use serde_json::{json, Map};

    fn entity_point(id: u64, name: &str) -> crate::vector_store::Point {
        let mut payload = Map::new();
        payload.insert("chunk_kind".into(), json!("metadata"));
        payload.insert("entity_name".into(), json!(name));
        crate::vector_store::Point { id, vector: vec![0.0], payload }
    }

    fn relation_point(id: u64, from: &str, to: &str) -> crate::vector_store::Point {
        let mut payload = Map::new();
        payload.insert("chunk_kind".into(), json!("relation"));
        payload.insert("entity_name".into(), json!(from));
        payload.insert("relation_target".into(), json!(to));
        crate::vector_store::Point { id, vector: vec![0.0], payload }
    }

    #[test]
    fn orphan_relation_with_missing_target_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 1).unwrap();
        store
            .upsert("c", vec![entity_point(1, "a.py"), relation_point(2, "a.py", "gone_entity")])
            .unwrap();

        let deleted = cleanup_orphaned_relations(&store, "c").unwrap();
        assert_eq!(deleted, 1);
        assert!(store.scroll("c", None).unwrap().iter().all(|p| p.id != 2));
    }

    #[test]
    fn external_file_reference_relation_survives_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 1).unwrap();
        store
            .upsert("c", vec![entity_point(1, "loader.py"), relation_point(2, "loader.py", "config.json")])
            .unwrap();

        let deleted = cleanup_orphaned_relations(&store, "c").unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(store.scroll("c", None).unwrap().len(), 2);
    }

    #[test]
    fn relative_import_resolves_against_qualified_entity_path() {
        let entities: HashSet<String> = ["/repo/chat/parser.py".to_string()].into_iter().collect();
        assert!(resolves_to_entity(".chat.parser", &entities));
    }

    #[test]
    fn delete_file_removes_points_and_state_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 1).unwrap();
        store.upsert("c", vec![entity_point(1, "/repo/a.py")]).unwrap();

        let mut state = StateStore::empty(&dir.path().join("c.json"));
        state.put_file_record(
            "a.py",
            crate::state_store::FileRecord { sha256: "x".into(), size: 1, mtime: 0.0 },
        );

        let removed = delete_file(&store, "c", &mut state, "/repo/a.py", "a.py").unwrap();
        assert_eq!(removed, 1);
        assert!(!state.contains("a.py"));
    }
}
