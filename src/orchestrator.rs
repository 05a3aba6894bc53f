//! Drives one full or incremental indexing run end-to-end (§4.8), aggregating metrics, errors,
//! and embedding costs into an `IndexingResult`.

use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};

use crate::change_detector::{self, ChangedFile};
use crate::cleanup;
use crate::config::Config;
use crate::content_processor::{self, ProcessingContext};
use crate::embedder::Embedder;
use crate::entity::{Chunk, Entity, Relation};
use crate::error::{IndexError, Result};
use crate::parser_registry::ParserRegistry;
use crate::state_store::{FileRecord, StateStore, Statistics};
use crate::vector_store::VectorStore;

/// Whether a run processes only changed files or reprocesses every current candidate. The CLI
/// decides which to pass based on whether a state file already exists; the orchestrator itself
/// never inspects the filesystem to infer this (§9 redesign note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Incremental,
    Full,
}

#[derive(Debug, Clone, Default)]
pub struct IndexingResult {
    pub files_processed: usize,
    pub entities_created: usize,
    pub relations_created: usize,
    pub implementation_chunks_created: usize,
    pub points_upserted: usize,
    pub points_deleted: usize,
    pub skipped: usize,
    pub failed_embeddings: usize,
    pub failed_files: Vec<String>,
    pub tokens: u64,
    pub cost: f64,
    pub requests: u64,
    pub processing_time_secs: f64,
    pub errors: Vec<String>,
}

pub struct OrchestratorCtx<'a> {
    pub project_root: &'a Path,
    pub target: &'a Path,
    pub config: &'a Config,
    pub registry: &'a ParserRegistry,
    pub embedder: &'a dyn Embedder,
    pub store: &'a dyn VectorStore,
}

/// Runs one invocation of the pipeline, per §4.8's ten-step procedure.
pub fn run(mode: Mode, ctx: &OrchestratorCtx) -> Result<IndexingResult> {
    let started = Instant::now();
    let mut result = IndexingResult::default();

    let state_path = ctx.config.state_file_for(ctx.project_root);
    let mut state = match StateStore::load(&state_path) {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "state file unreadable or malformed, falling back to empty state");
            result.errors.push(err.to_string());
            StateStore::empty(&state_path)
        }
    };

    let change_set = change_detector::detect_changes(ctx.project_root, ctx.target, ctx.config, &state);

    if change_set.is_empty() && mode == Mode::Incremental {
        info!("no changes detected, nothing to do");
        state.put_statistics(stats_from(&result, started));
        state.save()?;
        return Ok(result);
    }

    ctx.store.ensure_collection(&ctx.config.collection, ctx.embedder.vector_size())?;

    let files_to_process: Vec<&ChangedFile> = match mode {
        Mode::Incremental => change_set.changed().collect(),
        Mode::Full => change_set.all_for_full_run().collect(),
    };

    let mut all_entities: Vec<Entity> = Vec::new();
    let mut all_relations: Vec<Relation> = Vec::new();
    let mut all_impl_chunks: Vec<Chunk> = Vec::new();
    let mut changed_entity_names: HashSet<String> = HashSet::new();
    let mut entities_with_impl: HashSet<String> = HashSet::new();
    let mut new_records: Vec<(String, FileRecord)> = Vec::new();

    for file in &files_to_process {
        let abs_path_str = file.abs_path.to_string_lossy().replace('\\', "/");

        // Before parsing, delete any existing points for this path: handles rename-in-place
        // semantics without producing duplicates.
        if let Err(err) = cleanup::delete_file(
            ctx.store,
            &ctx.config.collection,
            &mut state,
            &abs_path_str,
            &file.rel_path,
        ) {
            if err.is_run_fatal() {
                return Err(err);
            }
            warn!(path = %file.rel_path, error = %err, "pre-parse cleanup failed");
        }

        let Some(parser) = ctx.registry.parser_for(&file.abs_path) else {
            warn!(path = %file.rel_path, "no parser claims this extension, skipping");
            continue;
        };

        let bytes = match std::fs::read(&file.abs_path) {
            Ok(b) => b,
            Err(err) => {
                result.failed_files.push(file.rel_path.clone());
                result.errors.push(
                    IndexError::Parse { path: file.abs_path.clone(), message: err.to_string() }.to_string(),
                );
                continue;
            }
        };

        let parsed = parser.parse(ctx.project_root, &file.abs_path, &file.rel_path, &bytes);
        if !parsed.errors.is_empty() {
            result.failed_files.push(file.rel_path.clone());
            for e in &parsed.errors {
                result.errors.push(format!("{}: {e}", file.rel_path));
            }
            // Per §4.8: a parse failure is isolated; the state record for this file is not
            // updated, so the next run treats it as still-changed.
            continue;
        }
        for w in &parsed.warnings {
            warn!(path = %file.rel_path, warning = %w, "parser warning");
        }

        for e in &parsed.entities {
            changed_entity_names.insert(e.name.clone());
        }
        for chunk in &parsed.impl_chunks {
            entities_with_impl.insert(chunk.entity_name().to_string());
        }

        all_entities.extend(parsed.entities);
        all_relations.extend(parsed.relations);
        all_impl_chunks.extend(parsed.impl_chunks);

        new_records.push((
            file.rel_path.clone(),
            FileRecord { sha256: file.sha256.clone(), size: file.size, mtime: file.mtime },
        ));
        result.files_processed += 1;
    }

    result.entities_created = all_entities.len();
    result.relations_created = all_relations.len();
    result.implementation_chunks_created = all_impl_chunks.len();

    let batch_size = ctx.config.batch_size.max(1);
    for entity_batch in all_entities.chunks(batch_size) {
        let proc_ctx = ProcessingContext {
            collection: &ctx.config.collection,
            changed_entities: &changed_entity_names,
            entities_with_implementation: &entities_with_impl,
        };
        let processed = content_processor::process(
            entity_batch,
            &[],
            &[],
            &proc_ctx,
            ctx.embedder,
            ctx.config.embedder.max_tokens,
            ctx.store,
        )?;
        absorb(&mut result, &processed);
        ctx.store
            .upsert(&ctx.config.collection, processed.points.clone())
            .map_err(|err| {
                result.errors.push(err.to_string());
                err
            })?;
    }

    for relation_batch in all_relations.chunks(batch_size) {
        let proc_ctx = ProcessingContext {
            collection: &ctx.config.collection,
            changed_entities: &changed_entity_names,
            entities_with_implementation: &entities_with_impl,
        };
        let processed = content_processor::process(
            &[],
            relation_batch,
            &[],
            &proc_ctx,
            ctx.embedder,
            ctx.config.embedder.max_tokens,
            ctx.store,
        )?;
        absorb(&mut result, &processed);
        ctx.store.upsert(&ctx.config.collection, processed.points.clone())?;
    }

    for chunk_batch in all_impl_chunks.chunks(batch_size) {
        let proc_ctx = ProcessingContext {
            collection: &ctx.config.collection,
            changed_entities: &changed_entity_names,
            entities_with_implementation: &entities_with_impl,
        };
        let processed = content_processor::process(
            &[],
            &[],
            chunk_batch,
            &proc_ctx,
            ctx.embedder,
            ctx.config.embedder.max_tokens,
            ctx.store,
        )?;
        absorb(&mut result, &processed);
        ctx.store.upsert(&ctx.config.collection, processed.points.clone())?;
    }

    for rel_path in &change_set.deleted {
        let abs_path = ctx.project_root.join(rel_path).to_string_lossy().replace('\\', "/");
        match cleanup::delete_file(ctx.store, &ctx.config.collection, &mut state, &abs_path, rel_path) {
            Ok(n) => result.points_deleted += n,
            Err(err) if err.is_run_fatal() => return Err(err),
            Err(err) => {
                warn!(path = %rel_path, error = %err, "deletion failed");
                result.errors.push(err.to_string());
            }
        }
    }

    match cleanup::cleanup_orphaned_relations(ctx.store, &ctx.config.collection) {
        Ok(n) => result.points_deleted += n,
        Err(err @ IndexError::InvariantViolation { .. }) => {
            tracing::error!(error = %err, "orphan cleanup invariant violated");
            result.errors.push(err.to_string());
        }
        Err(err) => return Err(err),
    }

    for (rel_path, record) in new_records {
        state.put_file_record(rel_path, record);
    }
    state.put_statistics(stats_from(&result, started));
    state.save()?;

    result.processing_time_secs = started.elapsed().as_secs_f64();
    info!(
        files = result.files_processed,
        upserted = result.points_upserted,
        deleted = result.points_deleted,
        skipped = result.skipped,
        "run complete"
    );
    Ok(result)
}

fn absorb(result: &mut IndexingResult, processed: &content_processor::ProcessingResult) {
    result.points_upserted += processed.points.len();
    result.skipped += processed.skipped;
    result.failed_embeddings += processed.failed;
    result.tokens += processed.tokens;
    result.cost += processed.cost;
    result.requests += processed.requests;
}

fn stats_from(result: &IndexingResult, started: Instant) -> Statistics {
    Statistics {
        files_processed: result.files_processed,
        entities_created: result.entities_created,
        relations_created: result.relations_created,
        implementation_chunks_created: result.implementation_chunks_created,
        processing_time: started.elapsed().as_secs_f64(),
        timestamp: 0.0, // stamped by the caller if wall-clock time is needed; unavailable here.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingResult;
    use crate::vector_store::LocalVectorStore;
    use std::sync::Mutex;

    struct FixedEmbedder {
        dims: usize,
        calls: Mutex<u64>,
    }

    impl Embedder for FixedEmbedder {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<EmbeddingResult>>> {
            *self.calls.lock().unwrap() += 1;
            Ok(texts
                .iter()
                .map(|t| {
                    if t.trim().is_empty() {
                        None
                    } else {
                        Some(EmbeddingResult { vector: vec![0.1; self.dims], tokens: t.len().max(1) })
                    }
                })
                .collect())
        }
        fn vector_size(&self) -> usize {
            self.dims
        }
    }

    #[test]
    fn fresh_index_then_rerun_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f(): return 1").unwrap();
        std::fs::write(dir.path().join("b.md"), "# Title\nbody\n").unwrap();

        let config = Config::default();
        let registry = ParserRegistry::default_registry();
        let embedder = FixedEmbedder { dims: 4, calls: Mutex::new(0) };
        let store = LocalVectorStore::open(&config.points_file_for(dir.path())).unwrap();

        let ctx = OrchestratorCtx {
            project_root: dir.path(),
            target: dir.path(),
            config: &config,
            registry: &registry,
            embedder: &embedder,
            store: &store,
        };

        let first = run(Mode::Incremental, &ctx).unwrap();
        assert!(first.files_processed >= 2);
        assert!(first.points_upserted > 0);

        let second = run(Mode::Incremental, &ctx).unwrap();
        assert_eq!(second.files_processed, 0);
        assert_eq!(second.points_upserted, 0);
    }

    #[test]
    fn modifying_one_file_leaves_the_others_chunks_untouched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f(): return 1").unwrap();
        std::fs::write(dir.path().join("b.md"), "# Title\nbody\n").unwrap();

        let config = Config::default();
        let registry = ParserRegistry::default_registry();
        let embedder = FixedEmbedder { dims: 4, calls: Mutex::new(0) };
        let store = LocalVectorStore::open(&config.points_file_for(dir.path())).unwrap();
        let ctx = OrchestratorCtx {
            project_root: dir.path(),
            target: dir.path(),
            config: &config,
            registry: &registry,
            embedder: &embedder,
            store: &store,
        };

        run(Mode::Incremental, &ctx).unwrap();
        let before = store.scroll(&config.collection, None).unwrap();
        let md_point_before = before
            .iter()
            .find(|p| p.payload.get("entity_name").and_then(|v| v.as_str()) == Some("Title"))
            .cloned();

        std::fs::write(dir.path().join("a.py"), "def f(): return 2").unwrap();
        run(Mode::Incremental, &ctx).unwrap();

        let after = store.scroll(&config.collection, None).unwrap();
        let md_point_after = after
            .iter()
            .find(|p| p.payload.get("entity_name").and_then(|v| v.as_str()) == Some("Title"))
            .cloned();
        assert_eq!(md_point_before.unwrap().id, md_point_after.unwrap().id);
    }

    #[test]
    fn deleting_a_file_removes_its_points_and_state_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f(): return 1").unwrap();

        let config = Config::default();
        let registry = ParserRegistry::default_registry();
        let embedder = FixedEmbedder { dims: 4, calls: Mutex::new(0) };
        let store = LocalVectorStore::open(&config.points_file_for(dir.path())).unwrap();
        let ctx = OrchestratorCtx {
            project_root: dir.path(),
            target: dir.path(),
            config: &config,
            registry: &registry,
            embedder: &embedder,
            store: &store,
        };
        run(Mode::Incremental, &ctx).unwrap();

        std::fs::remove_file(dir.path().join("a.py")).unwrap();
        run(Mode::Incremental, &ctx).unwrap();

        let remaining = store.scroll(&config.collection, None).unwrap();
        assert!(remaining
            .iter()
            .all(|p| p.payload.get("file_path").and_then(|v| v.as_str()).map(|s| !s.ends_with("a.py")).unwrap_or(true)));

        let state = StateStore::load(&config.state_file_for(dir.path())).unwrap();
        assert!(!state.contains("a.py"));
    }
}
