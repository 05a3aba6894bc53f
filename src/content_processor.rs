//! Deduplicates chunks by content hash, batches embeddings, and builds vector points.
//!
//! Runs in three phases (entity metadata, relations, implementation chunks), sharing one
//! embedding-cost accumulator across all of them.

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::embedder::{Embedder, EmbeddingTelemetry};
use crate::entity::{Chunk, Entity, Relation};
use crate::error::Result;
use crate::vector_store::{Point, VectorStore};

/// Run-scoped context the three phases share.
pub struct ProcessingContext<'a> {
    pub collection: &'a str,
    /// Names of entities touched by this run's change set; empty means "no filter" (a full
    /// run, where every relation is eligible).
    pub changed_entities: &'a HashSet<String>,
    /// Names of entities that have an implementation chunk in this batch, used to set
    /// `has_implementation` on the derived metadata chunk.
    pub entities_with_implementation: &'a HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessingResult {
    pub points: Vec<Point>,
    pub tokens: u64,
    pub cost: f64,
    pub requests: u64,
    pub skipped: usize,
    pub failed: usize,
}

impl ProcessingResult {
    fn absorb_telemetry(&mut self, telemetry: &EmbeddingTelemetry) {
        self.tokens = telemetry.tokens;
        self.cost = telemetry.cost;
        self.requests = telemetry.requests;
    }
}

fn truncate_for_embedding(content: &str, max_tokens: usize) -> String {
    let budget_chars = max_tokens.saturating_sub(400).saturating_mul(4).max(1);
    if content.len() <= budget_chars {
        return content.to_string();
    }
    let mut end = budget_chars;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    content[..end].to_string()
}

fn build_point(
    collection: &str,
    chunk: &Chunk,
) -> Point {
    let mut payload = chunk.to_vector_payload();
    payload.insert("collection".into(), json!(collection));
    payload.insert("type".into(), Value::String("chunk".to_string()));
    Point {
        id: chunk.point_id(),
        vector: Vec::new(),
        payload,
    }
}

/// Embeds and points-ifies the chunks that survive dedup, sharing truncation + telemetry
/// bookkeeping across all three phases.
struct Embedding<'a> {
    embedder: &'a dyn Embedder,
    max_tokens: usize,
    telemetry: EmbeddingTelemetry,
}

impl<'a> Embedding<'a> {
    fn embed_and_point(
        &mut self,
        collection: &str,
        survivors: Vec<Chunk>,
        result: &mut ProcessingResult,
    ) -> Result<()> {
        if survivors.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = survivors
            .iter()
            .map(|c| truncate_for_embedding(c.content(), self.max_tokens))
            .collect();
        let embedded = self.embedder.embed_batch(&texts)?;
        self.telemetry.record(&embedded.iter().flatten().cloned().collect::<Vec<_>>());

        for (chunk, embedding) in survivors.into_iter().zip(embedded.into_iter()) {
            match embedding {
                Some(e) => {
                    let mut point = build_point(collection, &chunk);
                    point.vector = e.vector;
                    result.points.push(point);
                }
                None => result.failed += 1,
            }
        }
        Ok(())
    }
}

pub fn process(
    entities: &[Entity],
    relations: &[Relation],
    impl_chunks: &[Chunk],
    ctx: &ProcessingContext,
    embedder: &dyn Embedder,
    max_tokens: usize,
    store: &dyn VectorStore,
) -> Result<ProcessingResult> {
    let mut result = ProcessingResult::default();
    let mut embedding = Embedding {
        embedder,
        max_tokens,
        telemetry: EmbeddingTelemetry::default(),
    };

    // Phase 1: entity metadata.
    let mut metadata_survivors = Vec::new();
    for entity in entities {
        let has_impl = ctx.entities_with_implementation.contains(&entity.name);
        let chunk = Chunk::create_metadata(entity, has_impl);
        if store.check_content_exists(ctx.collection, &chunk.content_hash())? {
            result.skipped += 1;
            continue;
        }
        metadata_survivors.push(chunk);
    }
    embedding.embed_and_point(ctx.collection, metadata_survivors, &mut result)?;

    // Phase 2: relations, filtered to those touching a changed entity (when the run has a
    // change set at all — a full run passes an empty filter set, meaning "no filter").
    let mut relation_survivors = Vec::new();
    let mut seen_relation_ids = HashSet::new();
    for relation in relations {
        if !ctx.changed_entities.is_empty()
            && !ctx.changed_entities.contains(&relation.from)
            && !ctx.changed_entities.contains(&relation.to)
        {
            continue;
        }
        let chunk = Chunk::from_relation(relation);
        if !seen_relation_ids.insert(chunk.id()) {
            continue;
        }
        if store.check_content_exists(ctx.collection, &chunk.content_hash())? {
            result.skipped += 1;
            continue;
        }
        relation_survivors.push(chunk);
    }
    embedding.embed_and_point(ctx.collection, relation_survivors, &mut result)?;

    // Phase 3: implementation chunks.
    let mut impl_survivors = Vec::new();
    for chunk in impl_chunks {
        if store.check_content_exists(ctx.collection, &chunk.content_hash())? {
            result.skipped += 1;
            continue;
        }
        impl_survivors.push(chunk.clone());
    }
    embedding.embed_and_point(ctx.collection, impl_survivors, &mut result)?;

    result.absorb_telemetry(&embedding.telemetry);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingResult;
    use crate::entity::EntityKind;
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
                    Some(EmbeddingResult {
                        vector: vec![0.1; self.dims],
                        tokens: t.len().max(1),
                    })
                })
                .collect())
        }

        fn vector_size(&self) -> usize {
            self.dims
        }
    }

    #[test]
    fn unchanged_content_is_skipped_on_second_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 4).unwrap();
        let embedder = FixedEmbedder { dims: 4, calls: Mutex::new(0) };

        let entity = Entity::function("f", "/repo/a.py");
        let changed = HashSet::from(["f".to_string()]);
        let with_impl = HashSet::new();
        let ctx = ProcessingContext {
            collection: "c",
            changed_entities: &changed,
            entities_with_implementation: &with_impl,
        };

        let first = process(&[entity.clone()], &[], &[], &ctx, &embedder, 2048, &store).unwrap();
        assert_eq!(first.points.len(), 1);
        store.upsert("c", first.points.clone()).unwrap();

        let second = process(&[entity], &[], &[], &ctx, &embedder, 2048, &store).unwrap();
        assert_eq!(second.points.len(), 0);
        assert_eq!(second.skipped, 1);
    }

    #[test]
    fn relations_not_touching_changed_entities_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 4).unwrap();
        let embedder = FixedEmbedder { dims: 4, calls: Mutex::new(0) };

        let relation = Relation::calls("unrelated_a", "unrelated_b");
        let changed = HashSet::from(["f".to_string()]);
        let with_impl = HashSet::new();
        let ctx = ProcessingContext {
            collection: "c",
            changed_entities: &changed,
            entities_with_implementation: &with_impl,
        };

        let result = process(&[], &[relation], &[], &ctx, &embedder, 2048, &store).unwrap();
        assert_eq!(result.points.len(), 0);
        assert_eq!(result.skipped, 0);
    }

    #[test]
    fn metadata_chunk_reflects_implementation_presence() {
        let entity = Entity::class("C", "/repo/b.py");
        let with_impl = HashSet::from(["C".to_string()]);
        let chunk = Chunk::create_metadata(&entity, with_impl.contains(&entity.name));
        match chunk {
            Chunk::Metadata { has_implementation, .. } => assert!(has_implementation),
            _ => panic!("expected metadata chunk"),
        }
        assert_eq!(entity.kind, EntityKind::Class);
    }
}
