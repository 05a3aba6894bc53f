//! Search Facade (§4.9): embeds a query, forwards it to the vector store, and filters by
//! chunk kind so clients can express progressive disclosure as two calls — a metadata search,
//! then an implementation fetch for whichever hits want it.

use crate::embedder::Embedder;
use crate::entity::ChunkKind;
use crate::error::Result;
use crate::vector_store::{ScrollFilter, SearchHit, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Entity,
    Relation,
    Chat,
    All,
}

impl KindFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "entity" => Some(Self::Entity),
            "relation" => Some(Self::Relation),
            "chat" => Some(Self::Chat),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn to_filter(self) -> Option<ScrollFilter> {
        match self {
            KindFilter::All => None,
            KindFilter::Relation => Some(ScrollFilter::eq("chunk_kind", ChunkKind::Relation.as_str())),
            KindFilter::Chat => Some(ScrollFilter::eq("chunk_kind", ChunkKind::Chat.as_str())),
            // "entity" spans both metadata and implementation chunk kinds; the store has no
            // native OR, so callers asking for entity hits get metadata chunks — the
            // progressive-disclosure entry point — and fetch implementation separately.
            KindFilter::Entity => Some(ScrollFilter::eq("chunk_kind", ChunkKind::Metadata.as_str())),
        }
    }
}

pub fn search(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    collection: &str,
    query: &str,
    limit: usize,
    kind_filter: KindFilter,
) -> Result<Vec<SearchHit>> {
    let embedded = embedder.embed_batch(&[query.to_string()])?;
    let vector = embedded
        .into_iter()
        .next()
        .flatten()
        .map(|e| e.vector)
        .unwrap_or_default();

    let filter = kind_filter.to_filter();
    store.search(collection, &vector, Some(query), limit, None, filter.as_ref())
}

/// Second progressive-disclosure call: fetches the implementation chunk for one entity name,
/// if any. Callers issue this only for hits whose `has_implementation` payload field is true.
pub fn fetch_implementation(
    store: &dyn VectorStore,
    collection: &str,
    entity_name: &str,
) -> Result<Vec<crate::vector_store::Point>> {
    let filter = ScrollFilter::eq("entity_name", entity_name).and_eq("chunk_kind", ChunkKind::Implementation.as_str());
    store.scroll(collection, Some(&filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingResult;
    use crate::vector_store::LocalVectorStore;
    use serde_json::{json, Map};

    struct FixedEmbedder;
    impl Embedder for FixedEmbedder {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<EmbeddingResult>>> {
            Ok(texts.iter().map(|_| Some(EmbeddingResult { vector: vec![1.0, 0.0], tokens: 1 })).collect())
        }
        fn vector_size(&self) -> usize {
            2
        }
    }

    fn point(id: u64, chunk_kind: &str, entity_name: &str, has_impl: Option<bool>) -> crate::vector_store::Point {
        let mut payload = Map::new();
        payload.insert("chunk_kind".into(), json!(chunk_kind));
        payload.insert("entity_name".into(), json!(entity_name));
        if let Some(hi) = has_impl {
            payload.insert("has_implementation".into(), json!(hi));
        }
        crate::vector_store::Point { id, vector: vec![1.0, 0.0], payload }
    }

    #[test]
    fn entity_kind_filter_returns_only_metadata_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 2).unwrap();
        store
            .upsert(
                "c",
                vec![
                    point(1, "metadata", "f", Some(true)),
                    point(2, "implementation", "f", None),
                    point(3, "relation", "f", None),
                ],
            )
            .unwrap();

        let hits = search(&store, &FixedEmbedder, "c", "f", 10, KindFilter::Entity).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].point.id, 1);
    }

    #[test]
    fn fetch_implementation_finds_the_matching_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(&dir.path().join("c.points.json")).unwrap();
        store.ensure_collection("c", 2).unwrap();
        store
            .upsert("c", vec![point(1, "metadata", "f", Some(true)), point(2, "implementation", "f", None)])
            .unwrap();

        let impls = fetch_implementation(&store, "c", "f").unwrap();
        assert_eq!(impls.len(), 1);
        assert_eq!(impls[0].id, 2);
    }
}
