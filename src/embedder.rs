//! Local embedding provider behind an opaque embed-batch contract, with token/cost telemetry.

use model2vec_rs::model::StaticModel;

use crate::config::EmbedderConfig;
use crate::error::{IndexError, Result};

/// One embedded chunk plus the telemetry the content processor accumulates across phases.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    /// Rough token estimate (chars / 4) used for cost telemetry only; this provider has no
    /// real tokenizer-exposed count.
    pub tokens: usize,
}

/// Accumulated telemetry across however many `embed_batch` calls a run makes.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingTelemetry {
    pub tokens: u64,
    pub requests: u64,
    /// Local inference has no metered cost; kept at zero so the orchestrator's cost total
    /// stays meaningful if a networked provider is substituted later.
    pub cost: f64,
}

impl EmbeddingTelemetry {
    pub fn record(&mut self, batch: &[EmbeddingResult]) {
        self.requests += 1;
        self.tokens += batch.iter().map(|r| r.tokens as u64).sum::<u64>();
    }
}

pub trait Embedder: Send + Sync {
    /// Embeds one batch of already-truncated text. Order of the output matches the input.
    /// A provider-level failure (load error, backend error) is `IndexError::Embed`; an
    /// individual-text failure is folded into `Ok` as a `None` at that index so the content
    /// processor can mark only that chunk failed rather than the whole batch.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<EmbeddingResult>>>;

    fn vector_size(&self) -> usize;
}

/// `model2vec-rs`-backed embedder: a local, CPU-only static-embedding model loaded once from
/// a HuggingFace repo id and reused for every call in the run.
pub struct Model2VecEmbedder {
    model: StaticModel,
    vector_size: usize,
}

impl Model2VecEmbedder {
    pub fn load(config: &EmbedderConfig) -> Result<Self> {
        let model = StaticModel::from_pretrained(&config.model, None, None, None).map_err(|err| {
            IndexError::Embed {
                chunk_id: format!("model:{}", config.model),
                message: format!("failed to load embedding model '{}': {err}", config.model),
            }
        })?;
        let vector_size = model.encode_single("probe").len();
        Ok(Self { model, vector_size })
    }
}

impl Embedder for Model2VecEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<EmbeddingResult>>> {
        Ok(texts
            .iter()
            .map(|text| {
                if text.trim().is_empty() {
                    return None;
                }
                let vector = self.model.encode_single(text);
                Some(EmbeddingResult {
                    vector,
                    tokens: estimate_tokens(text),
                })
            })
            .collect())
    }

    fn vector_size(&self) -> usize {
        self.vector_size
    }
}

/// Cheap stand-in for a real tokenizer count: used only for cost/telemetry reporting, never
/// for truncation decisions (those use raw byte length against `max_tokens`).
fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeEmbedder {
        dims: usize,
    }

    impl Embedder for FakeEmbedder {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<EmbeddingResult>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.is_empty() {
                        None
                    } else {
                        Some(EmbeddingResult {
                            vector: vec![0.0; self.dims],
                            tokens: estimate_tokens(t),
                        })
                    }
                })
                .collect())
        }

        fn vector_size(&self) -> usize {
            self.dims
        }
    }

    #[test]
    fn empty_text_yields_no_embedding() {
        let embedder = FakeEmbedder { dims: 4 };
        let out = embedder
            .embed_batch(&["".to_string(), "hello".to_string()])
            .unwrap();
        assert!(out[0].is_none());
        assert!(out[1].is_some());
    }

    #[test]
    fn telemetry_accumulates_across_batches() {
        let embedder = FakeEmbedder { dims: 4 };
        let mut telemetry = EmbeddingTelemetry::default();
        let batch1 = embedder.embed_batch(&["abcd".to_string()]).unwrap();
        let batch1: Vec<_> = batch1.into_iter().flatten().collect();
        telemetry.record(&batch1);
        let batch2 = embedder.embed_batch(&["abcdefgh".to_string()]).unwrap();
        let batch2: Vec<_> = batch2.into_iter().flatten().collect();
        telemetry.record(&batch2);
        assert_eq!(telemetry.requests, 2);
        assert_eq!(telemetry.tokens, 1 + 2);
    }
}
