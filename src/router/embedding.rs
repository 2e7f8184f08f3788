//! Embedding provider (ambient supplement, §4.7.1): an opaque collaborator the router depends
//! on but does not implement, matching the non-goal that LLM/embedding backends are external.

use async_trait::async_trait;

const DEFAULT_DIMENSION: usize = 32;

/// Produces a fixed-dimension embedding for a piece of text.
///
/// Real backends (OpenAI, a local model server, ...) are wired in behind this trait at
/// construction time, one implementation per backend, the way the teacher selects a runtime
/// backend once at startup rather than branching on backend identity throughout the codebase.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds `text` into a fixed-dimension real vector.
    async fn embed(&self, text: &str) -> Vec<f32>;
}

/// A deterministic, dependency-free fallback: a stable hashed bag-of-words embedding.
///
/// Lets the router and its tests run without a live embedding backend; not intended to produce
/// semantically meaningful vectors.
pub struct HashingEmbeddingProvider {
    dimension: usize,
}

impl HashingEmbeddingProvider {
    /// Creates a provider that emits vectors of `dimension` components.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for word in text.split_whitespace() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            std::hash::Hash::hash(&word.to_lowercase(), &mut hasher);
            let bucket = (std::hash::Hasher::finish(&hasher) as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for component in &mut vector {
                *component /= norm;
            }
        }
        vector
    }
}
