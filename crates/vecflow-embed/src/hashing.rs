use async_trait::async_trait;
use vecflow_core::error::Result;
use vecflow_core::storage::EmbeddingClient;

/// Lightweight deterministic fallback embedding
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    /// Embedder producing vectors of length `dim`
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    /// Output vector length
    pub fn dimension(&self) -> usize {
        self.dim
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, b) in text.as_bytes().iter().enumerate() {
            v[i % self.dim] += (*b as f32) / 255.0;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn name(&self) -> &str {
        "hashing-fallback"
    }
}
