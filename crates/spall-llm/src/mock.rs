//! Deterministic in-memory embedding provider for tests.
//!
//! Tokenization maps each character to its scalar value, which makes
//! `detokenize` an exact inverse over any window — the property the
//! chunker depends on. Embeddings are hash-seeded unit vectors, so
//! identical texts always land on identical vectors and different texts
//! almost never collide.

use async_trait::async_trait;

use spall_core::Result;

use crate::provider::EmbeddingProvider;

pub struct MockEmbeddingProvider {
    dims: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        // FNV-1a over the text seeds a tiny xorshift generator.
        let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.bytes() {
            seed ^= byte as u64;
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }
        if seed == 0 {
            seed = 1;
        }
        let mut out = Vec::with_capacity(self.dims);
        let mut state = seed;
        for _ in 0..self.dims {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            out.push(((state % 2000) as f32 / 1000.0) - 1.0);
        }
        // Normalize so cosine distances behave like the real model's.
        let norm: f32 = out.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut out {
                *v /= norm;
            }
        }
        out
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    async fn tokenize(&self, text: &str) -> Result<Vec<i32>> {
        Ok(text.chars().map(|c| c as i32).collect())
    }

    async fn detokenize(&self, tokens: &[i32]) -> Result<String> {
        Ok(tokens
            .iter()
            .filter_map(|t| char::from_u32(*t as u32))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dims
    }
}
