//! The embedding provider contract.

use async_trait::async_trait;

use spall_core::{Error, Result};

/// Contract for any embedding runtime. Implementations must be
/// thread-safe; the daemon shares one provider across requests.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dense vector for one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dense vectors for a batch, in input order. Batching is the hot
    /// path of the indexing pipeline.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Token ids for `text`, as the chunker consumes them.
    async fn tokenize(&self, text: &str) -> Result<Vec<i32>>;

    /// Inverse of [`EmbeddingProvider::tokenize`] over any token slice.
    async fn detokenize(&self, tokens: &[i32]) -> Result<String>;

    /// Dimension of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Checks a produced vector against [`EmbeddingProvider::dimension`].
    fn validate_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension() {
            return Err(Error::model(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension(),
                vector.len()
            )));
        }
        Ok(())
    }
}
