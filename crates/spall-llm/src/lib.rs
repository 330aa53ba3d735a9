//! Model adapter: a narrow facade over the embedding runtime.
//!
//! The rest of the workspace talks to embeddings exclusively through the
//! [`EmbeddingProvider`] trait. [`ModelManager`] owns the process-wide
//! lifecycle: downloading model artifacts into the cache directory (with
//! progress events on the bus), loading the embedder, and disposing it
//! on shutdown. The concrete GGUF runtime lives behind the `llama` cargo
//! feature; tests use [`MockEmbeddingProvider`].

mod download;
mod manager;
mod mock;
mod provider;

#[cfg(feature = "llama")]
mod llama;

pub use manager::{ModelConfig, ModelManager};
pub use mock::MockEmbeddingProvider;
pub use provider::EmbeddingProvider;
