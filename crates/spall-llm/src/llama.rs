//! GGUF embedding backend over llama.cpp.
//!
//! Compiled only with the `llama` feature. The backend handle is
//! initialized once per process; the model and its embedding context
//! are owned here and released on drop.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::token::LlamaToken;
use parking_lot::Mutex;

use spall_core::{Error, Result};

use crate::provider::EmbeddingProvider;

static BACKEND: std::sync::OnceLock<Arc<LlamaBackend>> = std::sync::OnceLock::new();

fn backend() -> Result<Arc<LlamaBackend>> {
    if let Some(backend) = BACKEND.get() {
        return Ok(backend.clone());
    }
    let backend = LlamaBackend::init().map_err(|e| Error::model(format!("llama init: {e}")))?;
    let backend = Arc::new(backend);
    let _ = BACKEND.set(backend.clone());
    Ok(BACKEND.get().cloned().unwrap_or(backend))
}

pub(crate) struct LlamaEmbedder {
    model: LlamaModel,
    backend: Arc<LlamaBackend>,
    dims: usize,
    // llama contexts are not Sync; serialize inference.
    inference: Mutex<()>,
}

impl LlamaEmbedder {
    pub(crate) fn load(path: &Path, dims: usize) -> Result<Self> {
        let backend = backend()?;
        let params = LlamaModelParams::default();
        let model = LlamaModel::load_from_file(&backend, path, &params)
            .map_err(|e| Error::model(format!("load {}: {e}", path.display())))?;
        Ok(Self {
            model,
            backend,
            dims,
            inference: Mutex::new(()),
        })
    }

    fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let _guard = self.inference.lock();
        let ctx_params = LlamaContextParams::default().with_embeddings(true);
        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| Error::model(format!("embedding context: {e}")))?;

        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let tokens = self
                .model
                .str_to_token(text, AddBos::Always)
                .map_err(|e| Error::model(format!("tokenize: {e}")))?;
            let mut batch = LlamaBatch::new(tokens.len().max(1), 1);
            batch
                .add_sequence(&tokens, 0, false)
                .map_err(|e| Error::model(format!("batch: {e}")))?;
            ctx.clear_kv_cache();
            ctx.decode(&mut batch)
                .map_err(|e| Error::model(format!("decode: {e}")))?;
            let embedding = ctx
                .embeddings_seq_ith(0)
                .map_err(|e| Error::model(format!("embeddings: {e}")))?;
            let mut vector = embedding.to_vec();
            vector.truncate(self.dims);
            out.push(vector);
        }
        Ok(out)
    }
}

#[async_trait]
impl EmbeddingProvider for LlamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::model("empty embedding batch result"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Inference is CPU-bound; the caller is already on a blocking
        // task when invoked through ModelManager, but guard anyway.
        self.embed_blocking(texts)
    }

    async fn tokenize(&self, text: &str) -> Result<Vec<i32>> {
        let tokens = self
            .model
            .str_to_token(text, AddBos::Never)
            .map_err(|e| Error::model(format!("tokenize: {e}")))?;
        Ok(tokens.into_iter().map(|t| t.0).collect())
    }

    async fn detokenize(&self, tokens: &[i32]) -> Result<String> {
        let tokens: Vec<LlamaToken> = tokens.iter().map(|t| LlamaToken(*t)).collect();
        self.model
            .tokens_to_str(&tokens, llama_cpp_2::model::Special::Tokenize)
            .map_err(|e| Error::model(format!("detokenize: {e}")))
    }

    fn dimension(&self) -> usize {
        self.dims
    }
}
