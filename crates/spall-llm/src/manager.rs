//! Process-wide model lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use spall_core::{Error, Event, EventBus, ModelInfo, Result};

use crate::download::download_model;
use crate::provider::EmbeddingProvider;

/// Which model artifacts the manager downloads and loads.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub embedder_id: String,
    pub embedder_file: String,
    pub embedder_url: String,
    pub reranker_id: String,
    pub reranker_file: String,
    pub reranker_url: String,
    pub dims: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedder_id: "nomic-embed-text-v1.5".into(),
            embedder_file: "nomic-embed-text-v1.5.Q8_0.gguf".into(),
            embedder_url: "https://huggingface.co/nomic-ai/nomic-embed-text-v1.5-GGUF/resolve/main/nomic-embed-text-v1.5.Q8_0.gguf".into(),
            reranker_id: "bge-reranker-v2-m3".into(),
            reranker_file: "bge-reranker-v2-m3-Q8_0.gguf".into(),
            reranker_url: "https://huggingface.co/gpustack/bge-reranker-v2-m3-GGUF/resolve/main/bge-reranker-v2-m3-Q8_0.gguf".into(),
            dims: 768,
        }
    }
}

/// Owns the embedder (model + context) and the reranker artifact. The
/// reranker is downloaded alongside the embedder but unused by the
/// retrieval paths.
pub struct ModelManager {
    config: ModelConfig,
    models_dir: PathBuf,
    bus: Arc<EventBus>,
    client: reqwest::Client,
    provider: Mutex<Option<Arc<dyn EmbeddingProvider>>>,
}

impl ModelManager {
    pub fn new(models_dir: PathBuf, config: ModelConfig, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            models_dir,
            bus,
            client: reqwest::Client::new(),
            provider: Mutex::new(None),
        }
    }

    /// Manager with a pre-loaded provider; `load` becomes a no-op. Used
    /// by tests and by embedding runtimes injected from outside.
    pub fn with_provider(provider: Arc<dyn EmbeddingProvider>, bus: Arc<EventBus>) -> Self {
        let dims = provider.dimension();
        let mut config = ModelConfig::default();
        config.dims = dims;
        let manager = Self::new(PathBuf::new(), config, bus);
        *manager.provider.lock() = Some(provider);
        manager
    }

    pub fn embedder_info(&self) -> ModelInfo {
        ModelInfo {
            id: self.config.embedder_id.clone(),
            name: self.config.embedder_file.clone(),
            path: self
                .models_dir
                .join(&self.config.embedder_file)
                .display()
                .to_string(),
        }
    }

    pub fn reranker_info(&self) -> ModelInfo {
        ModelInfo {
            id: self.config.reranker_id.clone(),
            name: self.config.reranker_file.clone(),
            path: self
                .models_dir
                .join(&self.config.reranker_file)
                .display()
                .to_string(),
        }
    }

    pub fn dims(&self) -> usize {
        self.config.dims
    }

    /// Downloads both model artifacts and loads the embedder. Publishes
    /// `model.failed` before propagating any failure.
    pub async fn load(&self) -> Result<()> {
        if self.provider.lock().is_some() {
            return Ok(());
        }
        match self.load_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.bus
                    .publish(Event::ModelFailed {
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn load_inner(&self) -> Result<()> {
        let embedder_info = self.embedder_info();
        let reranker_info = self.reranker_info();
        let embedder_path = self.models_dir.join(&self.config.embedder_file);
        let reranker_path = self.models_dir.join(&self.config.reranker_file);

        // The two downloads are independent streams; their progress
        // events may interleave.
        let (embedder, reranker) = tokio::join!(
            download_model(
                &self.client,
                &self.config.embedder_url,
                &embedder_path,
                &embedder_info,
                &self.bus,
            ),
            download_model(
                &self.client,
                &self.config.reranker_url,
                &reranker_path,
                &reranker_info,
                &self.bus,
            ),
        );
        embedder?;
        reranker?;

        let provider = self.load_backend(&embedder_path).await?;
        *self.provider.lock() = Some(provider);
        self.bus
            .publish(Event::ModelLoad {
                info: embedder_info.clone(),
            })
            .await;
        info!(model = %embedder_info.name, "embedder loaded");
        Ok(())
    }

    #[cfg(feature = "llama")]
    async fn load_backend(&self, path: &std::path::Path) -> Result<Arc<dyn EmbeddingProvider>> {
        let path = path.to_path_buf();
        let dims = self.config.dims;
        let embedder = tokio::task::spawn_blocking(move || {
            crate::llama::LlamaEmbedder::load(&path, dims)
        })
        .await
        .map_err(|e| Error::model(format!("embedder load task: {e}")))??;
        Ok(Arc::new(embedder))
    }

    #[cfg(not(feature = "llama"))]
    async fn load_backend(&self, _path: &std::path::Path) -> Result<Arc<dyn EmbeddingProvider>> {
        Err(Error::model(
            "no embedding backend compiled in; rebuild with the `llama` feature",
        ))
    }

    /// The loaded embedder, or a model error if `load` has not run.
    pub fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.provider
            .lock()
            .clone()
            .ok_or_else(|| Error::model("embedding model not loaded"))
    }

    /// Releases the embedder handle.
    pub fn dispose(&self) {
        self.provider.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockEmbeddingProvider;

    #[tokio::test]
    async fn with_provider_short_circuits_load() {
        let bus = Arc::new(EventBus::new());
        let manager =
            ModelManager::with_provider(Arc::new(MockEmbeddingProvider::new(8)), bus.clone());
        manager.load().await.unwrap();
        assert_eq!(manager.provider().unwrap().dimension(), 8);
        assert_eq!(manager.dims(), 8);
    }

    #[tokio::test]
    async fn dispose_releases_the_handle() {
        let bus = Arc::new(EventBus::new());
        let manager =
            ModelManager::with_provider(Arc::new(MockEmbeddingProvider::new(4)), bus.clone());
        manager.dispose();
        let err = manager.provider().unwrap_err();
        assert!(err.to_string().contains("not loaded"));
    }

    #[tokio::test]
    async fn load_without_backend_publishes_model_failed() {
        // Only meaningful when the llama feature is off (the default
        // test configuration): download targets are unreachable paths,
        // so load fails before any backend concern.
        if cfg!(feature = "llama") {
            return;
        }
        let bus = Arc::new(EventBus::new());
        let failed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let saw = failed.clone();
        let _sub = bus.subscribe(move |event| {
            let saw = saw.clone();
            async move {
                if matches!(event, Event::ModelFailed { .. }) {
                    saw.store(true, std::sync::atomic::Ordering::SeqCst);
                }
            }
        });

        let tmp = tempfile::tempdir().unwrap();
        let mut config = ModelConfig::default();
        config.embedder_url = "http://127.0.0.1:1/none.gguf".into();
        config.reranker_url = "http://127.0.0.1:1/none.gguf".into();
        let manager = ModelManager::new(tmp.path().to_path_buf(), config, bus.clone());

        assert!(manager.load().await.is_err());
        assert!(failed.load(std::sync::atomic::Ordering::SeqCst));
    }
}
