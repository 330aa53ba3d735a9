//! The spall daemon: one process per data directory, elected through a
//! lock file, serving the HTTP API until it has been idle long enough
//! to stop itself.

pub mod idle;
pub mod lock;
pub mod routes;
pub mod server;
pub mod sse;

use std::sync::Arc;

use tokio::sync::Notify;

use spall_core::{Error, Event, EventBus, Result, Settings};
use spall_llm::{EmbeddingProvider, ModelManager};
use spall_query::QueryEngine;
use spall_sqlite::Storage;

pub use lock::{acquire, DaemonEndpoint, LockFile, LockInfo};
pub use server::run;

/// Process-wide state: the storage handle, the model adapter, and the
/// bus subscriber set, threaded through the server and operations as
/// one application handle.
#[derive(Clone)]
pub struct AppHandle {
    pub settings: Settings,
    pub storage: Storage,
    pub models: Arc<ModelManager>,
    pub bus: Arc<EventBus>,
    pub engine: QueryEngine,
    pub idle: Arc<idle::IdleTracker>,
    pub shutdown: Arc<Notify>,
}

impl AppHandle {
    /// Standard construction: default model config, store opened (and
    /// created, with `store.create`/`store.created` events) under the
    /// settings' data directory.
    pub async fn new(settings: Settings) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let models = Arc::new(ModelManager::new(
            settings.models_dir(),
            spall_llm::ModelConfig::default(),
            bus.clone(),
        ));
        Self::with_models(settings, models, bus).await
    }

    /// Construction with an injected model manager (tests pass one
    /// wrapping a mock provider).
    pub async fn with_models(
        settings: Settings,
        models: Arc<ModelManager>,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        let db_path = settings.db_path().display().to_string();
        let creating = !settings.db_path().exists();
        if creating {
            bus.publish(Event::StoreCreate {
                path: db_path.clone(),
            })
            .await;
        }
        let storage = Storage::open(
            &settings.data_dir,
            &models.embedder_info().id,
            models.dims(),
        )?;
        if creating {
            bus.publish(Event::StoreCreated { path: db_path }).await;
        }
        let engine = QueryEngine::new(storage.clone());
        Ok(Self {
            settings,
            storage,
            models,
            bus,
            engine,
            idle: idle::IdleTracker::new(),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// The embedder, loading it on first use.
    pub async fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        if let Ok(provider) = self.models.provider() {
            return Ok(provider);
        }
        self.models.load().await?;
        self.models.provider()
    }

    /// Requests a graceful stop.
    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }
}

impl std::fmt::Debug for AppHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppHandle")
            .field("data_dir", &self.settings.data_dir)
            .finish()
    }
}

/// Convenience used by route handlers: map any core error into the
/// HTTP error body shape.
pub(crate) fn error_body(err: &Error) -> serde_json::Value {
    serde_json::json!({
        "code": err.code(),
        "message": err.to_string(),
    })
}
