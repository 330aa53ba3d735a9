//! Shared foundations for the spall workspace.
//!
//! Everything that more than one crate needs lives here: branded id
//! newtypes, the entity info structs that cross the HTTP boundary, the
//! process-wide error taxonomy with its stable code strings, the typed
//! event bus, the cooperative request context, and settings resolution
//! (environment variables plus the optional `.spall/spall.json`
//! workspace config).

pub mod context;
pub mod error;
pub mod events;
pub mod ids;
pub mod settings;
pub mod types;

pub use context::RequestContext;
pub use error::{Error, Result};
pub use events::{Event, EventBus, ModelInfo, ScanStatus, Subscription};
pub use ids::{CorpusId, EmbeddingId, NoteId, QueryId, WorkspaceId};
pub use settings::Settings;
pub use types::now_ms;
