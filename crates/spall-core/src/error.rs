//! Process-wide error taxonomy.
//!
//! One top-level enum is shared by every crate in the workspace. Each
//! variant carries a stable machine-readable code string which the HTTP
//! layer serializes into `{code, message}` bodies and the CLI uses for
//! exit reporting.

use thiserror::Error;

use crate::ids::{CorpusId, QueryId};

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("corpus not found: {0}")]
    CorpusNotFound(String),

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("query not found: {0}")]
    QueryNotFound(QueryId),

    #[error("note not found: {0}")]
    NoteNotFound(String),

    /// Content-hash collision within a corpus without the `dupe` override.
    #[error("duplicate content in corpus {corpus}: already stored at {path}")]
    DuplicateContent { corpus: CorpusId, path: String },

    /// `(corpus, path)` collision on add.
    #[error("note already exists in corpus {corpus}: {path}")]
    NoteExists { corpus: CorpusId, path: String },

    /// Cooperative cancellation observed at a checkpoint.
    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable code string for this error (see the HTTP error contract).
    pub fn code(&self) -> &'static str {
        match self {
            Error::CorpusNotFound(_) => "corpus.not_found",
            Error::WorkspaceNotFound(_) => "workspace.not_found",
            Error::QueryNotFound(_) => "query.not_found",
            Error::NoteNotFound(_) => "note.not_found",
            Error::DuplicateContent { .. } => "note.duplicate_content",
            Error::NoteExists { .. } => "note.already_exists",
            Error::Cancelled => "storage.cancelled",
            _ => "error",
        }
    }

    /// HTTP status the route boundary maps this error onto.
    pub fn http_status(&self) -> u16 {
        if self.is_not_found() {
            404
        } else {
            500
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::CorpusNotFound(_)
                | Error::WorkspaceNotFound(_)
                | Error::QueryNotFound(_)
                | Error::NoteNotFound(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Wraps a storage-layer failure.
    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Error::Storage(msg.to_string())
    }

    /// Wraps a model-adapter failure.
    pub fn model(msg: impl std::fmt::Display) -> Self {
        Error::Model(msg.to_string())
    }

    pub fn config(msg: impl std::fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    pub fn other(msg: impl std::fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
