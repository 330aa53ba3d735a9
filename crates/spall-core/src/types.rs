//! Entity info structs shared across storage, retrieval, and the HTTP
//! boundary. All wire types serialize camelCase with epoch-millisecond
//! timestamps.

use serde::{Deserialize, Serialize};

use crate::ids::{CorpusId, EmbeddingId, NoteId, QueryId, WorkspaceId};

/// Access-log kind for a note read through a tracked query fetch.
pub const ACCESS_KIND_NOTE_READ: i64 = 1;

/// Current time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A viewer identity scoping queries and access history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A named bag of notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Corpus {
    pub id: CorpusId,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A stored text document with its canonical path within a corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub corpus_id: CorpusId,
    pub path: String,
    pub content: String,
    pub content_hash: String,
    pub size: i64,
    pub mtime: i64,
}

/// One chunk row in the embeddings table. The dense vector itself lives in
/// the vector index under `EmbeddingId::vector_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRow {
    pub id: EmbeddingId,
    pub note_id: NoteId,
    /// 0-based chunk ordinal within the note.
    pub seq: i64,
    /// Character offset of the chunk within the note's content.
    pub pos: i64,
}

/// A chunk produced by the chunker: text plus its starting character
/// offset in the source content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub pos: usize,
}

/// A persisted retrieval scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: QueryId,
    pub viewer: WorkspaceId,
    pub tracked: bool,
    pub corpora: Vec<CorpusId>,
    pub created_at: i64,
}

/// An append-only access-log row awaiting commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingEntry {
    pub id: i64,
    pub note_id: NoteId,
    pub query_id: QueryId,
    pub kind: i64,
    pub created_at: i64,
    pub payload: String,
}

/// Receipt from moving all staged rows to the committed log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    pub moved: u64,
    pub committed_at: i64,
}

/// One page of a keyset-paginated notes listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesPage {
    pub notes: Vec<Note>,
    pub next_cursor: Option<String>,
}

/// A keyword (full-text) search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub note_id: NoteId,
    pub corpus_id: CorpusId,
    pub path: String,
    pub snippet: String,
    pub score: f64,
}

/// A semantic (vector) search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorHit {
    pub note_id: NoteId,
    pub corpus_id: CorpusId,
    pub path: String,
    /// Fixed-size slice of the note's content starting at `chunk_pos`.
    pub chunk: String,
    pub chunk_pos: i64,
    /// `1 − cosine distance`.
    pub score: f64,
}

/// Raw row returned by the storage vector-search primitive, before scope
/// filtering.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub embedding_id: EmbeddingId,
    pub note_id: NoteId,
    pub corpus_id: CorpusId,
    pub path: String,
    pub content: String,
    pub chunk_pos: i64,
    pub distance: f64,
}

/// Note paths in scope, grouped by corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusPaths {
    pub corpus: CorpusId,
    pub paths: Vec<String>,
}

/// Outcome of a directory scan/reconcile pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    /// Note ids produced for added + modified entries, awaiting embedding.
    pub unembedded: Vec<NoteId>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}
