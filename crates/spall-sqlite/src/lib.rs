//! SQLite storage engine for spall.
//!
//! The only crate permitted to issue raw SQL. One database file per data
//! directory holds every entity: corpora, workspaces, notes, per-chunk
//! embedding rows, the cosine vector index (a `vec0` virtual table from
//! the sqlite-vec extension), the FTS5 full-text index, the staging →
//! committed access log, and the scanner's file-hash cache.
//!
//! The connection is wrapped in `Arc<Mutex<Connection>>`: SQLite is
//! treated as a single-writer resource and writers serialize on the lock.

mod corpus;
mod embeddings;
mod fts;
mod notes;
mod queries;
mod schema;
mod staging;
mod workspace;

pub use embeddings::vector_to_blob;
pub use fts::normalize_bm25;

use std::path::Path;
use std::sync::Arc;
use std::sync::Once;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info};

use spall_core::{Error, Result};

static VEC_INIT: Once = Once::new();

/// Registers the sqlite-vec extension for every connection opened after
/// this call. Idempotent.
fn register_vector_extension() {
    VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Handle to the spall database. Cheap to clone; all clones share one
/// serialized connection.
#[derive(Clone, Debug)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
    dims: usize,
}

impl Storage {
    /// Opens (creating on first use) the database at
    /// `{data_dir}/spall.db`. Records the embedding model name and
    /// dimension in the meta table on creation and rejects reopening
    /// with a different dimension.
    pub fn open(data_dir: &Path, model_name: &str, dims: usize) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("spall.db");
        let existed = db_path.exists();
        register_vector_extension();

        let conn = Connection::open(&db_path).map_err(Error::storage)?;
        Self::from_connection(conn, existed, model_name, dims, &db_path.display().to_string())
    }

    /// In-memory database for tests.
    pub fn open_in_memory(model_name: &str, dims: usize) -> Result<Self> {
        register_vector_extension();
        let conn = Connection::open_in_memory().map_err(Error::storage)?;
        Self::from_connection(conn, false, model_name, dims, ":memory:")
    }

    fn from_connection(
        conn: Connection,
        existed: bool,
        model_name: &str,
        dims: usize,
        label: &str,
    ) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(Error::storage)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(Error::storage)?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(Error::storage)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(Error::storage)?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
            dims,
        };

        if existed {
            debug!(path = label, "opening existing store");
        } else {
            info!(path = label, "creating store");
        }
        schema::ensure_schema(&storage, model_name, dims)?;
        Ok(storage)
    }

    /// Configured embedding dimension.
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(Error::storage)?;
        let value = f(&tx)?;
        tx.commit().map_err(Error::storage)?;
        Ok(value)
    }

    /// Counts for the CLI status command.
    pub fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let one = |sql: &str| -> Result<u64> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(Error::storage)
            };
            Ok(StoreStats {
                corpora: one("SELECT COUNT(*) FROM corpora")?,
                workspaces: one("SELECT COUNT(*) FROM workspaces")?,
                notes: one("SELECT COUNT(*) FROM notes")?,
                chunks: one("SELECT COUNT(*) FROM embeddings")?,
                staged: one("SELECT COUNT(*) FROM staging")?,
            })
        })
    }
}

/// Row counts for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub corpora: u64,
    pub workspaces: u64,
    pub notes: u64,
    pub chunks: u64,
    pub staged: u64,
}

/// Lowercase hex SHA-256 of note content; the deduplication key.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
pub(crate) fn test_storage() -> Storage {
    Storage::open_in_memory("test-model", 4).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_hex() {
        let h = content_hash("hello e2e");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, content_hash("hello e2e"));
        assert_ne!(h, content_hash("hello e2e!"));
    }

    #[test]
    fn open_creates_and_reopens_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let storage = Storage::open(tmp.path(), "m", 4).unwrap();
            storage.get_or_create_corpus("extra").unwrap();
        }
        let storage = Storage::open(tmp.path(), "m", 4).unwrap();
        let corpora = storage.list_corpora().unwrap();
        assert_eq!(corpora.len(), 2); // default + extra
    }

    #[test]
    fn reopen_with_other_dims_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        Storage::open(tmp.path(), "m", 4).unwrap();
        let err = Storage::open(tmp.path(), "m", 8).unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[test]
    fn stats_reflect_contents() {
        let storage = test_storage();
        storage
            .add_note(spall_core::CorpusId(1), "a.md", "hello", false)
            .unwrap();
        let stats = storage.stats().unwrap();
        assert_eq!(stats.corpora, 1);
        assert_eq!(stats.notes, 1);
        assert_eq!(stats.chunks, 0);
    }
}
