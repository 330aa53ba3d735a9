//! Schema creation and the size-column migration.
//!
//! Runs on every open: `CREATE ... IF NOT EXISTS` makes creation
//! idempotent, the default corpus is seeded with id 1, and the meta
//! table pins the embedding model name and dimension the store was
//! created with.

use rusqlite::params;
use tracing::info;

use spall_core::{now_ms, Error, Result};

use crate::Storage;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS corpora (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS workspaces (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS notes (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    corpus_id    INTEGER NOT NULL REFERENCES corpora(id) ON DELETE CASCADE,
    path         TEXT NOT NULL,
    content      TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    mtime        INTEGER NOT NULL,
    UNIQUE (corpus_id, path)
);
CREATE INDEX IF NOT EXISTS idx_notes_corpus_path ON notes(corpus_id, path);
CREATE INDEX IF NOT EXISTS idx_notes_corpus_hash ON notes(corpus_id, content_hash);

CREATE TABLE IF NOT EXISTS embeddings (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    note_id INTEGER NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
    seq     INTEGER NOT NULL,
    pos     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embeddings_note ON embeddings(note_id);

CREATE TABLE IF NOT EXISTS queries (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    viewer     INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    tracked    INTEGER NOT NULL DEFAULT 0,
    corpora    TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS staging (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    note_id    INTEGER NOT NULL,
    query_id   INTEGER NOT NULL REFERENCES queries(id) ON DELETE CASCADE,
    kind       INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    payload    TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS committed (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    note_id      INTEGER NOT NULL,
    query_id     INTEGER NOT NULL REFERENCES queries(id) ON DELETE CASCADE,
    kind         INTEGER NOT NULL,
    created_at   INTEGER NOT NULL,
    payload      TEXT NOT NULL DEFAULT '{}',
    committed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS file_hashes (
    path         TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    mtime        INTEGER NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(content, prefix='2 3');
";

pub(crate) fn ensure_schema(storage: &Storage, model_name: &str, dims: usize) -> Result<()> {
    storage.with_conn(|conn| {
        conn.execute_batch(SCHEMA).map_err(Error::storage)?;

        // The vec0 column width is baked into the table definition, so it
        // is created outside the static schema string.
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vectors
             USING vec0(key TEXT PRIMARY KEY, data float[{dims}] distance_metric=cosine);"
        ))
        .map_err(Error::storage)?;

        let stored_dims: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'embedding_dims'",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(Error::storage)?;

        match stored_dims {
            Some(stored) => {
                let stored: usize = stored
                    .parse()
                    .map_err(|_| Error::storage("corrupt embedding_dims meta row"))?;
                if stored != dims {
                    return Err(Error::config(format!(
                        "store was created with embedding dimension {stored}, configured {dims}"
                    )));
                }
            }
            None => {
                let now = now_ms();
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('embedding_model_name', ?1)",
                    params![model_name],
                )
                .map_err(Error::storage)?;
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('embedding_dims', ?1)",
                    params![dims.to_string()],
                )
                .map_err(Error::storage)?;
                conn.execute(
                    "INSERT OR IGNORE INTO corpora (id, name, created_at, updated_at)
                     VALUES (1, 'default', ?1, ?1)",
                    params![now],
                )
                .map_err(Error::storage)?;
                info!(model = model_name, dims, "schema initialized");
            }
        }

        migrate_note_size(conn)?;
        Ok(())
    })
}

/// Adds `notes.size` if an older store predates it, backfilling from the
/// stored content.
fn migrate_note_size(conn: &rusqlite::Connection) -> Result<()> {
    let has_size: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('notes') WHERE name = 'size'")
        .and_then(|mut stmt| stmt.exists([]))
        .map_err(Error::storage)?;
    if !has_size {
        conn.execute_batch(
            "ALTER TABLE notes ADD COLUMN size INTEGER NOT NULL DEFAULT 0;
             UPDATE notes SET size = length(content);",
        )
        .map_err(Error::storage)?;
        info!("migrated notes.size");
    }
    Ok(())
}

pub(crate) fn ignore_no_rows<T>(err: rusqlite::Error) -> std::result::Result<Option<T>, rusqlite::Error> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use crate::test_storage;
    use spall_core::CorpusId;

    #[test]
    fn default_corpus_is_seeded() {
        let storage = test_storage();
        let corpus = storage.get_corpus_by_id(CorpusId(1)).unwrap();
        assert_eq!(corpus.name, "default");
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let storage = test_storage();
        // A second ensure pass must not error or duplicate the seed row.
        super::ensure_schema(&storage, "test-model", 4).unwrap();
        assert_eq!(storage.list_corpora().unwrap().len(), 1);
    }

    #[test]
    fn notes_have_size_column() {
        let storage = test_storage();
        let note = storage
            .add_note(CorpusId(1), "a.md", "12345", false)
            .unwrap();
        assert_eq!(note.size, 5);
    }
}
