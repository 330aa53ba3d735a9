//! Append-only access log (staging → committed) and the scanner's
//! file-hash cache.

use rusqlite::params;

use spall_core::types::CommitReceipt;
use spall_core::{now_ms, Error, NoteId, QueryId, Result};

use crate::schema::ignore_no_rows;
use crate::Storage;

impl Storage {
    /// Appends one staging row. `payload` is opaque JSON.
    pub fn append_staging(
        &self,
        note_id: NoteId,
        query_id: QueryId,
        kind: i64,
        payload: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO staging (note_id, query_id, kind, created_at, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![note_id.0, query_id.0, kind, now_ms(), payload],
            )
            .map_err(Error::storage)?;
            Ok(())
        })
    }

    pub fn count_staging(&self) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM staging", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(Error::storage)
        })
    }

    pub fn count_committed(&self) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM committed", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(Error::storage)
        })
    }

    /// Moves every staging row into the committed log with the supplied
    /// timestamp, then truncates staging, all in one transaction. When
    /// staging is empty nothing is written.
    pub fn commit_all(&self, committed_at: i64) -> Result<CommitReceipt> {
        self.with_tx(|tx| {
            let staged: i64 = tx
                .query_row("SELECT COUNT(*) FROM staging", [], |row| row.get(0))
                .map_err(Error::storage)?;
            if staged == 0 {
                return Ok(CommitReceipt {
                    moved: 0,
                    committed_at,
                });
            }
            tx.execute(
                "INSERT INTO committed (note_id, query_id, kind, created_at, payload, committed_at)
                 SELECT note_id, query_id, kind, created_at, payload, ?1
                 FROM staging ORDER BY id",
                params![committed_at],
            )
            .map_err(Error::storage)?;
            tx.execute("DELETE FROM staging", [])
                .map_err(Error::storage)?;
            Ok(CommitReceipt {
                moved: staged as u64,
                committed_at,
            })
        })
    }

    /// Cached content hash for `path`, valid only while the stored mtime
    /// matches.
    pub fn file_hash_get(&self, path: &str, mtime: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT content_hash, mtime FROM file_hashes WHERE path = ?1",
                    params![path],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(ignore_no_rows)
                .map_err(Error::storage)?;
            Ok(row.and_then(|(hash, stored_mtime)| (stored_mtime == mtime).then_some(hash)))
        })
    }

    pub fn file_hash_upsert(&self, path: &str, hash: &str, mtime: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO file_hashes (path, content_hash, mtime) VALUES (?1, ?2, ?3)
                 ON CONFLICT(path) DO UPDATE SET content_hash = ?2, mtime = ?3",
                params![path, hash, mtime],
            )
            .map_err(Error::storage)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_storage;
    use spall_core::CorpusId;

    fn tracked_fixture(storage: &crate::Storage) -> (NoteId, QueryId) {
        let (ws, _) = storage.get_or_create_workspace("me").unwrap();
        let query = storage.insert_query(ws.id, true, &[CorpusId(1)]).unwrap();
        let note = storage.add_note(CorpusId(1), "a.md", "body", false).unwrap();
        (note.id, query.id)
    }

    #[test]
    fn commit_moves_everything_once() {
        let storage = test_storage();
        let (note, query) = tracked_fixture(&storage);
        for _ in 0..3 {
            storage.append_staging(note, query, 1, "{}").unwrap();
        }
        assert_eq!(storage.count_staging().unwrap(), 3);

        let receipt = storage.commit_all(777).unwrap();
        assert_eq!(receipt.moved, 3);
        assert_eq!(receipt.committed_at, 777);
        assert_eq!(storage.count_staging().unwrap(), 0);
        assert_eq!(storage.count_committed().unwrap(), 3);

        // Second commit is a no-op fast path.
        let receipt = storage.commit_all(888).unwrap();
        assert_eq!(receipt.moved, 0);
        assert_eq!(storage.count_committed().unwrap(), 3);
    }

    #[test]
    fn file_hash_cache_requires_matching_mtime() {
        let storage = test_storage();
        storage.file_hash_upsert("/tmp/a.md", "abc123", 1000).unwrap();

        assert_eq!(
            storage.file_hash_get("/tmp/a.md", 1000).unwrap(),
            Some("abc123".to_string())
        );
        assert_eq!(storage.file_hash_get("/tmp/a.md", 2000).unwrap(), None);
        assert_eq!(storage.file_hash_get("/tmp/other.md", 1000).unwrap(), None);

        storage.file_hash_upsert("/tmp/a.md", "def456", 2000).unwrap();
        assert_eq!(
            storage.file_hash_get("/tmp/a.md", 2000).unwrap(),
            Some("def456".to_string())
        );
    }
}
