//! Corpus operations.

use rusqlite::params;

use spall_core::types::Corpus;
use spall_core::{now_ms, CorpusId, Error, Result};

use crate::schema::ignore_no_rows;
use crate::Storage;

fn corpus_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Corpus> {
    Ok(Corpus {
        id: CorpusId(row.get(0)?),
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

impl Storage {
    pub fn get_corpus_by_id(&self, id: CorpusId) -> Result<Corpus> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at, updated_at FROM corpora WHERE id = ?1",
                params![id.0],
                corpus_from_row,
            )
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(Error::storage)?
            .ok_or_else(|| Error::CorpusNotFound(id.to_string()))
        })
    }

    pub fn get_corpus_by_name(&self, name: &str) -> Result<Corpus> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at, updated_at FROM corpora WHERE name = ?1",
                params![name],
                corpus_from_row,
            )
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(Error::storage)?
            .ok_or_else(|| Error::CorpusNotFound(name.to_string()))
        })
    }

    pub fn list_corpora(&self) -> Result<Vec<Corpus>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, created_at, updated_at FROM corpora ORDER BY id")
                .map_err(Error::storage)?;
            let rows = stmt
                .query_map([], corpus_from_row)
                .map_err(Error::storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage)?;
            Ok(rows)
        })
    }

    /// Returns the corpus named `name`, creating it first if needed. The
    /// boolean reports whether a row was created.
    pub fn get_or_create_corpus(&self, name: &str) -> Result<(Corpus, bool)> {
        match self.get_corpus_by_name(name) {
            Ok(corpus) => Ok((corpus, false)),
            Err(Error::CorpusNotFound(_)) => {
                let now = now_ms();
                let corpus = self.with_conn(|conn| {
                    conn.execute(
                        "INSERT INTO corpora (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
                        params![name, now],
                    )
                    .map_err(Error::storage)?;
                    let id = conn.last_insert_rowid();
                    Ok(Corpus {
                        id: CorpusId(id),
                        name: name.to_string(),
                        created_at: now,
                        updated_at: now,
                    })
                })?;
                Ok((corpus, true))
            }
            Err(other) => Err(other),
        }
    }

    /// Deletes a corpus and everything it owns: vector rows, FTS rows,
    /// chunk rows, and notes, all in one transaction.
    pub fn remove_corpus(&self, id: CorpusId) -> Result<()> {
        // Validate first so a missing corpus is a typed 404.
        self.get_corpus_by_id(id)?;
        self.with_tx(|tx| {
            let note_ids: Vec<i64> = {
                let mut stmt = tx
                    .prepare("SELECT id FROM notes WHERE corpus_id = ?1")
                    .map_err(Error::storage)?;
                let rows = stmt
                    .query_map(params![id.0], |row| row.get(0))
                    .map_err(Error::storage)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(Error::storage)?;
                rows
            };
            for note_id in &note_ids {
                crate::embeddings::delete_note_vectors(tx, *note_id)?;
                tx.execute("DELETE FROM notes_fts WHERE rowid = ?1", params![note_id])
                    .map_err(Error::storage)?;
            }
            tx.execute(
                "DELETE FROM embeddings WHERE note_id IN (SELECT id FROM notes WHERE corpus_id = ?1)",
                params![id.0],
            )
            .map_err(Error::storage)?;
            tx.execute("DELETE FROM notes WHERE corpus_id = ?1", params![id.0])
                .map_err(Error::storage)?;
            tx.execute("DELETE FROM corpora WHERE id = ?1", params![id.0])
                .map_err(Error::storage)?;
            Ok(())
        })
    }
}
