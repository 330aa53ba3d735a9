//! Note CRUD, keyset pagination, and the duplicate-content policy.
//!
//! The `(corpus, content_hash)` duplicate rule is enforced here at the
//! operation layer, never as a schema constraint: passing `dupe = true`
//! must always be able to override it. The FTS row is maintained in
//! lockstep inside the same transaction as the notes row.

use rusqlite::params;

use spall_core::types::{CorpusPaths, Note, NotesPage};
use spall_core::{now_ms, CorpusId, Error, NoteId, Result};

use crate::schema::ignore_no_rows;
use crate::{content_hash, is_unique_violation, Storage};

pub(crate) const NOTE_COLUMNS: &str = "id, corpus_id, path, content, content_hash, size, mtime";

pub(crate) fn note_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: NoteId(row.get(0)?),
        corpus_id: CorpusId(row.get(1)?),
        path: row.get(2)?,
        content: row.get(3)?,
        content_hash: row.get(4)?,
        size: row.get(5)?,
        mtime: row.get(6)?,
    })
}

fn corpora_json(corpora: &[CorpusId]) -> String {
    let ids: Vec<i64> = corpora.iter().map(|c| c.0).collect();
    serde_json::to_string(&ids).unwrap_or_else(|_| "[]".to_string())
}

impl Storage {
    pub fn get_note(&self, corpus: CorpusId, path: &str) -> Result<Note> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE corpus_id = ?1 AND path = ?2"),
                params![corpus.0, path],
                note_from_row,
            )
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(Error::storage)?
            .ok_or_else(|| Error::NoteNotFound(format!("{corpus}:{path}")))
        })
    }

    pub fn get_note_by_id(&self, id: NoteId) -> Result<Note> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
                params![id.0],
                note_from_row,
            )
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(Error::storage)?
            .ok_or_else(|| Error::NoteNotFound(id.to_string()))
        })
    }

    pub fn list_notes(&self, corpus: CorpusId) -> Result<Vec<Note>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NOTE_COLUMNS} FROM notes WHERE corpus_id = ?1 ORDER BY path"
                ))
                .map_err(Error::storage)?;
            let rows = stmt
                .query_map(params![corpus.0], note_from_row)
                .map_err(Error::storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage)?;
            Ok(rows)
        })
    }

    /// Notes in `corpus` stored exactly at `prefix` or underneath it.
    /// An empty prefix selects the whole corpus. Used by the scanner to
    /// build its reconciliation map.
    pub fn list_notes_under(&self, corpus: CorpusId, prefix: &str) -> Result<Vec<Note>> {
        if prefix.is_empty() {
            return self.list_notes(corpus);
        }
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NOTE_COLUMNS} FROM notes
                     WHERE corpus_id = ?1 AND (path = ?2 OR path GLOB ?3)
                     ORDER BY path"
                ))
                .map_err(Error::storage)?;
            let rows = stmt
                .query_map(params![corpus.0, prefix, format!("{prefix}/*")], note_from_row)
                .map_err(Error::storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage)?;
            Ok(rows)
        })
    }

    /// Keyset pagination over every corpus in `corpora`: rows whose path
    /// matches `glob` and sorts strictly after `cursor`, ordered by
    /// path. When exactly `limit` rows come back the last path becomes
    /// the next cursor.
    pub fn list_notes_by_path(
        &self,
        corpora: &[CorpusId],
        glob: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<NotesPage> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NOTE_COLUMNS} FROM notes
                     WHERE corpus_id IN (SELECT value FROM json_each(?1))
                       AND path GLOB ?2
                       AND path > ?3
                     ORDER BY path
                     LIMIT ?4"
                ))
                .map_err(Error::storage)?;
            let notes = stmt
                .query_map(
                    params![
                        corpora_json(corpora),
                        glob,
                        cursor.unwrap_or(""),
                        limit as i64
                    ],
                    note_from_row,
                )
                .map_err(Error::storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage)?;
            let next_cursor = if notes.len() == limit {
                notes.last().map(|n| n.path.clone())
            } else {
                None
            };
            Ok(NotesPage { notes, next_cursor })
        })
    }

    /// All note paths in scope, grouped by corpus, from a single
    /// aggregate query.
    pub fn note_paths_grouped(
        &self,
        corpora: &[CorpusId],
        glob: &str,
    ) -> Result<Vec<CorpusPaths>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT corpus_id, json_group_array(path ORDER BY path)
                     FROM notes
                     WHERE corpus_id IN (SELECT value FROM json_each(?1))
                       AND path GLOB ?2
                     GROUP BY corpus_id
                     ORDER BY corpus_id",
                )
                .map_err(Error::storage)?;
            let rows = stmt
                .query_map(params![corpora_json(corpora), glob], |row| {
                    let corpus = CorpusId(row.get(0)?);
                    let paths_json: String = row.get(1)?;
                    Ok((corpus, paths_json))
                })
                .map_err(Error::storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage)?;
            rows.into_iter()
                .map(|(corpus, paths_json)| {
                    let paths: Vec<String> = serde_json::from_str(&paths_json)
                        .map_err(|e| Error::storage(format!("paths aggregate: {e}")))?;
                    Ok(CorpusPaths { corpus, paths })
                })
                .collect()
        })
    }

    /// Inserts a new note. Fails with `note.duplicate_content` when
    /// another note in the corpus has the same content hash (unless
    /// `dupe`), and `note.already_exists` on a `(corpus, path)`
    /// collision.
    pub fn add_note(
        &self,
        corpus: CorpusId,
        path: &str,
        content: &str,
        dupe: bool,
    ) -> Result<Note> {
        self.add_note_with_mtime(corpus, path, content, now_ms(), dupe)
    }

    pub fn add_note_with_mtime(
        &self,
        corpus: CorpusId,
        path: &str,
        content: &str,
        mtime: i64,
        dupe: bool,
    ) -> Result<Note> {
        self.get_corpus_by_id(corpus)?;
        let hash = content_hash(content);
        self.with_tx(|tx| {
            if !dupe {
                check_duplicate_content(tx, corpus, &hash, None)?;
            }
            let inserted = tx.execute(
                "INSERT INTO notes (corpus_id, path, content, content_hash, size, mtime)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![corpus.0, path, content, hash, content.len() as i64, mtime],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(Error::NoteExists {
                        corpus,
                        path: path.to_string(),
                    })
                }
                Err(e) => return Err(Error::storage(e)),
            }
            let id = tx.last_insert_rowid();
            upsert_fts_tx(tx, id, content)?;
            Ok(Note {
                id: NoteId(id),
                corpus_id: corpus,
                path: path.to_string(),
                content: content.to_string(),
                content_hash: hash.clone(),
                size: content.len() as i64,
                mtime,
            })
        })
    }

    /// Replaces a note's content, subject to the duplicate-content
    /// policy (the note itself is excluded from the probe).
    pub fn update_note(&self, id: NoteId, content: &str, dupe: bool) -> Result<Note> {
        self.update_note_with_mtime(id, content, now_ms(), dupe)
    }

    /// `update_note` with an explicit mtime; the scanner stamps notes
    /// with the file's on-disk mtime.
    pub fn update_note_with_mtime(
        &self,
        id: NoteId,
        content: &str,
        mtime: i64,
        dupe: bool,
    ) -> Result<Note> {
        let existing = self.get_note_by_id(id)?;
        let hash = content_hash(content);
        self.with_tx(|tx| {
            if !dupe {
                check_duplicate_content(tx, existing.corpus_id, &hash, Some(id))?;
            }
            tx.execute(
                "UPDATE notes SET content = ?1, content_hash = ?2, size = ?3, mtime = ?4
                 WHERE id = ?5",
                params![content, hash, content.len() as i64, mtime, id.0],
            )
            .map_err(Error::storage)?;
            upsert_fts_tx(tx, id.0, content)?;
            Ok(Note {
                id,
                corpus_id: existing.corpus_id,
                path: existing.path.clone(),
                content: content.to_string(),
                content_hash: hash.clone(),
                size: content.len() as i64,
                mtime,
            })
        })
    }

    /// Updates only a note's stored mtime. Used when a file's mtime
    /// moved but its content hash did not.
    pub fn touch_note_mtime(&self, id: NoteId, mtime: i64) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE notes SET mtime = ?1 WHERE id = ?2",
                    params![mtime, id.0],
                )
                .map_err(Error::storage)?;
            if changed == 0 {
                return Err(Error::NoteNotFound(id.to_string()));
            }
            Ok(())
        })
    }

    /// Insert-or-update keyed by `(corpus, path)`. The boolean reports
    /// whether a new row was created.
    pub fn upsert_note(
        &self,
        corpus: CorpusId,
        path: &str,
        content: &str,
        dupe: bool,
    ) -> Result<(Note, bool)> {
        match self.get_note(corpus, path) {
            Ok(existing) => Ok((self.update_note(existing.id, content, dupe)?, false)),
            Err(Error::NoteNotFound(_)) => {
                Ok((self.add_note(corpus, path, content, dupe)?, true))
            }
            Err(other) => Err(other),
        }
    }

    /// Deletes a note with its chunk rows, vector rows, and FTS row.
    pub fn delete_note(&self, id: NoteId) -> Result<()> {
        self.get_note_by_id(id)?;
        self.with_tx(|tx| {
            crate::embeddings::delete_note_vectors(tx, id.0)?;
            tx.execute("DELETE FROM embeddings WHERE note_id = ?1", params![id.0])
                .map_err(Error::storage)?;
            tx.execute("DELETE FROM notes_fts WHERE rowid = ?1", params![id.0])
                .map_err(Error::storage)?;
            tx.execute("DELETE FROM notes WHERE id = ?1", params![id.0])
                .map_err(Error::storage)?;
            Ok(())
        })
    }
}

fn check_duplicate_content(
    tx: &rusqlite::Transaction<'_>,
    corpus: CorpusId,
    hash: &str,
    exclude: Option<NoteId>,
) -> Result<()> {
    let existing: Option<String> = tx
        .query_row(
            "SELECT path FROM notes
             WHERE corpus_id = ?1 AND content_hash = ?2 AND id != ?3
             LIMIT 1",
            params![corpus.0, hash, exclude.map(|id| id.0).unwrap_or(-1)],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(ignore_no_rows)
        .map_err(Error::storage)?;
    match existing {
        Some(path) => Err(Error::DuplicateContent { corpus, path }),
        None => Ok(()),
    }
}

pub(crate) fn upsert_fts_tx(tx: &rusqlite::Transaction<'_>, note_id: i64, content: &str) -> Result<()> {
    tx.execute("DELETE FROM notes_fts WHERE rowid = ?1", params![note_id])
        .map_err(Error::storage)?;
    tx.execute(
        "INSERT INTO notes_fts (rowid, content) VALUES (?1, ?2)",
        params![note_id, content],
    )
    .map_err(Error::storage)?;
    Ok(())
}
