//! Chunk rows and the cosine vector index.
//!
//! Every chunk row in `embeddings` owns exactly one row in the `vectors`
//! vec0 table, keyed by the decimal string of the chunk row id. Both are
//! written and deleted inside a single transaction so the 1:1 invariant
//! holds after every operation.

use rusqlite::params;

use spall_core::types::{Chunk, EmbeddingRow, VectorMatch};
use spall_core::{CorpusId, EmbeddingId, Error, NoteId, Result};

use crate::Storage;

/// Little-endian f32 blob, the wire format vec0 accepts for both inserts
/// and KNN probes.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Deletes the vector rows backing a note's chunk rows. Runs inside the
/// caller's transaction; the chunk rows themselves are left to the
/// caller.
pub(crate) fn delete_note_vectors(tx: &rusqlite::Transaction<'_>, note_id: i64) -> Result<()> {
    let keys: Vec<String> = {
        let mut stmt = tx
            .prepare("SELECT id FROM embeddings WHERE note_id = ?1")
            .map_err(Error::storage)?;
        let rows = stmt
            .query_map(params![note_id], |row| row.get::<_, i64>(0))
            .map_err(Error::storage)?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .map_err(Error::storage)?
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        rows
    };
    for key in keys {
        tx.execute("DELETE FROM vectors WHERE key = ?1", params![key])
            .map_err(Error::storage)?;
    }
    Ok(())
}

impl Storage {
    /// Atomically replaces a note's chunk rows and vector rows. Chunk
    /// and vector counts must match, and every vector must have the
    /// configured dimension.
    pub fn save_embeddings(
        &self,
        note_id: NoteId,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(Error::storage(format!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        for vector in vectors {
            if vector.len() != self.dims() {
                return Err(Error::storage(format!(
                    "vector dimension mismatch: expected {}, got {}",
                    self.dims(),
                    vector.len()
                )));
            }
        }
        self.with_tx(|tx| {
            delete_note_vectors(tx, note_id.0)?;
            tx.execute("DELETE FROM embeddings WHERE note_id = ?1", params![note_id.0])
                .map_err(Error::storage)?;
            for (seq, (chunk, vector)) in chunks.iter().zip(vectors).enumerate() {
                tx.execute(
                    "INSERT INTO embeddings (note_id, seq, pos) VALUES (?1, ?2, ?3)",
                    params![note_id.0, seq as i64, chunk.pos as i64],
                )
                .map_err(Error::storage)?;
                let key = tx.last_insert_rowid().to_string();
                tx.execute(
                    "INSERT INTO vectors (key, data) VALUES (?1, ?2)",
                    params![key, vector_to_blob(vector)],
                )
                .map_err(Error::storage)?;
            }
            Ok(())
        })
    }

    /// Writes one embed batch: clears residual chunk + vector rows for
    /// the notes first seen in this batch, then inserts chunk rows with
    /// explicit seqs and their vectors, all in a single transaction. A
    /// note whose chunks span batches keeps its earlier rows.
    pub fn save_chunk_batch(
        &self,
        reset_notes: &[NoteId],
        items: &[(NoteId, i64, Chunk, Vec<f32>)],
    ) -> Result<()> {
        for (_, _, _, vector) in items {
            if vector.len() != self.dims() {
                return Err(Error::storage(format!(
                    "vector dimension mismatch: expected {}, got {}",
                    self.dims(),
                    vector.len()
                )));
            }
        }
        self.with_tx(|tx| {
            for note_id in reset_notes {
                delete_note_vectors(tx, note_id.0)?;
                tx.execute(
                    "DELETE FROM embeddings WHERE note_id = ?1",
                    params![note_id.0],
                )
                .map_err(Error::storage)?;
            }
            for (note_id, seq, chunk, vector) in items {
                tx.execute(
                    "INSERT INTO embeddings (note_id, seq, pos) VALUES (?1, ?2, ?3)",
                    params![note_id.0, seq, chunk.pos as i64],
                )
                .map_err(Error::storage)?;
                let key = tx.last_insert_rowid().to_string();
                tx.execute(
                    "INSERT INTO vectors (key, data) VALUES (?1, ?2)",
                    params![key, vector_to_blob(vector)],
                )
                .map_err(Error::storage)?;
            }
            Ok(())
        })
    }

    /// Drops a note's chunk and vector rows without touching the note.
    /// The scanner uses this eagerly on modified notes so the embed step
    /// is the only writer left.
    pub fn clear_embeddings(&self, note_id: NoteId) -> Result<()> {
        self.with_tx(|tx| {
            delete_note_vectors(tx, note_id.0)?;
            tx.execute("DELETE FROM embeddings WHERE note_id = ?1", params![note_id.0])
                .map_err(Error::storage)?;
            Ok(())
        })
    }

    pub fn chunks_for_note(&self, note_id: NoteId) -> Result<Vec<EmbeddingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, note_id, seq, pos FROM embeddings
                     WHERE note_id = ?1 ORDER BY seq",
                )
                .map_err(Error::storage)?;
            let rows = stmt
                .query_map(params![note_id.0], |row| {
                    Ok(EmbeddingRow {
                        id: EmbeddingId(row.get(0)?),
                        note_id: NoteId(row.get(1)?),
                        seq: row.get(2)?,
                        pos: row.get(3)?,
                    })
                })
                .map_err(Error::storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage)?;
            Ok(rows)
        })
    }

    /// Total vector rows in the index. Test and status aid.
    pub fn vector_row_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(Error::storage)
        })
    }

    /// The k nearest chunk rows to `query` by cosine distance, joined
    /// through embeddings to notes. No corpus or path filtering happens
    /// here; retrieval post-filters.
    pub fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        if query.len() != self.dims() {
            return Err(Error::storage(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dims(),
                query.len()
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT v.key, v.distance, e.note_id, e.pos, n.corpus_id, n.path, n.content
                     FROM (SELECT key, distance FROM vectors
                           WHERE data MATCH ?1 AND k = ?2
                           ORDER BY distance) v
                     JOIN embeddings e ON e.id = CAST(v.key AS INTEGER)
                     JOIN notes n ON n.id = e.note_id
                     ORDER BY v.distance",
                )
                .map_err(Error::storage)?;
            let rows = stmt
                .query_map(params![vector_to_blob(query), k as i64], |row| {
                    let key: String = row.get(0)?;
                    Ok(VectorMatch {
                        embedding_id: EmbeddingId(key.parse().unwrap_or_default()),
                        distance: row.get(1)?,
                        note_id: NoteId(row.get(2)?),
                        chunk_pos: row.get(3)?,
                        corpus_id: CorpusId(row.get(4)?),
                        path: row.get(5)?,
                        content: row.get(6)?,
                    })
                })
                .map_err(Error::storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage)?;
            Ok(rows)
        })
    }
}
