//! Full-text index over note content.
//!
//! FTS5 with a prefix index; rowids mirror note ids. Raw `bm25()` ranks
//! are squashed into a bounded score with the fixed normalization
//! `2·(1/(1+exp(bm25·0.3)))−1`.

use rusqlite::params;

use spall_core::types::SearchHit;
use spall_core::{CorpusId, Error, NoteId, Result};

use crate::Storage;

/// Maximum tokens in a result snippet.
const SNIPPET_TOKENS: i64 = 16;

/// Squashes a raw FTS5 bm25 rank (lower is better, usually negative)
/// into `(-1, 1)` with better matches closer to 1. The formula is a
/// fixed contract.
pub fn normalize_bm25(bm25: f64) -> f64 {
    2.0 * (1.0 / (1.0 + (bm25 * 0.3).exp())) - 1.0
}

impl Storage {
    /// Writes the FTS row for a note, replacing any prior content.
    pub fn upsert_fts(&self, note_id: NoteId, content: &str) -> Result<()> {
        self.with_tx(|tx| crate::notes::upsert_fts_tx(tx, note_id.0, content))
    }

    pub fn delete_fts(&self, note_id: NoteId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM notes_fts WHERE rowid = ?1", params![note_id.0])
                .map_err(Error::storage)?;
            Ok(())
        })
    }

    /// Runs a tokenized FTS5 match expression over the given corpora and
    /// path glob, returning up to `limit` notes ranked by normalized
    /// score (descending; ties broken by note id ascending) with a
    /// highlighted snippet.
    pub fn search_fts(
        &self,
        match_expr: &str,
        corpora: &[CorpusId],
        glob: &str,
        limit: usize,
        highlight: (&str, &str),
    ) -> Result<Vec<SearchHit>> {
        if match_expr.trim().is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = corpora.iter().map(|c| c.0).collect();
        let corpora_json =
            serde_json::to_string(&ids).map_err(|e| Error::storage(e.to_string()))?;
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT n.id, n.corpus_id, n.path,
                            snippet(notes_fts, 0, ?1, ?2, '…', {SNIPPET_TOKENS}),
                            bm25(notes_fts)
                     FROM notes_fts
                     JOIN notes n ON n.id = notes_fts.rowid
                     WHERE notes_fts MATCH ?3
                       AND n.corpus_id IN (SELECT value FROM json_each(?4))
                       AND n.path GLOB ?5
                     ORDER BY bm25(notes_fts) ASC, n.id ASC
                     LIMIT ?6"
                ))
                .map_err(Error::storage)?;
            let rows = stmt
                .query_map(
                    params![
                        highlight.0,
                        highlight.1,
                        match_expr,
                        corpora_json,
                        glob,
                        limit as i64
                    ],
                    |row| {
                        let rank: f64 = row.get(4)?;
                        Ok(SearchHit {
                            note_id: NoteId(row.get(0)?),
                            corpus_id: CorpusId(row.get(1)?),
                            path: row.get(2)?,
                            snippet: row.get(3)?,
                            score: normalize_bm25(rank),
                        })
                    },
                )
                .map_err(Error::storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage)?;
            Ok(rows)
        })
    }
}
