//! Query scope and retrieval.
//!
//! A persisted query object fixes a viewer workspace and an ordered set
//! of corpus ids; every listing, search, fetch, and path aggregation is
//! filtered through that scope. Vector search over-fetches from the
//! index and post-filters by corpus and path glob.

pub mod globs;
pub mod tokenize;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use spall_core::types::{CorpusPaths, Note, NotesPage, Query, SearchHit, VectorHit};
use spall_core::{CorpusId, NoteId, QueryId, Result, WorkspaceId};
use spall_core::types::ACCESS_KIND_NOTE_READ;
use spall_llm::EmbeddingProvider;
use spall_sqlite::Storage;

use globs::PathFilter;

/// Over-fetch factor for vector search before post-filtering.
const VSEARCH_OVERFETCH: usize = 3;
/// Characters of note content returned per vector hit.
const VSEARCH_CHUNK_CHARS: usize = 2048;
/// Snippet highlight delimiters for keyword search.
const HIGHLIGHT: (&str, &str) = ("<b>", "</b>");

/// Keyword search mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Tokenize and AND-join the query (safe for arbitrary input).
    #[default]
    Plain,
    /// Pass the query through as a raw FTS5 expression.
    Fts,
}

impl SearchMode {
    pub fn parse(mode: Option<&str>) -> Self {
        match mode {
            Some("fts") => SearchMode::Fts,
            _ => SearchMode::Plain,
        }
    }
}

/// Retrieval facade over one storage handle.
#[derive(Clone)]
pub struct QueryEngine {
    storage: Storage,
}

impl QueryEngine {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Validates the viewer and all corpus ids, then persists the scope.
    pub fn create(
        &self,
        viewer: WorkspaceId,
        tracked: bool,
        corpora: &[CorpusId],
    ) -> Result<Query> {
        self.storage.get_workspace_by_id(viewer)?;
        for corpus in corpora {
            self.storage.get_corpus_by_id(*corpus)?;
        }
        self.storage.insert_query(viewer, tracked, corpora)
    }

    pub fn get(&self, id: QueryId) -> Result<Query> {
        self.storage.get_query(id)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<Query>> {
        self.storage.recent_queries(limit)
    }

    /// Keyset-paginated notes listing over the query's corpora.
    pub fn notes(
        &self,
        id: QueryId,
        path: Option<&str>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<NotesPage> {
        let scope = self.storage.get_query(id)?;
        self.storage
            .list_notes_by_path(&scope.corpora, path.unwrap_or("*"), cursor, limit)
    }

    /// Keyword search scoped to the query.
    pub fn search(
        &self,
        id: QueryId,
        q: &str,
        path: Option<&str>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<SearchHit>> {
        let scope = self.storage.get_query(id)?;
        let match_expr = match mode {
            SearchMode::Plain => tokenize::plain_match_expr(q),
            SearchMode::Fts => q.trim().to_string(),
        };
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        debug!(query = %id, expr = %match_expr, "keyword search");
        self.storage.search_fts(
            &match_expr,
            &scope.corpora,
            path.unwrap_or("*"),
            limit,
            HIGHLIGHT,
        )
    }

    /// Semantic search: embed the query, over-fetch `limit × 3` nearest
    /// chunks, then keep only hits inside the scope's corpora whose path
    /// matches the glob. Results come back short when the over-fetch
    /// underselects; there is no retry loop.
    pub async fn vsearch(
        &self,
        provider: &Arc<dyn EmbeddingProvider>,
        id: QueryId,
        q: &str,
        path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let scope = self.storage.get_query(id)?;
        let filter = PathFilter::new(path.unwrap_or("*"))?;
        let corpora: HashSet<CorpusId> = scope.corpora.iter().copied().collect();

        let vector = provider.embed(q).await?;
        let matches = self
            .storage
            .vector_search(&vector, limit * VSEARCH_OVERFETCH)?;

        let mut hits = Vec::new();
        for m in matches {
            if !corpora.contains(&m.corpus_id) || !filter.matches(&m.path) {
                continue;
            }
            let chunk: String = m
                .content
                .chars()
                .skip(m.chunk_pos.max(0) as usize)
                .take(VSEARCH_CHUNK_CHARS)
                .collect();
            hits.push(VectorHit {
                note_id: m.note_id,
                corpus_id: m.corpus_id,
                path: m.path,
                chunk,
                chunk_pos: m.chunk_pos,
                score: 1.0 - m.distance,
            });
            if hits.len() >= limit {
                break;
            }
        }
        Ok(hits)
    }

    /// Full notes for the given ids. Tracked queries record one staged
    /// `note read` access row per fetched id.
    pub fn fetch(&self, id: QueryId, ids: &[NoteId]) -> Result<Vec<Note>> {
        let scope = self.storage.get_query(id)?;
        let mut notes = Vec::with_capacity(ids.len());
        for note_id in ids {
            notes.push(self.storage.get_note_by_id(*note_id)?);
        }
        if scope.tracked {
            for note_id in ids {
                self.storage
                    .append_staging(*note_id, id, ACCESS_KIND_NOTE_READ, "{}")?;
            }
        }
        Ok(notes)
    }

    /// Note paths in scope, grouped by corpus.
    pub fn paths(&self, id: QueryId, path: Option<&str>) -> Result<Vec<CorpusPaths>> {
        let scope = self.storage.get_query(id)?;
        self.storage
            .note_paths_grouped(&scope.corpora, path.unwrap_or("*"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spall_llm::MockEmbeddingProvider;

    const DEFAULT: CorpusId = CorpusId(1);

    fn engine() -> (QueryEngine, Storage) {
        let storage = Storage::open_in_memory("test-model", 8).unwrap();
        (QueryEngine::new(storage.clone()), storage)
    }

    fn viewer(storage: &Storage) -> WorkspaceId {
        storage.get_or_create_workspace("viewer").unwrap().0.id
    }

    #[test]
    fn create_validates_scope() {
        let (engine, storage) = engine();
        let ws = viewer(&storage);

        let err = engine
            .create(WorkspaceId(99), false, &[DEFAULT])
            .unwrap_err();
        assert_eq!(err.code(), "workspace.not_found");

        let err = engine.create(ws, false, &[CorpusId(42)]).unwrap_err();
        assert_eq!(err.code(), "corpus.not_found");

        let query = engine.create(ws, true, &[DEFAULT]).unwrap();
        assert_eq!(engine.get(query.id).unwrap().viewer, ws);
        assert_eq!(engine.recent(5).unwrap()[0].id, query.id);
    }

    #[test]
    fn notes_listing_respects_scope_and_cursor() {
        let (engine, storage) = engine();
        let ws = viewer(&storage);
        let (other, _) = storage.get_or_create_corpus("other").unwrap();
        for (corpus, path) in [
            (DEFAULT, "a.md"),
            (DEFAULT, "b.md"),
            (other.id, "c.md"),
        ] {
            storage.add_note(corpus, path, path, false).unwrap();
        }

        let query = engine.create(ws, false, &[DEFAULT]).unwrap();
        let page = engine.notes(query.id, None, None, 10).unwrap();
        let paths: Vec<_> = page.notes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b.md"]);

        let first = engine.notes(query.id, None, None, 1).unwrap();
        assert_eq!(first.next_cursor.as_deref(), Some("a.md"));
        let second = engine
            .notes(query.id, None, first.next_cursor.as_deref(), 1)
            .unwrap();
        assert_eq!(second.notes[0].path, "b.md");
    }

    #[test]
    fn plain_vs_fts_modes() {
        let (engine, storage) = engine();
        let ws = viewer(&storage);
        storage.add_note(DEFAULT, "a.md", "old_name", false).unwrap();
        storage.add_note(DEFAULT, "b.md", "new_name", false).unwrap();
        let query = engine.create(ws, false, &[DEFAULT]).unwrap();

        let hits = engine
            .search(query.id, "old_name OR new_name", None, 10, SearchMode::Plain)
            .unwrap();
        assert!(hits.is_empty());

        let hits = engine
            .search(query.id, "old_name OR new_name", None, 10, SearchMode::Fts)
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn empty_query_is_empty_in_both_modes() {
        let (engine, storage) = engine();
        let ws = viewer(&storage);
        storage.add_note(DEFAULT, "a.md", "body", false).unwrap();
        let query = engine.create(ws, false, &[DEFAULT]).unwrap();

        for mode in [SearchMode::Plain, SearchMode::Fts] {
            assert!(engine.search(query.id, "", None, 10, mode).unwrap().is_empty());
            assert!(engine.search(query.id, "  ", None, 10, mode).unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn vsearch_filters_by_corpus_scope() {
        let (engine, storage) = engine();
        let ws = viewer(&storage);
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(8));
        let (other, _) = storage.get_or_create_corpus("other").unwrap();

        // Identical content in both corpora: identical vectors, so only
        // the scope filter separates them.
        for corpus in [DEFAULT, other.id] {
            let note = storage
                .add_note(corpus, "jwt.md", "JWT tokens signing notes", true)
                .unwrap();
            let vector = provider.embed("JWT tokens signing notes").await.unwrap();
            storage
                .save_embeddings(
                    note.id,
                    &[spall_core::types::Chunk {
                        text: "JWT tokens signing notes".into(),
                        pos: 0,
                    }],
                    &[vector],
                )
                .unwrap();
        }

        let query = engine.create(ws, false, &[DEFAULT]).unwrap();
        let hits = engine
            .vsearch(&provider, query.id, "JWT tokens", None, 10)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.corpus_id == DEFAULT));
    }

    #[tokio::test]
    async fn vsearch_scores_and_slices_chunks() {
        let (engine, storage) = engine();
        let ws = viewer(&storage);
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(8));

        let content = "needle haystack ".repeat(200); // 3200 chars
        let note = storage.add_note(DEFAULT, "big.md", &content, false).unwrap();
        let vector = provider.embed("needle haystack").await.unwrap();
        storage
            .save_embeddings(
                note.id,
                &[spall_core::types::Chunk {
                    text: "needle haystack".into(),
                    pos: 100,
                }],
                &[vector],
            )
            .unwrap();

        let query = engine.create(ws, false, &[DEFAULT]).unwrap();
        let hits = engine
            .vsearch(&provider, query.id, "needle haystack", None, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        let hit = &hits[0];
        assert_eq!(hit.chunk_pos, 100);
        assert_eq!(hit.chunk.chars().count(), 2048);
        assert!(hit.score > 0.99);
    }

    #[tokio::test]
    async fn vsearch_path_glob_post_filters() {
        let (engine, storage) = engine();
        let ws = viewer(&storage);
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new(8));

        for path in ["docs/a.md", "src/b.md"] {
            let note = storage.add_note(DEFAULT, path, path, true).unwrap();
            let vector = provider.embed("shared query").await.unwrap();
            storage
                .save_embeddings(
                    note.id,
                    &[spall_core::types::Chunk {
                        text: path.into(),
                        pos: 0,
                    }],
                    &[vector],
                )
                .unwrap();
        }

        let query = engine.create(ws, false, &[DEFAULT]).unwrap();
        let hits = engine
            .vsearch(&provider, query.id, "shared query", Some("docs/*"), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "docs/a.md");
    }

    #[test]
    fn tracked_fetch_stages_note_reads() {
        let (engine, storage) = engine();
        let ws = viewer(&storage);
        let a = storage.add_note(DEFAULT, "a.md", "alpha", false).unwrap();
        let b = storage.add_note(DEFAULT, "b.md", "beta", false).unwrap();

        let tracked = engine.create(ws, true, &[DEFAULT]).unwrap();
        let untracked = engine.create(ws, false, &[DEFAULT]).unwrap();

        let notes = engine.fetch(tracked.id, &[a.id, b.id]).unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(storage.count_staging().unwrap(), 2);

        engine.fetch(untracked.id, &[a.id]).unwrap();
        assert_eq!(storage.count_staging().unwrap(), 2);
    }

    #[test]
    fn fetch_unknown_note_is_typed() {
        let (engine, storage) = engine();
        let ws = viewer(&storage);
        let query = engine.create(ws, true, &[DEFAULT]).unwrap();
        let err = engine.fetch(query.id, &[NoteId(404)]).unwrap_err();
        assert_eq!(err.code(), "note.not_found");

        let err = engine.fetch(QueryId(404), &[]).unwrap_err();
        assert_eq!(err.code(), "query.not_found");
    }

    #[test]
    fn paths_group_by_corpus() {
        let (engine, storage) = engine();
        let ws = viewer(&storage);
        let (other, _) = storage.get_or_create_corpus("other").unwrap();
        storage.add_note(DEFAULT, "a.md", "1", false).unwrap();
        storage.add_note(other.id, "b.md", "2", false).unwrap();

        let query = engine.create(ws, false, &[DEFAULT, other.id]).unwrap();
        let groups = engine.paths(query.id, None).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].paths, vec!["a.md"]);
        assert_eq!(groups[1].paths, vec!["b.md"]);
    }
}
