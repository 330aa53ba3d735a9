//! Persisted query scopes.

use rusqlite::params;

use spall_core::types::Query;
use spall_core::{now_ms, CorpusId, Error, QueryId, Result, WorkspaceId};

use crate::schema::ignore_no_rows;
use crate::Storage;

fn query_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Query, String)> {
    let corpora_json: String = row.get(3)?;
    Ok((
        Query {
            id: QueryId(row.get(0)?),
            viewer: WorkspaceId(row.get(1)?),
            tracked: row.get::<_, i64>(2)? != 0,
            corpora: Vec::new(),
            created_at: row.get(4)?,
        },
        corpora_json,
    ))
}

fn hydrate(pair: (Query, String)) -> Result<Query> {
    let (mut query, corpora_json) = pair;
    let ids: Vec<i64> = serde_json::from_str(&corpora_json)
        .map_err(|e| Error::storage(format!("corrupt query corpora: {e}")))?;
    query.corpora = ids.into_iter().map(CorpusId).collect();
    Ok(query)
}

impl Storage {
    /// Persists a query scope. Callers validate the viewer and corpora
    /// first.
    pub fn insert_query(
        &self,
        viewer: WorkspaceId,
        tracked: bool,
        corpora: &[CorpusId],
    ) -> Result<Query> {
        let ids: Vec<i64> = corpora.iter().map(|c| c.0).collect();
        let corpora_json =
            serde_json::to_string(&ids).map_err(|e| Error::storage(e.to_string()))?;
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queries (viewer, tracked, corpora, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![viewer.0, tracked as i64, corpora_json, now],
            )
            .map_err(Error::storage)?;
            Ok(Query {
                id: QueryId(conn.last_insert_rowid()),
                viewer,
                tracked,
                corpora: corpora.to_vec(),
                created_at: now,
            })
        })
    }

    pub fn get_query(&self, id: QueryId) -> Result<Query> {
        let pair = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, viewer, tracked, corpora, created_at FROM queries WHERE id = ?1",
                params![id.0],
                query_from_row,
            )
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(Error::storage)
        })?;
        match pair {
            Some(pair) => hydrate(pair),
            None => Err(Error::QueryNotFound(id)),
        }
    }

    /// Most recently created queries, newest first.
    pub fn recent_queries(&self, limit: usize) -> Result<Vec<Query>> {
        let pairs = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, viewer, tracked, corpora, created_at FROM queries
                     ORDER BY id DESC LIMIT ?1",
                )
                .map_err(Error::storage)?;
            let rows = stmt
                .query_map(params![limit as i64], query_from_row)
                .map_err(Error::storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage);
            rows
        })?;
        pairs.into_iter().map(hydrate).collect()
    }

    /// Deletes a query and its staged + committed access rows.
    pub fn remove_query(&self, id: QueryId) -> Result<()> {
        self.get_query(id)?;
        self.with_tx(|tx| {
            tx.execute("DELETE FROM staging WHERE query_id = ?1", params![id.0])
                .map_err(Error::storage)?;
            tx.execute("DELETE FROM committed WHERE query_id = ?1", params![id.0])
                .map_err(Error::storage)?;
            tx.execute("DELETE FROM queries WHERE id = ?1", params![id.0])
                .map_err(Error::storage)?;
            Ok(())
        })
    }
}
