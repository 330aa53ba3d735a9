//! Workspace operations.

use rusqlite::params;

use spall_core::types::Workspace;
use spall_core::{now_ms, Error, Result, WorkspaceId};

use crate::schema::ignore_no_rows;
use crate::Storage;

fn workspace_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: WorkspaceId(row.get(0)?),
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

impl Storage {
    pub fn get_workspace_by_id(&self, id: WorkspaceId) -> Result<Workspace> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at, updated_at FROM workspaces WHERE id = ?1",
                params![id.0],
                workspace_from_row,
            )
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(Error::storage)?
            .ok_or_else(|| Error::WorkspaceNotFound(id.to_string()))
        })
    }

    pub fn get_workspace_by_name(&self, name: &str) -> Result<Workspace> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at, updated_at FROM workspaces WHERE name = ?1",
                params![name],
                workspace_from_row,
            )
            .map(Some)
            .or_else(ignore_no_rows)
            .map_err(Error::storage)?
            .ok_or_else(|| Error::WorkspaceNotFound(name.to_string()))
        })
    }

    pub fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, created_at, updated_at FROM workspaces ORDER BY id")
                .map_err(Error::storage)?;
            let rows = stmt
                .query_map([], workspace_from_row)
                .map_err(Error::storage)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage)?;
            Ok(rows)
        })
    }

    pub fn get_or_create_workspace(&self, name: &str) -> Result<(Workspace, bool)> {
        match self.get_workspace_by_name(name) {
            Ok(workspace) => Ok((workspace, false)),
            Err(Error::WorkspaceNotFound(_)) => {
                let now = now_ms();
                let workspace = self.with_conn(|conn| {
                    conn.execute(
                        "INSERT INTO workspaces (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
                        params![name, now],
                    )
                    .map_err(Error::storage)?;
                    Ok(Workspace {
                        id: WorkspaceId(conn.last_insert_rowid()),
                        name: name.to_string(),
                        created_at: now,
                        updated_at: now,
                    })
                })?;
                Ok((workspace, true))
            }
            Err(other) => Err(other),
        }
    }

    /// Deletes a workspace and its queries (and through them, their
    /// staged and committed access rows). Corpora and notes are never
    /// touched.
    pub fn remove_workspace(&self, id: WorkspaceId) -> Result<()> {
        self.get_workspace_by_id(id)?;
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM staging WHERE query_id IN (SELECT id FROM queries WHERE viewer = ?1)",
                params![id.0],
            )
            .map_err(Error::storage)?;
            tx.execute(
                "DELETE FROM committed WHERE query_id IN (SELECT id FROM queries WHERE viewer = ?1)",
                params![id.0],
            )
            .map_err(Error::storage)?;
            tx.execute("DELETE FROM queries WHERE viewer = ?1", params![id.0])
                .map_err(Error::storage)?;
            tx.execute("DELETE FROM workspaces WHERE id = ?1", params![id.0])
                .map_err(Error::storage)?;
            Ok(())
        })
    }
}
