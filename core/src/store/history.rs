use super::PortfolioStore;
use crate::{
    error::{CoreError, CoreResult},
    query_executor::QueryOutcome,
};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

/// One executed ad-hoc query, successful or not.
/// Append-only: entries are never mutated after recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHistoryEntry {
    pub entry_id: String,
    pub query_text: String,
    pub executed_at: String, // RFC 3339
    pub outcome: QueryOutcome,
    pub row_count: i64,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

impl PortfolioStore {
    pub fn record_query(&self, entry: &QueryHistoryEntry) -> CoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO query_history (
                    entry_id, query_text, executed_at, outcome, row_count,
                    duration_ms, error_message
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.entry_id,
                    entry.query_text,
                    entry.executed_at,
                    entry.outcome.as_str(),
                    entry.row_count,
                    entry.duration_ms,
                    entry.error_message,
                ],
            )
            .map_err(CoreError::from_sqlite_write)?;
        Ok(())
    }

    /// Most recent first, capped at `limit`.
    pub fn list_query_history(&self, limit: usize) -> CoreResult<Vec<QueryHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, query_text, executed_at, outcome, row_count,
                    duration_ms, error_message
             FROM query_history
             ORDER BY executed_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], Self::map_history_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_query_history(&self, entry_id: &str) -> CoreResult<QueryHistoryEntry> {
        self.conn
            .query_row(
                "SELECT entry_id, query_text, executed_at, outcome, row_count,
                        duration_ms, error_message
                 FROM query_history WHERE entry_id = ?1",
                params![entry_id],
                Self::map_history_row,
            )
            .optional()?
            .ok_or_else(|| CoreError::NotFound {
                entity: "query history entry",
                id: entry_id.to_string(),
            })
    }

    fn map_history_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryHistoryEntry> {
        Ok(QueryHistoryEntry {
            entry_id: row.get(0)?,
            query_text: row.get(1)?,
            executed_at: row.get(2)?,
            outcome: QueryOutcome::parse(&row.get::<_, String>(3)?)
                .unwrap_or(QueryOutcome::Failed),
            row_count: row.get(4)?,
            duration_ms: row.get(5)?,
            error_message: row.get(6)?,
        })
    }
}
