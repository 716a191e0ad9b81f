use chrono::{SubsecRound, Utc};
use refile_core::{
    BatchId, BatchKind, BatchStatus, BatchSummary, NewOperation, OperationEntry, OperationId,
    OperationKind, OperationStatus,
};
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use crate::error::LogError;
use crate::sqlite::{
    ENTRY_COLUMNS, OperationLog, entry_from_row, format_timestamp, parse_text, parse_timestamp,
    path_text,
};

/// Default number of rows per history page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Largest accepted history page.
pub const MAX_PAGE_SIZE: u32 = 200;
/// Number of batch summaries returned by [`OperationLog::batch_summaries`].
pub const MAX_BATCH_SUMMARIES: u32 = 100;

/// A page of the history listing, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    /// Restrict to one operation kind.
    pub kind: Option<OperationKind>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            kind: None,
        }
    }
}

impl HistoryQuery {
    /// Create a query for one page.
    pub fn page(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            kind: None,
        }
    }

    /// Restrict the query to one operation kind.
    pub fn with_kind(mut self, kind: Option<OperationKind>) -> Self {
        self.kind = kind;
        self
    }

    fn validate(&self) -> Result<(), LogError> {
        if self.page == 0 {
            return Err(LogError::InvalidQuery {
                message: "page must be at least 1".to_string(),
            });
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(LogError::InvalidQuery {
                message: format!("page_size must be between 1 and {MAX_PAGE_SIZE}"),
            });
        }
        Ok(())
    }

    fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.page_size)
    }
}

impl OperationLog {
    // ── Writes ───────────────────────────────────────────────────

    /// Append a new entry and return it with its assigned id.
    pub fn append(&self, op: &NewOperation) -> Result<OperationEntry, LogError> {
        let source = path_text(&op.source_path)?;
        let target = path_text(&op.target_path)?;
        let timestamp = Utc::now().trunc_subsecs(6);

        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO operation_log \
                 (batch_id, operation_type, source_path, target_path, timestamp, status, mode) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    op.batch_id.as_str(),
                    op.kind.as_ref(),
                    source,
                    target,
                    format_timestamp(&timestamp),
                    op.status.as_ref(),
                    op.mode,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!(id, batch = %op.batch_id, kind = %op.kind, status = %op.status, "Logged operation");

        Ok(OperationEntry {
            id: OperationId(id),
            batch_id: op.batch_id.clone(),
            kind: op.kind,
            source_path: op.source_path.clone(),
            target_path: op.target_path.clone(),
            timestamp,
            status: op.status,
            mode: op.mode.clone(),
        })
    }

    /// Move an entry to a new status, enforcing the allowed transitions.
    pub fn set_status(
        &self,
        id: OperationId,
        to: OperationStatus,
    ) -> Result<OperationEntry, LogError> {
        let entry = self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM operation_log WHERE id = ?1",
                    params![id.0],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Err(LogError::NotFound { id });
            };
            let from: OperationStatus = parse_text(0, &current)?;
            if !from.can_transition_to(to) {
                return Err(LogError::InvalidTransition { id, from, to });
            }

            tx.execute(
                "UPDATE operation_log SET status = ?1 WHERE id = ?2",
                params![to.as_ref(), id.0],
            )?;
            let entry = tx.query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM operation_log WHERE id = ?1"),
                params![id.0],
                entry_from_row,
            )?;
            tx.commit()?;
            Ok(entry)
        })?;

        info!(id = %id, status = %to, "Operation status updated");
        Ok(entry)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Fetch a single entry.
    pub fn get(&self, id: OperationId) -> Result<Option<OperationEntry>, LogError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {ENTRY_COLUMNS} FROM operation_log WHERE id = ?1"),
                    params![id.0],
                    entry_from_row,
                )
                .optional()?)
        })
    }

    /// Completed entries of a batch, most recent first.
    ///
    /// This is the order in which a batch must be undone.
    pub fn revertible_in_batch(&self, batch_id: &BatchId) -> Result<Vec<OperationEntry>, LogError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM operation_log \
                 WHERE batch_id = ?1 AND status = 'completed' \
                 ORDER BY id DESC"
            ))?;
            let rows = stmt
                .query_map(params![batch_id.as_str()], entry_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// All entries of a batch in the order they were written.
    pub fn batch_entries(&self, batch_id: &BatchId) -> Result<Vec<OperationEntry>, LogError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM operation_log WHERE batch_id = ?1 ORDER BY id ASC"
            ))?;
            let rows = stmt
                .query_map(params![batch_id.as_str()], entry_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Whether any entry belongs to this batch.
    pub fn batch_exists(&self, batch_id: &BatchId) -> Result<bool, LogError> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM operation_log WHERE batch_id = ?1)",
                params![batch_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    /// Number of completed entries in a batch.
    pub fn count_revertible(&self, batch_id: &BatchId) -> Result<usize, LogError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM operation_log WHERE batch_id = ?1 AND status = 'completed'",
                params![batch_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// One page of the history, newest first.
    pub fn list(&self, query: &HistoryQuery) -> Result<Vec<OperationEntry>, LogError> {
        query.validate()?;
        let kind = query.kind.map(|k| k.as_ref().to_string());

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM operation_log \
                 WHERE (?1 IS NULL OR operation_type = ?1) \
                 ORDER BY id DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![kind, i64::from(query.page_size), query.offset()],
                    entry_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Total number of entries, optionally of one kind.
    pub fn count(&self, kind: Option<OperationKind>) -> Result<usize, LogError> {
        let kind = kind.map(|k| k.as_ref().to_string());
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM operation_log WHERE (?1 IS NULL OR operation_type = ?1)",
                params![kind],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Grouped batch summaries ordered by most recent activity.
    pub fn batch_summaries(&self, limit: u32) -> Result<Vec<BatchSummary>, LogError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT batch_id, \
                        CASE WHEN COUNT(DISTINCT operation_type) > 1 THEN 'MIXED' \
                             ELSE MAX(operation_type) END, \
                        COUNT(*), \
                        MIN(timestamp), \
                        SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), \
                        SUM(CASE WHEN status = 'reverted' THEN 1 ELSE 0 END), \
                        SUM(CASE WHEN status = 'revert_failed' THEN 1 ELSE 0 END), \
                        SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) \
                 FROM operation_log \
                 GROUP BY batch_id \
                 ORDER BY MAX(id) DESC \
                 LIMIT ?1",
            )?;

            let rows = stmt
                .query_map(params![limit], |row| {
                    let kind: String = row.get(1)?;
                    let timestamp: String = row.get(3)?;
                    let total = row.get::<_, i64>(2)? as usize;
                    let completed = row.get::<_, i64>(4)? as usize;
                    let reverted = row.get::<_, i64>(5)? as usize;
                    let revert_failed = row.get::<_, i64>(6)? as usize;
                    let failed = row.get::<_, i64>(7)? as usize;

                    Ok(BatchSummary {
                        batch_id: BatchId::from(row.get::<_, String>(0)?),
                        kind: parse_text::<BatchKind>(1, &kind)?,
                        file_count: total,
                        timestamp: parse_timestamp(3, &timestamp)?,
                        status: BatchStatus::from_counts(total, reverted, revert_failed + failed),
                        completed_count: completed,
                        reverted_count: reverted,
                        failed_count: revert_failed + failed,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}
