use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use refile_core::{BatchId, OperationEntry, OperationId, OperationKind, OperationStatus};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use tracing::debug;

use crate::error::LogError;

pub(crate) const ENTRY_COLUMNS: &str =
    "id, batch_id, operation_type, source_path, target_path, timestamp, status, mode";

/// Handle to the operation log database.
///
/// Cloning is cheap; all clones share one connection, so writes are
/// serialized and readers never observe a half-written row.
#[derive(Debug, Clone)]
pub struct OperationLog {
    conn: Arc<Mutex<Connection>>,
}

impl OperationLog {
    /// Open (or create) the log at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LogError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened operation log");
        Self::from_connection(conn)
    }

    /// Open a private in-memory log.
    pub fn open_in_memory() -> Result<Self, LogError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LogError> {
        configure_pragmas(&conn)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        debug!("Operation log schema initialized (version 1)");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, LogError>,
    ) -> Result<T, LogError> {
        let mut conn = self.conn.lock().map_err(|_| LogError::Poisoned)?;
        f(&mut conn)
    }
}

fn configure_pragmas(conn: &Connection) -> Result<(), LogError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    debug!("SQLite pragmas configured (WAL mode)");
    Ok(())
}

pub(crate) fn path_text(path: &Path) -> Result<&str, LogError> {
    path.to_str().ok_or_else(|| LogError::NonUtf8Path {
        path: path.to_path_buf(),
    })
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_text<T>(idx: usize, text: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Map a row selected with [`ENTRY_COLUMNS`].
pub(crate) fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<OperationEntry> {
    let kind: String = row.get(2)?;
    let source: String = row.get(3)?;
    let target: String = row.get(4)?;
    let timestamp: String = row.get(5)?;
    let status: String = row.get(6)?;

    Ok(OperationEntry {
        id: OperationId(row.get(0)?),
        batch_id: BatchId::from(row.get::<_, String>(1)?),
        kind: parse_text::<OperationKind>(2, &kind)?,
        source_path: PathBuf::from(source),
        target_path: PathBuf::from(target),
        timestamp: parse_timestamp(5, &timestamp)?,
        status: parse_text::<OperationStatus>(6, &status)?,
        mode: row.get(7)?,
    })
}
