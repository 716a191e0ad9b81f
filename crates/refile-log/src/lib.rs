//! Durable operation log for refile.
//!
//! Every attempted filesystem mutation is recorded here. The log is the
//! single source of truth for history listings and for undo: rows are
//! append-only and only their `status` column ever changes.

mod error;
mod queries;
mod sqlite;

pub use error::LogError;
pub use queries::{DEFAULT_PAGE_SIZE, HistoryQuery, MAX_PAGE_SIZE, MAX_BATCH_SUMMARIES};
pub use sqlite::OperationLog;
