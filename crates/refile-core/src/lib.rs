//! Core types for refile.
//!
//! This crate provides the data model shared by the operation log and the
//! operation engine: identifiers, log entries, statuses, batch aggregation,
//! path validation and engine configuration.

mod config;
mod entry;
mod error;
mod ids;
mod paths;

pub use config::{ConfigError, EngineConfig, EngineConfigBuilder};
pub use entry::{
    BatchKind, BatchStatus, BatchSummary, NewOperation, OperationEntry, OperationKind,
    OperationStatus,
};
pub use error::ValidationError;
pub use ids::{BatchId, OperationId};
pub use paths::{MAX_FILENAME_LEN, mount_root, validate_filename, validate_safe_path};
