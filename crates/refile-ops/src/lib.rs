//! Batch operation engine for refile.
//!
//! Proposed moves and renames are staged under a batch id, executed as
//! background jobs with pollable progress, recorded in the operation log
//! and reversible one row at a time or a whole batch at once.

mod conflict;
mod engine;
mod error;
mod executor;
mod move_op;
mod operation;
mod progress;
mod queue;
mod rename;
mod staging;
mod undo;

pub use conflict::{ConflictPolicy, is_occupied, resolve_conflict};
pub use engine::{Engine, HistoryPage, JobTicket, Preview};
pub use error::{EngineError, ItemError};
pub use move_op::{MoveFailure, move_item};
pub use operation::{
    DateSource, MoveProposal, PreviewItem, Provenance, RenameEdit, RenameProposal,
    TriageConfirmation, TriageSuggestion,
};
pub use progress::{AlreadyRunning, BatchProgress, JobKey, JobKind, ProgressKind, ProgressStore};
pub use rename::rename_target;
pub use staging::{StagedBatch, StagingCache};
pub use undo::{PreflightFailure, ResponseCode, UndoResult, check_paths, check_status};
