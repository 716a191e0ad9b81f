//! Operation log entries and batch aggregation.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::ids::{BatchId, OperationId};

/// The kind of filesystem mutation an entry records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// The file was moved to a rule-derived destination.
    Move,
    /// The file was renamed inside its directory.
    Rename,
}

/// Lifecycle status of a log entry.
///
/// Only the status of an entry ever changes after it is written.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationStatus {
    /// The mutation happened and has not been undone.
    Completed,
    /// The mutation was undone.
    Reverted,
    /// Undo was attempted and the entry is provably not revertible right now.
    RevertFailed,
    /// The mutation left a partial filesystem change behind.
    Failed,
}

impl OperationStatus {
    /// Check whether a status change is allowed.
    ///
    /// `revert_failed -> revert_failed` is allowed so a failed retry can be
    /// recorded again.
    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Completed, Self::Reverted)
                | (Self::Completed, Self::RevertFailed)
                | (Self::RevertFailed, Self::Reverted)
                | (Self::RevertFailed, Self::RevertFailed)
        )
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Reverted | Self::Failed)
    }
}

/// One row of the operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationEntry {
    pub id: OperationId,
    pub batch_id: BatchId,
    #[serde(rename = "operation_type")]
    pub kind: OperationKind,
    /// Where the file was before the mutation.
    pub source_path: PathBuf,
    /// Where the mutation put it.
    pub target_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub status: OperationStatus,
    /// Free-form annotation, e.g. which heuristic produced a rename.
    pub mode: Option<String>,
}

impl OperationEntry {
    /// File name at the recorded target, for messages.
    pub fn target_name(&self) -> String {
        self.target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.target_path.display().to_string())
    }
}

/// Payload for appending a new entry to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOperation {
    pub batch_id: BatchId,
    pub kind: OperationKind,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub status: OperationStatus,
    pub mode: Option<String>,
}

impl NewOperation {
    /// A mutation that fully succeeded.
    pub fn completed(
        batch_id: BatchId,
        kind: OperationKind,
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            batch_id,
            kind,
            source_path: source_path.into(),
            target_path: target_path.into(),
            status: OperationStatus::Completed,
            mode: None,
        }
    }

    /// A mutation that failed after changing the filesystem.
    pub fn partial(
        batch_id: BatchId,
        kind: OperationKind,
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            status: OperationStatus::Failed,
            ..Self::completed(batch_id, kind, source_path, target_path)
        }
    }

    /// Attach a mode annotation.
    pub fn with_mode(mut self, mode: Option<String>) -> Self {
        self.mode = mode;
        self
    }
}

/// The operation kinds present in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchKind {
    Move,
    Rename,
    Mixed,
}

impl From<OperationKind> for BatchKind {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Move => Self::Move,
            OperationKind::Rename => Self::Rename,
        }
    }
}

/// Aggregate status of a batch, derived from its rows on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    PartiallyReverted,
    Reverted,
}

impl BatchStatus {
    /// Derive the batch status from the statuses of its rows.
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = OperationStatus>,
    {
        let mut total = 0usize;
        let mut reverted = 0usize;
        let mut failed = 0usize;
        for status in statuses {
            total += 1;
            match status {
                OperationStatus::Reverted => reverted += 1,
                OperationStatus::RevertFailed | OperationStatus::Failed => failed += 1,
                OperationStatus::Completed => {}
            }
        }
        Self::from_counts(total, reverted, failed)
    }

    /// Derive the batch status from pre-aggregated counts.
    ///
    /// `failed` counts `revert_failed` rows together with `failed` rows
    /// left by partial moves.
    pub fn from_counts(total: usize, reverted: usize, failed: usize) -> Self {
        if total > 0 && reverted == total {
            Self::Reverted
        } else if reverted > 0 || failed > 0 {
            Self::PartiallyReverted
        } else {
            Self::Completed
        }
    }
}

/// Grouped view of all log rows sharing a batch id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    #[serde(rename = "operation_type")]
    pub kind: BatchKind,
    pub file_count: usize,
    /// Timestamp of the first operation in the batch.
    pub timestamp: DateTime<Utc>,
    pub status: BatchStatus,
    pub completed_count: usize,
    pub reverted_count: usize,
    pub failed_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_kind_text_encoding() {
        assert_eq!(OperationKind::Move.as_ref(), "MOVE");
        assert_eq!(OperationKind::from_str("RENAME").unwrap(), OperationKind::Rename);
        assert!(OperationKind::from_str("COPY").is_err());
    }

    #[test]
    fn test_status_text_encoding() {
        assert_eq!(OperationStatus::RevertFailed.as_ref(), "revert_failed");
        assert_eq!(
            OperationStatus::from_str("completed").unwrap(),
            OperationStatus::Completed
        );
    }

    #[test]
    fn test_status_transitions() {
        use OperationStatus::*;
        assert!(Completed.can_transition_to(Reverted));
        assert!(Completed.can_transition_to(RevertFailed));
        assert!(RevertFailed.can_transition_to(Reverted));
        assert!(!Reverted.can_transition_to(Completed));
        assert!(!Reverted.can_transition_to(RevertFailed));
        assert!(!Failed.can_transition_to(Reverted));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn test_batch_status_aggregation() {
        use OperationStatus::*;
        assert_eq!(BatchStatus::aggregate([Reverted, Reverted]), BatchStatus::Reverted);
        assert_eq!(
            BatchStatus::aggregate([Reverted, Completed]),
            BatchStatus::PartiallyReverted
        );
        assert_eq!(
            BatchStatus::aggregate([Completed, RevertFailed]),
            BatchStatus::PartiallyReverted
        );
        assert_eq!(
            BatchStatus::aggregate([Completed, Failed]),
            BatchStatus::PartiallyReverted
        );
        assert_eq!(BatchStatus::aggregate([Completed, Completed]), BatchStatus::Completed);
        assert_eq!(BatchStatus::aggregate([]), BatchStatus::Completed);
    }

    #[test]
    fn test_entry_serializes_operation_type() {
        let entry = OperationEntry {
            id: OperationId(7),
            batch_id: BatchId::from("b1"),
            kind: OperationKind::Rename,
            source_path: PathBuf::from("/a/x.txt"),
            target_path: PathBuf::from("/a/y.txt"),
            timestamp: Utc::now(),
            status: OperationStatus::Completed,
            mode: Some("fast".to_string()),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["operation_type"], "RENAME");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["id"], 7);
        assert_eq!(entry.target_name(), "y.txt");
    }
}
