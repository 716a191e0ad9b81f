//! Proposals received from producers and the items staged from them.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// A move proposed by the rule matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveProposal {
    pub file_name: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    /// Name of the rule that matched.
    #[serde(default)]
    pub rule: String,
}

/// Where a date used in a rename came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DateSource {
    Ai,
    Exif,
    Os,
}

/// A rename proposed by the dated-filename producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameProposal {
    pub source_path: PathBuf,
    pub new_filename: String,
    #[serde(default)]
    pub found_date: Option<NaiveDate>,
    #[serde(default)]
    pub date_source: Option<DateSource>,
    /// Free-text suggestion shown next to the proposal.
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// A destination folder suggested by the triage classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageSuggestion {
    pub file_name: String,
    pub source_path: PathBuf,
    pub suggested_folder: PathBuf,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// A user-confirmed triage destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageConfirmation {
    pub file_name: String,
    pub source_path: PathBuf,
    pub confirmed_folder: PathBuf,
}

/// A user override of a staged rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameEdit {
    pub id: u32,
    pub new_filename: String,
}

/// Producer context kept with a staged item for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    Rule {
        rule: String,
    },
    Dated {
        found_date: Option<NaiveDate>,
        date_source: Option<DateSource>,
        suggestion: Option<String>,
    },
    Triage {
        confidence: Option<f32>,
    },
}

/// One staged operation, addressable by its id within the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewItem {
    pub id: u32,
    pub file_name: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub provenance: Provenance,
}
