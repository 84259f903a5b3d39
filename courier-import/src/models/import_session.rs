//! Bulk import workflow state
//!
//! Steps progress UPLOAD → MAP → ERRORS → REVIEW. ERRORS is where geocoding
//! runs and failed rows are remediated; REVIEW shows resolved points before
//! submission.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::geocode_row::{GeocodeRow, GeocodeStatus, RawRow};
use super::mapping::FieldMapping;
use std::sync::Arc;

/// Workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStep {
    /// Waiting for a file
    Upload,
    /// Assigning columns to canonical fields
    Map,
    /// Geocoding and manual remediation
    Errors,
    /// Resolved points shown before submission
    Review,
}

impl ImportStep {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportStep::Upload => "upload",
            ImportStep::Map => "map",
            ImportStep::Errors => "errors",
            ImportStep::Review => "review",
        }
    }
}

impl fmt::Display for ImportStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(ImportStep::Upload),
            "map" => Ok(ImportStep::Map),
            "errors" => Ok(ImportStep::Errors),
            "review" => Ok(ImportStep::Review),
            other => Err(format!("Unknown step: {}", other)),
        }
    }
}

/// Correlates an open coordinate picker with the row it will update
///
/// Ephemeral; never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickerRequest {
    pub open: bool,
    pub target_row_id: Option<usize>,
}

impl PickerRequest {
    pub fn for_row(row_id: usize) -> Self {
        Self {
            open: true,
            target_row_id: Some(row_id),
        }
    }

    pub fn closed() -> Self {
        Self::default()
    }
}

/// Row counts by status, always derived from the rows themselves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocodeStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub pending: usize,
}

impl GeocodeStats {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a GeocodeRow>) -> Self {
        rows.into_iter().fold(Self::default(), |mut s, row| {
            s.total += 1;
            match row.status {
                GeocodeStatus::Success => s.success += 1,
                GeocodeStatus::Failed => s.failed += 1,
                GeocodeStatus::Pending => s.pending += 1,
            }
            s
        })
    }

    /// Every row resolved; an empty set never counts as resolved
    pub fn all_success(&self) -> bool {
        self.total > 0 && self.success == self.total
    }
}

/// Geocode rows plus the started flag, as persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeocodeSnapshot {
    pub rows: Vec<GeocodeRow>,
    pub started: bool,
}

/// Durable recovery record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub step: ImportStep,
    pub raw_rows: Vec<Arc<RawRow>>,
    pub headers: Vec<String>,
    pub mapping: FieldMapping,
    #[serde(default)]
    pub geocode_snapshot: GeocodeSnapshot,
}
