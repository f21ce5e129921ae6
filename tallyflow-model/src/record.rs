use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{ModelError, TaskId};

/// Outcome of one record within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RecordState {
    Queued,
    Success,
    Error,
    Dropped,
    Killed,
}

impl RecordState {
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordState::Queued => "QUEUED",
            RecordState::Success => "SUCCESS",
            RecordState::Error => "ERROR",
            RecordState::Dropped => "DROPPED",
            RecordState::Killed => "KILLED",
        }
    }

    /// Terminal outcomes are never revised.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, RecordState::Queued)
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordState {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(RecordState::Queued),
            "SUCCESS" => Ok(RecordState::Success),
            "ERROR" => Ok(RecordState::Error),
            "DROPPED" => Ok(RecordState::Dropped),
            "KILLED" => Ok(RecordState::Killed),
            _ => Err(ModelError::UnknownRecordState(raw.to_string())),
        }
    }
}

/// Per-record attempt tracking used to make redelivery idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessedRecord {
    pub task_id: TaskId,
    pub record_id: String,
    pub bucket: i32,
    pub attempt: i32,
    pub state: RecordState,
    pub info_text: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Ledger row of a record seen by incremental harvesting.
///
/// `latest_harvest_date` only ever moves forward. The preview and published
/// dates belong to the publication pipelines and are never written by the
/// harvester.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HarvestedRecord {
    pub provider_id: String,
    pub dataset_id: String,
    pub record_local_id: String,
    pub bucket: i32,
    pub latest_harvest_date: DateTime<Utc>,
    pub latest_harvest_md5: Option<Uuid>,
    pub preview_harvest_date: Option<DateTime<Utc>>,
    pub preview_harvest_md5: Option<Uuid>,
    pub published_harvest_date: Option<DateTime<Utc>>,
    pub published_harvest_md5: Option<Uuid>,
}
