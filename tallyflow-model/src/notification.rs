use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{RecordState, TaskId};

/// Inbound message describing the outcome of one record.
///
/// Every field is optional on the wire; the engine validates the event before
/// touching storage and drops anything incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct NotificationEvent {
    pub task_id: Option<TaskId>,
    pub resource_id: Option<String>,
    pub state: Option<RecordState>,
    pub info_text: Option<String>,
    pub additional_info: BTreeMap<String, String>,
    pub result_resource: Option<String>,
    pub attempt: i32,
    pub marked_as_deleted: bool,
    pub ignored: bool,
}

/// Record-level notification row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Notification {
    pub task_id: TaskId,
    pub bucket: i32,
    /// Sequence number of the record within its task, starting at 1.
    pub resource_num: i64,
    pub resource: String,
    pub state: RecordState,
    pub info_text: String,
    pub additional_info: BTreeMap<String, String>,
    pub result_resource: Option<String>,
    pub attempt: i32,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregated failure signature of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorType {
    pub task_id: TaskId,
    pub error_type: Uuid,
    pub message: String,
    pub count: i64,
}

/// One sample record of an error signature.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorNotification {
    pub task_id: TaskId,
    pub error_type: Uuid,
    pub resource: String,
    pub message: String,
    pub additional_info: Option<String>,
}
