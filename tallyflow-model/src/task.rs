use std::{fmt, ops::AddAssign, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{ModelError, TaskId};

/// Lifecycle of a task.
///
/// `Queued -> Processing -> (Processed | Dropped)`, `Killed` is set from the
/// outside while processing. Incremental tasks pass through the two
/// post-processing states before reaching `Processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum TaskState {
    Queued,
    Processing,
    ReadyForPostProcessing,
    InPostProcessing,
    Processed,
    Dropped,
    Killed,
}

impl TaskState {
    /// States the per-topic index keeps entries for.
    pub const ACTIVE: [TaskState; 4] = [
        TaskState::Queued,
        TaskState::Processing,
        TaskState::ReadyForPostProcessing,
        TaskState::InPostProcessing,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "QUEUED",
            TaskState::Processing => "PROCESSING",
            TaskState::ReadyForPostProcessing => "READY_FOR_POST_PROCESSING",
            TaskState::InPostProcessing => "IN_POST_PROCESSING",
            TaskState::Processed => "PROCESSED",
            TaskState::Dropped => "DROPPED",
            TaskState::Killed => "KILLED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Processed | TaskState::Dropped | TaskState::Killed
        )
    }

    pub const fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "QUEUED" => Ok(TaskState::Queued),
            "PROCESSING" => Ok(TaskState::Processing),
            "READY_FOR_POST_PROCESSING" => Ok(TaskState::ReadyForPostProcessing),
            "IN_POST_PROCESSING" => Ok(TaskState::InPostProcessing),
            "PROCESSED" => Ok(TaskState::Processed),
            "DROPPED" => Ok(TaskState::Dropped),
            "KILLED" => Ok(TaskState::Killed),
            other => Err(ModelError::UnknownTaskState(other.to_string())),
        }
    }
}

/// Aggregate counters of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskCounters {
    pub processed: i64,
    pub ignored: i64,
    pub deleted: i64,
    /// Errors among `processed` records.
    pub processed_errors: i64,
    /// Errors among `deleted` records.
    pub deleted_errors: i64,
}

impl TaskCounters {
    /// Number of records that reached a terminal state.
    pub const fn total(&self) -> i64 {
        self.processed + self.ignored + self.deleted
    }

    pub const fn errors(&self) -> i64 {
        self.processed_errors + self.deleted_errors
    }
}

impl AddAssign for TaskCounters {
    fn add_assign(&mut self, delta: Self) {
        self.processed += delta.processed;
        self.ignored += delta.ignored;
        self.deleted += delta.deleted;
        self.processed_errors += delta.processed_errors;
        self.deleted_errors += delta.deleted_errors;
    }
}

/// Authoritative per-task record.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskInfo {
    pub id: TaskId,
    pub topology_name: String,
    pub state: TaskState,
    pub state_description: String,
    /// `None` until harvesting has counted the records of the task.
    pub expected_size: Option<i64>,
    pub counters: TaskCounters,
    pub owner_id: Option<String>,
    pub topic_name: Option<String>,
    /// Incremental harvests finish through post-processing.
    pub incremental: bool,
    pub sent_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskInfo {
    pub fn new(id: TaskId, topology_name: impl Into<String>) -> Self {
        Self {
            id,
            topology_name: topology_name.into(),
            state: TaskState::Queued,
            state_description: String::new(),
            expected_size: None,
            counters: TaskCounters::default(),
            owner_id: None,
            topic_name: None,
            incremental: false,
            sent_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// True once every expected record has been accounted for.
    pub fn is_complete(&self) -> bool {
        self.expected_size == Some(self.counters.total())
    }
}

/// Entry of the per-topic index of active tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskByState {
    pub state: TaskState,
    pub topology_name: String,
    pub task_id: TaskId,
    pub owner_id: Option<String>,
    pub topic_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl TaskByState {
    pub fn for_task(info: &TaskInfo) -> Self {
        Self {
            state: info.state,
            topology_name: info.topology_name.clone(),
            task_id: info.id,
            owner_id: info.owner_id.clone(),
            topic_name: info.topic_name.clone(),
            started_at: info.started_at,
        }
    }
}

/// Timestamps used to spot stalled tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskDiagnostics {
    pub task_id: TaskId,
    pub last_record_finished_at: Option<DateTime<Utc>>,
    pub records_retry_count: i64,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskDiagnostics {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            last_record_finished_at: None,
            records_retry_count: 0,
            finished_at: None,
        }
    }
}
