use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tallyflow_model::{
    ErrorNotification, ErrorType, Notification, ProcessedRecord, TaskByState,
    TaskCounters, TaskId, TaskState,
};

use crate::error::Result;

/// One write of an event's batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Adds `delta` to the stored counters and appends the notification.
    ///
    /// The notification's `resource_num` becomes the stored total after the
    /// increment and its bucket is derived from it with `bucket_size`.
    RecordNotification {
        notification: Notification,
        delta: TaskCounters,
        bucket_size: i64,
    },
    SetExpectedSize {
        task_id: TaskId,
        expected_size: i64,
    },
    UpdateTaskState {
        task_id: TaskId,
        state: TaskState,
        description: String,
        finished_at: Option<DateTime<Utc>>,
    },
    PutProcessedRecord(ProcessedRecord),
    /// Adds `signature.count` occurrences and keeps `sample` while the
    /// stored occurrences stay within `max_samples`.
    CountError {
        signature: ErrorType,
        sample: ErrorNotification,
        max_samples: i64,
    },
    /// Drops every index entry of the task and writes `entry`.
    MoveTaskByState(TaskByState),
    TouchDiagnostics {
        task_id: TaskId,
        last_record_finished_at: Option<DateTime<Utc>>,
        retried: bool,
        finished_at: Option<DateTime<Utc>>,
    },
    /// Moves the task out of processing when its stored counters reach the
    /// expected size. Finished tasks keep their state.
    CompleteIfFinished { task_id: TaskId },
}

/// What storage reported back while applying a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Stored counters after the last `RecordNotification`.
    pub counters: Option<TaskCounters>,
    /// `resource_num` assigned by the last `RecordNotification`.
    pub resource_num: Option<i64>,
    /// State a `CompleteIfFinished` moved its task to.
    pub completed: Option<TaskState>,
}

/// Applies a list of mutations all-or-nothing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn execute_all(&self, mutations: Vec<Mutation>) -> Result<BatchReport>;
}
