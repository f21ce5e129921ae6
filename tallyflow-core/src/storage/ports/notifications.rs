use async_trait::async_trait;
use tallyflow_model::{
    ErrorNotification, ErrorType, Notification, ProcessedRecord, TaskId,
};
use uuid::Uuid;

use crate::error::Result;

/// Record-level notification rows, partitioned by (task, bucket).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn count_in_bucket(&self, task_id: TaskId, bucket: i32) -> Result<i64>;

    async fn list_bucket(
        &self,
        task_id: TaskId,
        bucket: i32,
    ) -> Result<Vec<Notification>>;
}

/// Attempt tracking per (task, record).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessedRecordStore: Send + Sync {
    async fn find(
        &self,
        task_id: TaskId,
        record_id: &str,
    ) -> Result<Option<ProcessedRecord>>;

    /// Written by record-processing workers when an attempt starts.
    async fn upsert(&self, record: &ProcessedRecord) -> Result<()>;
}

/// Aggregated failure signatures and their samples.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskErrorStore: Send + Sync {
    async fn list_error_types(&self, task_id: TaskId) -> Result<Vec<ErrorType>>;

    async fn list_error_notifications(
        &self,
        task_id: TaskId,
        error_type: Uuid,
        limit: i64,
    ) -> Result<Vec<ErrorNotification>>;
}
