use async_trait::async_trait;
use tallyflow_model::{TaskByState, TaskDiagnostics, TaskId, TaskInfo, TaskState};

use crate::error::Result;

/// Authoritative per-task records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskInfoStore: Send + Sync {
    async fn find(&self, task_id: TaskId) -> Result<Option<TaskInfo>>;

    async fn insert(&self, info: &TaskInfo) -> Result<()>;

    async fn update_state(
        &self,
        task_id: TaskId,
        state: TaskState,
        description: &str,
    ) -> Result<()>;

    /// Records the number of records harvesting produced for the task.
    async fn set_expected_size(
        &self,
        task_id: TaskId,
        expected_size: i64,
    ) -> Result<()>;
}

/// Per-topic index of tasks, keyed by (state, topology, task).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TasksByStateStore: Send + Sync {
    async fn list(
        &self,
        topology_name: &str,
        states: &[TaskState],
    ) -> Result<Vec<TaskByState>>;

    async fn upsert(&self, entry: &TaskByState) -> Result<()>;

    async fn delete(
        &self,
        state: TaskState,
        topology_name: &str,
        task_id: TaskId,
    ) -> Result<()>;

    /// Moves an entry to the state carried by `corrected`.
    async fn replace(
        &self,
        stale: &TaskByState,
        corrected: &TaskByState,
    ) -> Result<()> {
        self.delete(stale.state, &stale.topology_name, stale.task_id)
            .await?;
        self.upsert(corrected).await
    }
}

/// Stall-detection timestamps.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiagnosticStore: Send + Sync {
    async fn find(&self, task_id: TaskId) -> Result<Option<TaskDiagnostics>>;
}
