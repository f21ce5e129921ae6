use std::sync::Arc;

use async_trait::async_trait;
use tallyflow_model::{TaskId, TaskState};

use crate::{error::Result, storage::TaskInfoStore};

/// Cooperative cancellation flag, polled by long-running producers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KillSwitch: Send + Sync {
    async fn has_kill_flag(&self, task_id: TaskId) -> Result<bool>;
}

/// Kill flag read from the authoritative task state.
///
/// A killed or dropped task is flagged, and so is a task that no longer
/// exists.
#[derive(Clone)]
pub struct TaskStatusKillSwitch {
    tasks: Arc<dyn TaskInfoStore>,
}

impl std::fmt::Debug for TaskStatusKillSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStatusKillSwitch").finish_non_exhaustive()
    }
}

impl TaskStatusKillSwitch {
    pub fn new(tasks: Arc<dyn TaskInfoStore>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl KillSwitch for TaskStatusKillSwitch {
    async fn has_kill_flag(&self, task_id: TaskId) -> Result<bool> {
        Ok(self.tasks.find(task_id).await?.is_none_or(|info| {
            matches!(info.state, TaskState::Killed | TaskState::Dropped)
        }))
    }
}
