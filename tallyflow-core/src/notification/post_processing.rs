//! Second stage for tasks completed by incremental harvests.
//!
//! The engine parks such tasks in [`TaskState::ReadyForPostProcessing`]; a
//! [`PostProcessor`] registered for the task's topology finishes them.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use tallyflow_model::{TaskId, TaskInfo, TaskState};
use tracing::{debug, info, warn};

use super::engine::transition;
use crate::{
    error::{Result, TallyError},
    retry::{RetryPolicy, Retryability, with_retry},
    storage::Stores,
};

const IN_POST_PROCESSING_DESCRIPTION: &str = "Post-processing in progress";
const POST_PROCESSED_DESCRIPTION: &str = "Completely processed";

/// Work run once every record of a task has been accounted for.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Topology whose tasks this processor finishes.
    fn topology(&self) -> &str;

    async fn post_process(&self, task: &TaskInfo) -> Result<()>;
}

/// Post-processors by topology, plus the state handling around them.
pub struct PostProcessingRegistry {
    stores: Stores,
    retry: RetryPolicy,
    processors: HashMap<String, Arc<dyn PostProcessor>>,
}

impl fmt::Debug for PostProcessingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut topologies: Vec<_> = self.processors.keys().collect();
        topologies.sort();
        f.debug_struct("PostProcessingRegistry")
            .field("retry", &self.retry)
            .field("topologies", &topologies)
            .finish()
    }
}

impl PostProcessingRegistry {
    pub fn new(stores: Stores, retry: RetryPolicy) -> Self {
        Self {
            stores,
            retry,
            processors: HashMap::new(),
        }
    }

    /// Registers `processor`, replacing any previous one for its topology.
    pub fn register(&mut self, processor: Arc<dyn PostProcessor>) {
        self.processors
            .insert(processor.topology().to_string(), processor);
    }

    pub fn get(&self, topology: &str) -> Option<&Arc<dyn PostProcessor>> {
        self.processors.get(topology)
    }

    /// Runs the post-processor of a parked task and records the final state.
    ///
    /// Tasks in any other state are left alone and their state is returned.
    pub async fn finish_post_processing(&self, task_id: TaskId) -> Result<TaskState> {
        let info = self
            .stores
            .tasks
            .find(task_id)
            .await?
            .ok_or_else(|| TallyError::NotFound(format!("task {task_id}")))?;

        if info.state != TaskState::ReadyForPostProcessing {
            debug!(%task_id, state = %info.state, "task is not waiting for post-processing");
            return Ok(info.state);
        }

        self.move_to(&info, TaskState::InPostProcessing, IN_POST_PROCESSING_DESCRIPTION)
            .await?;

        let Some(processor) = self.processors.get(&info.topology_name) else {
            let reason = format!(
                "No post-processor registered for topology {}",
                info.topology_name
            );
            warn!(%task_id, "{reason}");
            self.move_to(&info, TaskState::Dropped, &reason).await?;
            return Ok(TaskState::Dropped);
        };

        match processor.post_process(&info).await {
            Ok(()) => {
                info!(%task_id, "post-processing finished");
                self.move_to(&info, TaskState::Processed, POST_PROCESSED_DESCRIPTION)
                    .await?;
                Ok(TaskState::Processed)
            }
            Err(err) => {
                warn!(%task_id, error = %err, "post-processing failed, dropping task");
                self.move_to(&info, TaskState::Dropped, &err.to_string())
                    .await?;
                Ok(TaskState::Dropped)
            }
        }
    }

    /// Finishes every parked task of `topology`; returns how many were seen.
    pub async fn finish_ready_tasks(&self, topology: &str) -> Result<usize> {
        let ready = self
            .stores
            .tasks_by_state
            .list(topology, &[TaskState::ReadyForPostProcessing])
            .await?;
        for entry in &ready {
            self.finish_post_processing(entry.task_id).await?;
        }
        Ok(ready.len())
    }

    async fn move_to(
        &self,
        info: &TaskInfo,
        state: TaskState,
        description: &str,
    ) -> Result<()> {
        let batch = &self.stores.batch;
        with_retry(self.retry, Retryability::Retryable, "move task state", || {
            batch.execute_all(transition(info, state, description))
        })
        .await?;
        Ok(())
    }
}
