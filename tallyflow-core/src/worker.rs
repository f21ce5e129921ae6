//! Per-event entry point of a notification worker.
//!
//! A worker owns one engine and handles its events strictly one after the
//! other; parallelism comes from running several workers.

use std::fmt;

use tallyflow_model::{NotificationEvent, RecordState, TaskId, TaskState};
use tracing::{debug, error};

use crate::{
    categorize::Categorization,
    notification::{EventOutcome, NotificationEngine, PostProcessingRegistry},
};

pub struct NotificationWorker {
    engine: NotificationEngine,
    post_processing: Option<PostProcessingRegistry>,
}

impl fmt::Debug for NotificationWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationWorker")
            .field("engine", &self.engine)
            .field("post_processing", &self.post_processing)
            .finish()
    }
}

impl NotificationWorker {
    pub fn new(engine: NotificationEngine) -> Self {
        Self {
            engine,
            post_processing: None,
        }
    }

    /// Finishes incremental tasks right after their last record.
    pub fn with_post_processing(mut self, registry: PostProcessingRegistry) -> Self {
        self.post_processing = Some(registry);
        self
    }

    pub fn engine(&self) -> &NotificationEngine {
        &self.engine
    }

    /// Handles one raw queue payload. Payloads that are not valid JSON
    /// events are rejected without touching storage.
    pub async fn process_payload(&mut self, payload: &str) -> EventOutcome {
        match serde_json::from_str::<NotificationEvent>(payload) {
            Ok(event) => self.process(&event).await,
            Err(err) => {
                debug!(error = %err, "dropping unparsable notification payload");
                EventOutcome::Rejected("unparsable payload")
            }
        }
    }

    pub async fn process(&mut self, event: &NotificationEvent) -> EventOutcome {
        let outcome = self.engine.handle(event).await;

        if let EventOutcome::Recorded {
            completed: Some(TaskState::ReadyForPostProcessing),
        } = outcome
            && let (Some(registry), Some(task_id)) =
                (&self.post_processing, event.task_id)
            && let Err(err) = registry.finish_post_processing(task_id).await
        {
            error!(%task_id, error = %err, "post-processing could not be recorded");
        }

        outcome
    }
}

/// Notification reporting a record that categorization skipped.
///
/// The record is counted as ignored, so the task still completes.
pub fn skipped_record_event(
    task_id: TaskId,
    record_id: &str,
    categorization: &Categorization,
) -> Option<NotificationEvent> {
    let Categorization::Skip { notification } = categorization else {
        return None;
    };
    Some(NotificationEvent {
        task_id: Some(task_id),
        resource_id: Some(record_id.to_string()),
        state: Some(RecordState::Dropped),
        info_text: Some(notification.clone()),
        ..NotificationEvent::default()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tallyflow_model::TaskInfo;

    use super::*;
    use crate::{
        categorize::ALREADY_PROCESSED,
        error::Result,
        notification::{EngineConfig, PostProcessor},
        retry::RetryPolicy,
        storage::{MemoryStore, Stores, TaskInfoStore},
    };

    struct Noop;

    #[async_trait]
    impl PostProcessor for Noop {
        fn topology(&self) -> &str {
            "oai_topology"
        }

        async fn post_process(&self, _task: &TaskInfo) -> Result<()> {
            Ok(())
        }
    }

    async fn worker(store: &MemoryStore, incremental: bool) -> NotificationWorker {
        let mut info = TaskInfo::new(TaskId(5), "oai_topology");
        info.state = TaskState::Processing;
        info.expected_size = Some(1);
        info.incremental = incremental;
        TaskInfoStore::insert(store, &info).await.unwrap();

        let stores = Stores::from_memory(store.clone());
        let engine = NotificationEngine::new(
            stores.clone(),
            EngineConfig {
                retry: RetryPolicy::none(),
                ..EngineConfig::default()
            },
        );
        let mut registry = PostProcessingRegistry::new(stores, RetryPolicy::none());
        registry.register(Arc::new(Noop));
        NotificationWorker::new(engine).with_post_processing(registry)
    }

    #[tokio::test]
    async fn json_payloads_are_processed() {
        let store = MemoryStore::new();
        let mut worker = worker(&store, false).await;

        let outcome = worker
            .process_payload(r#"{"taskId":5,"resourceId":"r1","state":"success"}"#)
            .await;

        assert_eq!(
            outcome,
            EventOutcome::Recorded {
                completed: Some(TaskState::Processed)
            }
        );
    }

    #[tokio::test]
    async fn garbage_payloads_are_rejected() {
        let store = MemoryStore::new();
        let mut worker = worker(&store, false).await;

        let outcome = worker.process_payload("not json").await;

        assert_eq!(outcome, EventOutcome::Rejected("unparsable payload"));
        let info = TaskInfoStore::find(&store, TaskId(5)).await.unwrap().unwrap();
        assert_eq!(info.counters.total(), 0);
    }

    #[tokio::test]
    async fn incremental_tasks_are_post_processed_after_their_last_record() {
        let store = MemoryStore::new();
        let mut worker = worker(&store, true).await;

        worker
            .process_payload(r#"{"taskId":5,"resourceId":"r1","state":"success"}"#)
            .await;

        let info = TaskInfoStore::find(&store, TaskId(5)).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Processed);
    }

    #[tokio::test]
    async fn skipped_records_still_count_towards_completion() {
        let store = MemoryStore::new();
        let mut worker = worker(&store, false).await;
        let skip = Categorization::Skip {
            notification: ALREADY_PROCESSED.into(),
        };

        let event = skipped_record_event(TaskId(5), "r1", &skip).unwrap();
        worker.process(&event).await;

        let info = TaskInfoStore::find(&store, TaskId(5)).await.unwrap().unwrap();
        assert_eq!(info.counters.ignored, 1);
        assert_eq!(info.state, TaskState::Processed);
        assert!(skipped_record_event(TaskId(5), "r2", &Categorization::Process).is_none());
    }
}
