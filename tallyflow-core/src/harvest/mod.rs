//! Identifier harvesting for a task, with cooperative cancellation.

pub mod identifiers;
pub mod kill_switch;
pub mod version;

pub use identifiers::{IdentifierHarvest, IdentifierPage, IdentifierSource};
pub use kill_switch::{KillSwitch, TaskStatusKillSwitch};
pub use version::derive_version;

use async_trait::async_trait;
use chrono::Utc;
use tallyflow_model::{ProcessedRecord, RecordState, TaskId, TaskState};
use tracing::{info, warn};

use crate::{
    bucket::{BucketCount, bucket_for},
    error::{Result, TallyError},
    notification::engine::transition,
    retry::{RetryPolicy, Retryability, with_retry},
    storage::{Mutation, Stores},
};

pub const EMPTY_TASK_REASON: &str =
    "The task with the submitted parameters is empty";

/// Hands a harvested identifier to record processing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordSubmitter: Send + Sync {
    async fn submit(&self, task_id: TaskId, identifier: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestSettings {
    /// The kill flag is checked before every n-th identifier.
    pub kill_check_interval: u64,
    pub progress_log_interval: u64,
    pub processed_record_buckets: BucketCount,
    pub retry: RetryPolicy,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            kill_check_interval: 1,
            progress_log_interval: 1_000,
            processed_record_buckets: BucketCount::PROCESSED_RECORDS,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// Every identifier was submitted; the task expects this many records.
    Completed { expected_size: i64 },
    /// Nothing to harvest; the task was dropped.
    Empty,
    /// The kill flag was raised after `submitted` identifiers.
    Stopped { submitted: i64 },
    /// The listing failed for good; the task was dropped with `reason`.
    Failed { reason: String },
}

/// Harvests every identifier of `task_id` and submits it for processing.
///
/// Each identifier is registered as a queued processed record before it is
/// submitted. Storage failures are returned; listing failures drop the task.
pub async fn harvest_task(
    stores: &Stores,
    kill_switch: &dyn KillSwitch,
    submitter: &dyn RecordSubmitter,
    mut harvest: IdentifierHarvest<'_>,
    task_id: TaskId,
    settings: HarvestSettings,
) -> Result<HarvestOutcome> {
    move_task(stores, settings.retry, task_id, TaskState::Processing, "")
        .await?;
    info!(%task_id, "identifier harvesting started");

    let check_every = settings.kill_check_interval.max(1);
    let mut submitted: i64 = 0;
    loop {
        if submitted as u64 % check_every == 0
            && kill_switch.has_kill_flag(task_id).await?
        {
            info!(%task_id, submitted, "harvesting stopped by kill flag");
            return Ok(HarvestOutcome::Stopped { submitted });
        }

        let identifier = match harvest.next().await {
            Ok(Some(identifier)) => identifier,
            Ok(None) => break,
            Err(err) => {
                let reason = format!("The task was dropped because of {err}");
                warn!(%task_id, error = %err, "identifier harvesting failed");
                move_task(stores, settings.retry, task_id, TaskState::Dropped, &reason)
                    .await?;
                return Ok(HarvestOutcome::Failed { reason });
            }
        };

        let record = ProcessedRecord {
            task_id,
            record_id: identifier.clone(),
            bucket: bucket_for(&identifier, settings.processed_record_buckets),
            attempt: 0,
            state: RecordState::Queued,
            info_text: None,
            started_at: Some(Utc::now()),
        };
        let processed = &stores.processed;
        with_retry(settings.retry, Retryability::Retryable, "queue record", || {
            processed.upsert(&record)
        })
        .await?;
        submitter.submit(task_id, &identifier).await?;

        submitted += 1;
        if submitted as u64 % settings.progress_log_interval.max(1) == 0 {
            info!(%task_id, submitted, "identifier harvesting in progress");
        }
    }

    if submitted == 0 {
        move_task(stores, settings.retry, task_id, TaskState::Dropped, EMPTY_TASK_REASON)
            .await?;
        info!(%task_id, "harvest produced no identifiers, task dropped");
        return Ok(HarvestOutcome::Empty);
    }

    // Records may all have finished while harvesting was still running.
    let batch = &stores.batch;
    let report =
        with_retry(settings.retry, Retryability::Retryable, "set expected size", || {
            batch.execute_all(vec![
                Mutation::SetExpectedSize {
                    task_id,
                    expected_size: submitted,
                },
                Mutation::CompleteIfFinished { task_id },
            ])
        })
        .await?;
    info!(%task_id, expected_size = submitted, "identifier harvesting finished");
    if let Some(state) = report.completed {
        info!(%task_id, %state, "task finished processing");
    }
    Ok(HarvestOutcome::Completed {
        expected_size: submitted,
    })
}

async fn move_task(
    stores: &Stores,
    retry: RetryPolicy,
    task_id: TaskId,
    state: TaskState,
    description: &str,
) -> Result<()> {
    let info = stores
        .tasks
        .find(task_id)
        .await?
        .ok_or_else(|| TallyError::NotFound(format!("task {task_id}")))?;
    let batch = &stores.batch;
    with_retry(retry, Retryability::Retryable, "move task state", || {
        batch.execute_all(transition(&info, state, description))
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tallyflow_model::{NotificationEvent, TaskInfo};

    use super::*;
    use crate::{
        notification::{EngineConfig, NotificationEngine},
        storage::{MemoryStore, ProcessedRecordStore, TaskInfoStore},
    };

    #[derive(Default)]
    struct Collecting {
        submitted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RecordSubmitter for Collecting {
        async fn submit(&self, _task_id: TaskId, identifier: &str) -> Result<()> {
            self.submitted.lock().unwrap().push(identifier.to_string());
            Ok(())
        }
    }

    /// Processes every record as soon as it is submitted.
    struct InlineProcessing {
        engine: tokio::sync::Mutex<NotificationEngine>,
    }

    #[async_trait]
    impl RecordSubmitter for InlineProcessing {
        async fn submit(&self, task_id: TaskId, identifier: &str) -> Result<()> {
            let event = NotificationEvent {
                task_id: Some(task_id),
                resource_id: Some(identifier.to_string()),
                state: Some(RecordState::Success),
                ..NotificationEvent::default()
            };
            self.engine.lock().await.handle(&event).await;
            Ok(())
        }
    }

    struct Pages(Vec<&'static str>);

    #[async_trait]
    impl IdentifierSource for Pages {
        async fn list_identifiers(
            &self,
            _resumption_token: Option<String>,
        ) -> Result<IdentifierPage> {
            Ok(IdentifierPage {
                identifiers: self.0.iter().map(|id| id.to_string()).collect(),
                resumption_token: None,
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl IdentifierSource for Broken {
        async fn list_identifiers(
            &self,
            _resumption_token: Option<String>,
        ) -> Result<IdentifierPage> {
            Err(TallyError::Harvest("connection reset".into()))
        }
    }

    async fn queued_task(store: &MemoryStore) -> TaskId {
        let info = TaskInfo::new(TaskId(42), "oai_topology");
        TaskInfoStore::insert(store, &info).await.unwrap();
        info.id
    }

    fn settings() -> HarvestSettings {
        HarvestSettings {
            retry: RetryPolicy::none(),
            ..HarvestSettings::default()
        }
    }

    fn never_killed() -> kill_switch::MockKillSwitch {
        let mut switch = kill_switch::MockKillSwitch::new();
        switch.expect_has_kill_flag().returning(|_| Ok(false));
        switch
    }

    #[tokio::test]
    async fn harvested_identifiers_set_the_expected_size() {
        let store = MemoryStore::new();
        let task = queued_task(&store).await;
        let stores = Stores::from_memory(store.clone());
        let source = Pages(vec!["r1", "r2", "r3"]);
        let submitter = Collecting::default();

        let outcome = harvest_task(
            &stores,
            &never_killed(),
            &submitter,
            IdentifierHarvest::new(&source, RetryPolicy::none()),
            task,
            settings(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, HarvestOutcome::Completed { expected_size: 3 });
        let info = TaskInfoStore::find(&store, task).await.unwrap().unwrap();
        assert_eq!(info.expected_size, Some(3));
        assert_eq!(info.state, TaskState::Processing);
        assert_eq!(*submitter.submitted.lock().unwrap(), vec!["r1", "r2", "r3"]);
        let queued = ProcessedRecordStore::find(&store, task, "r2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued.state, RecordState::Queued);
    }

    #[tokio::test]
    async fn records_finished_before_the_size_is_known_complete_the_task() {
        let store = MemoryStore::new();
        let task = queued_task(&store).await;
        let stores = Stores::from_memory(store.clone());
        let source = Pages(vec!["r1", "r2", "r3"]);
        let submitter = InlineProcessing {
            engine: tokio::sync::Mutex::new(NotificationEngine::new(
                stores.clone(),
                EngineConfig {
                    retry: RetryPolicy::none(),
                    ..EngineConfig::default()
                },
            )),
        };

        let outcome = harvest_task(
            &stores,
            &never_killed(),
            &submitter,
            IdentifierHarvest::new(&source, RetryPolicy::none()),
            task,
            settings(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, HarvestOutcome::Completed { expected_size: 3 });
        let info = TaskInfoStore::find(&store, task).await.unwrap().unwrap();
        assert_eq!(info.counters.total(), 3);
        assert_eq!(info.state, TaskState::Processed);
        assert!(info.finished_at.is_some());
        let entries = store.index_entries_of(task).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, TaskState::Processed);
    }

    #[tokio::test]
    async fn empty_harvest_drops_the_task() {
        let store = MemoryStore::new();
        let task = queued_task(&store).await;
        let stores = Stores::from_memory(store.clone());
        let source = Pages(Vec::new());

        let outcome = harvest_task(
            &stores,
            &never_killed(),
            &Collecting::default(),
            IdentifierHarvest::new(&source, RetryPolicy::none()),
            task,
            settings(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, HarvestOutcome::Empty);
        let info = TaskInfoStore::find(&store, task).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Dropped);
        assert_eq!(info.state_description, EMPTY_TASK_REASON);
    }

    #[tokio::test]
    async fn kill_flag_stops_the_harvest() {
        let store = MemoryStore::new();
        let task = queued_task(&store).await;
        let stores = Stores::from_memory(store.clone());
        let source = Pages(vec!["r1", "r2", "r3", "r4"]);
        let submitter = Collecting::default();
        let mut switch = kill_switch::MockKillSwitch::new();
        let mut checks = 0;
        switch.expect_has_kill_flag().returning(move |_| {
            checks += 1;
            Ok(checks > 2)
        });

        let outcome = harvest_task(
            &stores,
            &switch,
            &submitter,
            IdentifierHarvest::new(&source, RetryPolicy::none()),
            task,
            settings(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, HarvestOutcome::Stopped { submitted: 2 });
        assert_eq!(submitter.submitted.lock().unwrap().len(), 2);
        let info = TaskInfoStore::find(&store, task).await.unwrap().unwrap();
        assert_eq!(info.expected_size, None);
    }

    #[tokio::test]
    async fn failing_listing_drops_the_task() {
        let store = MemoryStore::new();
        let task = queued_task(&store).await;
        let stores = Stores::from_memory(store.clone());

        let outcome = harvest_task(
            &stores,
            &never_killed(),
            &Collecting::default(),
            IdentifierHarvest::new(&Broken, RetryPolicy::none()),
            task,
            settings(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, HarvestOutcome::Failed { .. }));
        let info = TaskInfoStore::find(&store, task).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Dropped);
        assert!(info.state_description.contains("connection reset"));
    }
}
