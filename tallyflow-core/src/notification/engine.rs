use std::{fmt, sync::Arc};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tallyflow_model::{
    ErrorNotification, Notification, NotificationEvent, ProcessedRecord,
    RecordState, TaskByState, TaskCounters, TaskId, TaskInfo, TaskState,
};
use tracing::{debug, error, info, warn};

use super::{
    dead_letter::DeadLetterSink,
    event::RecordOutcome,
    snapshot::{TaskSnapshot, apply_outcome},
};
use crate::{
    bucket::{BucketCount, bucket_for},
    cache::{DEFAULT_CAPACITY, LruCache},
    error::{Result, TallyError},
    retry::{RetryPolicy, Retryability, execute, with_retry},
    storage::{Mutation, Stores},
};

pub const DEFAULT_NOTIFICATION_BUCKET_SIZE: i64 = 10_000;
pub const DEFAULT_MAX_ERROR_SAMPLES_PER_TYPE: i64 = 100;
pub const DEFAULT_MAX_ERROR_TYPES_PER_TASK: usize = 100;

const PROCESSED_DESCRIPTION: &str = "Completely processed";
const POST_PROCESSING_DESCRIPTION: &str =
    "Ready for post-processing after topology stage is finished";

/// Tuning of the aggregation engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tasks whose snapshot stays cached.
    pub cache_capacity: usize,
    pub retry: RetryPolicy,
    /// Notification rows per bucket.
    pub notification_bucket_size: i64,
    pub processed_record_buckets: BucketCount,
    /// Error samples stored per signature; occurrences are always counted.
    pub max_error_samples_per_type: i64,
    pub max_error_types_per_task: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CAPACITY,
            retry: RetryPolicy::default(),
            notification_bucket_size: DEFAULT_NOTIFICATION_BUCKET_SIZE,
            processed_record_buckets: BucketCount::PROCESSED_RECORDS,
            max_error_samples_per_type: DEFAULT_MAX_ERROR_SAMPLES_PER_TYPE,
            max_error_types_per_task: DEFAULT_MAX_ERROR_TYPES_PER_TASK,
        }
    }
}

/// What happened to one inbound event. Every outcome acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Failed validation; storage was not touched.
    Rejected(&'static str),
    /// Already accounted for by an earlier delivery.
    Duplicate,
    /// Counted. `completed` carries the state the task moved to, if any.
    Recorded { completed: Option<TaskState> },
    /// Recording failed and the task was dropped instead.
    TaskDropped { reason: String },
    /// Neither the event nor the fallback could be stored.
    Lost { reason: String, dead_lettered: bool },
}

/// Turns per-record outcome events into aggregate task state.
///
/// One engine belongs to one worker and handles its events one at a time;
/// the snapshot cache is private to it and storage stays the source of
/// truth.
pub struct NotificationEngine {
    stores: Stores,
    config: EngineConfig,
    cache: LruCache<TaskId, TaskSnapshot>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl fmt::Debug for NotificationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationEngine")
            .field("stores", &self.stores)
            .field("config", &self.config)
            .field("cached_tasks", &self.cache.len())
            .field("dead_letters", &self.dead_letters.is_some())
            .finish()
    }
}

impl NotificationEngine {
    pub fn new(stores: Stores, config: EngineConfig) -> Self {
        let cache = LruCache::new(config.cache_capacity);
        Self {
            stores,
            config,
            cache,
            dead_letters: None,
        }
    }

    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cached_tasks(&self) -> usize {
        self.cache.len()
    }

    /// Processes one event. Never fails: every event is acknowledged.
    pub async fn handle(&mut self, event: &NotificationEvent) -> EventOutcome {
        let outcome = match RecordOutcome::parse(event) {
            Ok(outcome) => outcome,
            Err(reason) => {
                debug!(?event, reason, "dropping malformed notification");
                return EventOutcome::Rejected(reason);
            }
        };

        match self.record(&outcome).await {
            Ok(result) => result,
            Err(err) => self.fall_back(event, &outcome, err).await,
        }
    }

    async fn record(&mut self, outcome: &RecordOutcome) -> Result<EventOutcome> {
        let policy = self.config.retry;
        let task_id = outcome.task_id;

        let processed = &self.stores.processed;
        let previous = execute(
            "load processed record",
            policy.retries,
            policy.sleep(),
            || processed.find(task_id, &outcome.resource),
        )
        .await?;

        if let Some(previous) = &previous
            && !supersedes(previous, outcome.attempt)
        {
            debug!(
                %task_id,
                resource = %outcome.resource,
                attempt = outcome.attempt,
                stored_attempt = previous.attempt,
                "ignoring duplicate notification"
            );
            return Ok(EventOutcome::Duplicate);
        }

        let mut snapshot = self.snapshot(task_id).await?;
        let now = Utc::now();

        let mut mutations = vec![
            Mutation::RecordNotification {
                notification: Notification {
                    task_id,
                    bucket: 0,
                    resource_num: 0,
                    resource: outcome.resource.clone(),
                    state: outcome.state,
                    info_text: outcome.info_text.clone(),
                    additional_info: outcome.additional_info.clone(),
                    result_resource: outcome.result_resource.clone(),
                    attempt: outcome.attempt,
                    recorded_at: now,
                },
                delta: apply_outcome(TaskCounters::default(), outcome),
                bucket_size: self.config.notification_bucket_size,
            },
            Mutation::PutProcessedRecord(ProcessedRecord {
                task_id,
                record_id: outcome.resource.clone(),
                bucket: bucket_for(
                    &outcome.resource,
                    self.config.processed_record_buckets,
                ),
                attempt: outcome.attempt,
                state: outcome.state,
                info_text: Some(outcome.info_text.clone())
                    .filter(|text| !text.is_empty()),
                started_at: previous.as_ref().and_then(|p| p.started_at),
            }),
        ];

        if outcome.state == RecordState::Error {
            mutations.push(self.error_mutation(&mut snapshot, outcome)?);
        }

        mutations.push(Mutation::TouchDiagnostics {
            task_id,
            last_record_finished_at: Some(now),
            retried: outcome.attempt > 0,
            finished_at: None,
        });
        mutations.push(Mutation::CompleteIfFinished { task_id });

        let batch = &self.stores.batch;
        let report = match with_retry(
            policy,
            Retryability::Retryable,
            "store notification batch",
            || batch.execute_all(mutations.clone()),
        )
        .await
        {
            Ok(report) => report,
            Err(err) => {
                self.cache.evict(&task_id);
                return Err(err);
            }
        };

        if let Some(counters) = report.counters {
            snapshot.counters = counters;
        }
        debug!(
            %task_id,
            resource = %outcome.resource,
            resource_num = ?report.resource_num,
            "notification stored"
        );
        if let Some(state) = report.completed {
            info!(%task_id, %state, "task finished processing");
        }
        self.cache.put(task_id, snapshot);

        Ok(EventOutcome::Recorded {
            completed: report.completed,
        })
    }

    /// Cached snapshot, rebuilt from storage when missing or while the
    /// expected size is still unknown.
    async fn snapshot(&mut self, task_id: TaskId) -> Result<TaskSnapshot> {
        if let Some(snapshot) = self.cache.get(&task_id)
            && snapshot.expected_size.is_some()
        {
            return Ok(snapshot.clone());
        }

        let policy = self.config.retry;
        let tasks = &self.stores.tasks;
        let info = execute("load task", policy.retries, policy.sleep(), || {
            tasks.find(task_id)
        })
        .await?
        .ok_or_else(|| TallyError::NotFound(format!("task {task_id}")))?;

        let errors = &self.stores.errors;
        let error_types =
            execute("load error types", policy.retries, policy.sleep(), || {
                errors.list_error_types(task_id)
            })
            .await?;

        debug!(%task_id, expected_size = ?info.expected_size, "rebuilt task snapshot");
        let snapshot =
            TaskSnapshot::new(info.counters, info.expected_size, error_types);
        self.cache.put(task_id, snapshot.clone());
        Ok(snapshot)
    }

    fn error_mutation(
        &self,
        snapshot: &mut TaskSnapshot,
        outcome: &RecordOutcome,
    ) -> Result<Mutation> {
        let message = if outcome.info_text.is_empty() {
            "Unknown error"
        } else {
            outcome.info_text.as_str()
        };
        let mut signature = snapshot.register_error(
            outcome.task_id,
            message,
            self.config.max_error_types_per_task,
        );
        signature.count = 1;

        let additional_info = if outcome.additional_info.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&outcome.additional_info)?)
        };
        Ok(Mutation::CountError {
            sample: ErrorNotification {
                task_id: outcome.task_id,
                error_type: signature.error_type,
                resource: outcome.resource.clone(),
                message: message.to_string(),
                additional_info,
            },
            signature,
            max_samples: self.config.max_error_samples_per_type,
        })
    }

    async fn fall_back(
        &mut self,
        event: &NotificationEvent,
        outcome: &RecordOutcome,
        err: TallyError,
    ) -> EventOutcome {
        let task_id = outcome.task_id;
        let reason = err.to_string();
        self.cache.evict(&task_id);
        error!(
            %task_id,
            resource = %outcome.resource,
            error = %err,
            "failed to store notification, dropping task"
        );

        let this = &*self;
        let dropped = with_retry(
            self.config.retry,
            Retryability::Retryable,
            "drop task",
            || this.drop_task(task_id, &reason),
        )
        .await;

        let Err(drop_err) = dropped else {
            return EventOutcome::TaskDropped { reason };
        };
        error!(
            %task_id,
            error = %drop_err,
            "failed to drop task, acknowledging event without a stored outcome"
        );

        let mut dead_lettered = false;
        if let Some(sink) = &self.dead_letters {
            match sink.push(event, &reason).await {
                Ok(()) => dead_lettered = true,
                Err(sink_err) => error!(
                    %task_id,
                    error = %sink_err,
                    "failed to dead-letter notification"
                ),
            }
        }

        EventOutcome::Lost {
            reason,
            dead_lettered,
        }
    }

    async fn drop_task(&self, task_id: TaskId, reason: &str) -> Result<()> {
        let info = self
            .stores
            .tasks
            .find(task_id)
            .await?
            .ok_or_else(|| TallyError::NotFound(format!("task {task_id}")))?;

        self.stores
            .batch
            .execute_all(transition(&info, TaskState::Dropped, reason))
            .await?;
        Ok(())
    }
}

/// Later attempts of a record still in flight replace earlier ones; a
/// terminal outcome is final.
fn supersedes(previous: &ProcessedRecord, attempt: i32) -> bool {
    !previous.state.is_terminal() && attempt >= previous.attempt
}

/// Mutations moving a task and its index entry to `state`.
pub(crate) fn transition(
    info: &TaskInfo,
    state: TaskState,
    description: &str,
) -> Vec<Mutation> {
    let finished_at = state.is_terminal().then(Utc::now);
    let mut entry = TaskByState::for_task(info);
    entry.state = state;

    vec![
        Mutation::UpdateTaskState {
            task_id: info.id,
            state,
            description: description.to_string(),
            finished_at,
        },
        Mutation::MoveTaskByState(entry),
    ]
}

/// Transition of a task whose stored counters reached its expected size.
///
/// `None` while records are outstanding, once post-processing has started,
/// or when the task already finished.
pub(crate) fn completion(info: &TaskInfo) -> Option<(TaskState, Vec<Mutation>)> {
    if !info.is_complete() {
        return None;
    }
    if info.state.is_terminal() {
        warn!(
            task_id = %info.id,
            state = %info.state,
            "every record arrived for a finished task, keeping its state"
        );
        return None;
    }
    if !matches!(info.state, TaskState::Queued | TaskState::Processing) {
        return None;
    }

    let (state, description) = if info.incremental {
        (TaskState::ReadyForPostProcessing, POST_PROCESSING_DESCRIPTION)
    } else {
        (TaskState::Processed, PROCESSED_DESCRIPTION)
    };
    let mut mutations = transition(info, state, description);
    if state == TaskState::Processed {
        mutations.push(Mutation::TouchDiagnostics {
            task_id: info.id,
            last_record_finished_at: None,
            retried: false,
            finished_at: Some(Utc::now()),
        });
    }
    Some((state, mutations))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tallyflow_model::TaskCounters;

    use super::*;
    use crate::storage::{
        MemoryStore,
        ports::{
            batch::MockBatchExecutor,
            harvested::MockHarvestedRecordStore,
            notifications::{
                MockNotificationStore, MockProcessedRecordStore,
                MockTaskErrorStore,
            },
            tasks::{
                MockDiagnosticStore, MockTaskInfoStore, MockTasksByStateStore,
            },
        },
    };

    const TASK: TaskId = TaskId(111);

    fn config() -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy::none(),
            ..EngineConfig::default()
        }
    }

    async fn store_with_task(expected_size: i64, incremental: bool) -> MemoryStore {
        let store = MemoryStore::new();
        let mut info = TaskInfo::new(TASK, "oai_topology");
        info.state = TaskState::Processing;
        info.expected_size = Some(expected_size);
        info.incremental = incremental;
        info.topic_name = Some("oai_topic".into());
        crate::storage::TaskInfoStore::insert(&store, &info)
            .await
            .unwrap();
        crate::storage::TasksByStateStore::upsert(
            &store,
            &TaskByState::for_task(&info),
        )
        .await
        .unwrap();
        store
    }

    fn event(resource: &str, state: RecordState) -> NotificationEvent {
        NotificationEvent {
            task_id: Some(TASK),
            resource_id: Some(resource.into()),
            state: Some(state),
            ..NotificationEvent::default()
        }
    }

    fn error_event(resource: &str, message: &str) -> NotificationEvent {
        NotificationEvent {
            info_text: Some(message.into()),
            ..event(resource, RecordState::Error)
        }
    }

    async fn task(store: &MemoryStore) -> TaskInfo {
        crate::storage::TaskInfoStore::find(store, TASK)
            .await
            .unwrap()
            .unwrap()
    }

    #[derive(Default)]
    struct RecordingSink {
        pushed: Mutex<Vec<(NotificationEvent, String)>>,
    }

    #[async_trait]
    impl DeadLetterSink for RecordingSink {
        async fn push(&self, event: &NotificationEvent, reason: &str) -> Result<()> {
            self.pushed
                .lock()
                .unwrap()
                .push((event.clone(), reason.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn malformed_events_never_reach_storage() {
        let stores = Stores {
            tasks: Arc::new(MockTaskInfoStore::new()),
            tasks_by_state: Arc::new(MockTasksByStateStore::new()),
            diagnostics: Arc::new(MockDiagnosticStore::new()),
            notifications: Arc::new(MockNotificationStore::new()),
            processed: Arc::new(MockProcessedRecordStore::new()),
            errors: Arc::new(MockTaskErrorStore::new()),
            harvested: Arc::new(MockHarvestedRecordStore::new()),
            batch: Arc::new(MockBatchExecutor::new()),
        };
        let mut engine = NotificationEngine::new(stores, config());

        let mut missing_task = event("r1", RecordState::Success);
        missing_task.task_id = None;
        let mut blank_resource = event("  ", RecordState::Success);
        blank_resource.attempt = 1;
        let queued = event("r1", RecordState::Queued);

        for malformed in [missing_task, blank_resource, queued] {
            let outcome = engine.handle(&malformed).await;
            assert!(matches!(outcome, EventOutcome::Rejected(_)));
        }
    }

    #[tokio::test]
    async fn last_record_completes_the_task() {
        let store = store_with_task(3, false).await;
        let mut engine =
            NotificationEngine::new(Stores::from_memory(store.clone()), config());

        assert_eq!(
            engine.handle(&event("r1", RecordState::Success)).await,
            EventOutcome::Recorded { completed: None }
        );
        assert_eq!(
            engine.handle(&error_event("r2", "broken")).await,
            EventOutcome::Recorded { completed: None }
        );
        assert_eq!(
            engine.handle(&event("r3", RecordState::Dropped)).await,
            EventOutcome::Recorded {
                completed: Some(TaskState::Processed)
            }
        );

        let info = task(&store).await;
        assert_eq!(info.state, TaskState::Processed);
        assert!(info.finished_at.is_some());
        assert_eq!(
            info.counters,
            TaskCounters {
                processed: 2,
                ignored: 1,
                deleted: 0,
                processed_errors: 1,
                deleted_errors: 0,
            }
        );

        let nums: Vec<i64> = store
            .notifications_of(TASK)
            .await
            .iter()
            .map(|n| n.resource_num)
            .collect();
        assert_eq!(nums, vec![1, 2, 3]);

        let entries = store.index_entries_of(TASK).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, TaskState::Processed);

        let diagnostics = crate::storage::DiagnosticStore::find(&store, TASK)
            .await
            .unwrap()
            .unwrap();
        assert!(diagnostics.finished_at.is_some());
    }

    #[tokio::test]
    async fn redelivered_events_are_counted_once() {
        let store = store_with_task(3, false).await;
        let mut engine =
            NotificationEngine::new(Stores::from_memory(store.clone()), config());

        let success = event("r1", RecordState::Success);
        engine.handle(&success).await;
        assert_eq!(engine.handle(&success).await, EventOutcome::Duplicate);

        let mut retried = success.clone();
        retried.attempt = 2;
        assert_eq!(engine.handle(&retried).await, EventOutcome::Duplicate);

        assert_eq!(task(&store).await.counters.total(), 1);
        assert_eq!(store.notifications_of(TASK).await.len(), 1);
    }

    #[tokio::test]
    async fn lower_attempts_never_replace_a_stored_later_attempt() {
        let store = store_with_task(3, false).await;
        crate::storage::ProcessedRecordStore::upsert(
            &store,
            &ProcessedRecord {
                task_id: TASK,
                record_id: "r1".into(),
                bucket: 0,
                attempt: 2,
                state: RecordState::Queued,
                info_text: None,
                started_at: None,
            },
        )
        .await
        .unwrap();
        let mut engine =
            NotificationEngine::new(Stores::from_memory(store.clone()), config());

        let mut stale = event("r1", RecordState::Success);
        stale.attempt = 1;
        assert_eq!(engine.handle(&stale).await, EventOutcome::Duplicate);
        assert_eq!(task(&store).await.counters, TaskCounters::default());

        let mut current = event("r2", RecordState::Success);
        current.attempt = 2;
        engine.handle(&current).await;
        let counters = task(&store).await.counters;
        current.attempt = 1;
        assert_eq!(engine.handle(&current).await, EventOutcome::Duplicate);
        assert_eq!(task(&store).await.counters, counters);
        assert_eq!(store.notifications_of(TASK).await.len(), 1);
    }

    #[tokio::test]
    async fn arrival_order_does_not_matter() {
        let store = store_with_task(3, false).await;
        let mut engine =
            NotificationEngine::new(Stores::from_memory(store.clone()), config());

        let mut outcomes = Vec::new();
        for resource in ["r3", "r1", "r2"] {
            let outcome = engine.handle(&event(resource, RecordState::Success)).await;
            outcomes.push(outcome);
        }

        assert_eq!(
            outcomes.last(),
            Some(&EventOutcome::Recorded {
                completed: Some(TaskState::Processed)
            })
        );
        let info = task(&store).await;
        assert_eq!(info.state, TaskState::Processed);
        assert_eq!(info.counters.processed, 3);
    }

    #[tokio::test]
    async fn workers_sharing_a_task_count_every_record() {
        let store = store_with_task(4, false).await;
        let mut first =
            NotificationEngine::new(Stores::from_memory(store.clone()), config());
        let mut second =
            NotificationEngine::new(Stores::from_memory(store.clone()), config());

        first.handle(&event("r1", RecordState::Success)).await;
        second.handle(&event("r2", RecordState::Success)).await;
        first.handle(&error_event("r3", "broken")).await;
        let last = second.handle(&event("r4", RecordState::Success)).await;

        assert_eq!(
            last,
            EventOutcome::Recorded {
                completed: Some(TaskState::Processed)
            }
        );
        let info = task(&store).await;
        assert_eq!(info.counters.total(), 4);
        assert_eq!(info.counters.processed_errors, 1);
        assert_eq!(info.state, TaskState::Processed);

        let nums: Vec<i64> = store
            .notifications_of(TASK)
            .await
            .iter()
            .map(|n| n.resource_num)
            .collect();
        assert_eq!(nums, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn incremental_tasks_wait_for_post_processing() {
        let store = store_with_task(1, true).await;
        let mut engine =
            NotificationEngine::new(Stores::from_memory(store.clone()), config());

        let outcome = engine.handle(&event("r1", RecordState::Success)).await;

        assert_eq!(
            outcome,
            EventOutcome::Recorded {
                completed: Some(TaskState::ReadyForPostProcessing)
            }
        );
        let info = task(&store).await;
        assert_eq!(info.state, TaskState::ReadyForPostProcessing);
        assert!(info.finished_at.is_none());
    }

    #[tokio::test]
    async fn killed_task_keeps_its_state_when_the_last_record_arrives() {
        let store = store_with_task(1, false).await;
        crate::storage::TaskInfoStore::update_state(
            &store,
            TASK,
            TaskState::Killed,
            "killed by user",
        )
        .await
        .unwrap();
        let mut engine =
            NotificationEngine::new(Stores::from_memory(store.clone()), config());

        let outcome = engine.handle(&event("r1", RecordState::Success)).await;

        assert_eq!(outcome, EventOutcome::Recorded { completed: None });
        let info = task(&store).await;
        assert_eq!(info.state, TaskState::Killed);
        assert_eq!(info.counters.processed, 1);
    }

    #[tokio::test]
    async fn failed_batch_drops_the_task() {
        let store = store_with_task(3, false).await;
        let mut engine =
            NotificationEngine::new(Stores::from_memory(store.clone()), config());
        store.fail_next_batches(1).await;

        let outcome = engine.handle(&event("r1", RecordState::Success)).await;

        assert!(matches!(outcome, EventOutcome::TaskDropped { .. }));
        let info = task(&store).await;
        assert_eq!(info.state, TaskState::Dropped);
        assert!(info.state_description.contains("injected batch failure"));
        assert_eq!(info.counters.total(), 0);
        assert_eq!(engine.cached_tasks(), 0);

        let entries = store.index_entries_of(TASK).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, TaskState::Dropped);
    }

    #[tokio::test]
    async fn unrecoverable_events_go_to_the_dead_letter_sink() {
        let store = store_with_task(3, false).await;
        let sink = Arc::new(RecordingSink::default());
        let mut engine =
            NotificationEngine::new(Stores::from_memory(store.clone()), config())
                .with_dead_letters(sink.clone());
        store.fail_next_batches(2).await;

        let lost = event("r1", RecordState::Success);
        let outcome = engine.handle(&lost).await;

        assert!(matches!(
            outcome,
            EventOutcome::Lost {
                dead_lettered: true,
                ..
            }
        ));
        let pushed = sink.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, lost);
        assert_eq!(task(&store).await.state, TaskState::Processing);
    }

    #[tokio::test]
    async fn error_samples_stop_at_the_limit_while_occurrences_keep_counting() {
        let store = store_with_task(10, false).await;
        let mut engine = NotificationEngine::new(
            Stores::from_memory(store.clone()),
            EngineConfig {
                max_error_samples_per_type: 2,
                ..config()
            },
        );

        for resource in ["r1", "r2", "r3"] {
            engine.handle(&error_event(resource, "timeout")).await;
        }

        assert_eq!(store.error_notifications_of(TASK).await.len(), 2);
        let types = crate::storage::TaskErrorStore::list_error_types(&store, TASK)
            .await
            .unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].count, 3);
        assert_eq!(task(&store).await.counters.processed_errors, 3);
    }

    #[tokio::test]
    async fn evicted_snapshots_are_rebuilt_from_storage() {
        let store = store_with_task(2, false).await;
        let mut other = TaskInfo::new(TaskId(222), "oai_topology");
        other.expected_size = Some(5);
        crate::storage::TaskInfoStore::insert(&store, &other)
            .await
            .unwrap();
        let mut engine = NotificationEngine::new(
            Stores::from_memory(store.clone()),
            EngineConfig {
                cache_capacity: 1,
                ..config()
            },
        );

        engine.handle(&event("r1", RecordState::Success)).await;
        let mut foreign = event("x1", RecordState::Success);
        foreign.task_id = Some(TaskId(222));
        engine.handle(&foreign).await;
        let outcome = engine.handle(&event("r2", RecordState::Success)).await;

        assert_eq!(
            outcome,
            EventOutcome::Recorded {
                completed: Some(TaskState::Processed)
            }
        );
        assert_eq!(engine.cached_tasks(), 1);
    }
}
