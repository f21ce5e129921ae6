//! In-process implementation of every storage port.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tallyflow_model::{
    ErrorNotification, ErrorType, HarvestedRecord, Notification,
    ProcessedRecord, TaskByState, TaskDiagnostics, TaskId, TaskInfo,
    TaskState,
};
use uuid::Uuid;

use super::ports::{
    BatchExecutor, BatchReport, DiagnosticStore, HarvestedRecordStore, Mutation,
    NotificationStore, ProcessedRecordStore, TaskErrorStore, TaskInfoStore,
    TasksByStateStore,
};
use crate::{
    bucket::notification_bucket,
    error::{Result, TallyError},
    notification::engine::completion,
};

type IndexKey = (&'static str, String, TaskId);
type LedgerKey = (String, String, String);

#[derive(Debug, Default)]
struct MemoryState {
    tasks: HashMap<TaskId, TaskInfo>,
    tasks_by_state: BTreeMap<IndexKey, TaskByState>,
    notifications: BTreeMap<(TaskId, i32), Vec<Notification>>,
    processed: HashMap<(TaskId, String), ProcessedRecord>,
    harvested: BTreeMap<LedgerKey, HarvestedRecord>,
    error_types: BTreeMap<(TaskId, Uuid), ErrorType>,
    error_notifications: Vec<ErrorNotification>,
    diagnostics: HashMap<TaskId, TaskDiagnostics>,
    failing_batches: u32,
}

/// Prior value of a row a batch wrote, restored when the batch fails.
#[derive(Debug)]
enum Undo {
    Task(TaskInfo),
    Index(TaskId, Vec<(IndexKey, TaskByState)>),
    Notification((TaskId, i32)),
    Processed((TaskId, String), Option<ProcessedRecord>),
    ErrorType((TaskId, Uuid), Option<ErrorType>),
    ErrorSample,
    Diagnostics(TaskId, Option<TaskDiagnostics>),
}

impl MemoryState {
    fn apply(
        &mut self,
        mutation: Mutation,
        journal: &mut Vec<Undo>,
        report: &mut BatchReport,
    ) -> Result<()> {
        match mutation {
            Mutation::RecordNotification {
                mut notification,
                delta,
                bucket_size,
            } => {
                let task_id = notification.task_id;
                self.save_task(task_id, journal)?;
                let task = self.task_mut(task_id)?;
                task.counters += delta;
                let counters = task.counters;

                notification.resource_num = counters.total();
                notification.bucket =
                    notification_bucket(notification.resource_num, bucket_size);
                let key = (task_id, notification.bucket);
                report.counters = Some(counters);
                report.resource_num = Some(notification.resource_num);
                journal.push(Undo::Notification(key));
                self.notifications.entry(key).or_default().push(notification);
            }
            Mutation::SetExpectedSize {
                task_id,
                expected_size,
            } => {
                self.save_task(task_id, journal)?;
                self.task_mut(task_id)?.expected_size = Some(expected_size);
            }
            Mutation::UpdateTaskState {
                task_id,
                state,
                description,
                finished_at,
            } => {
                self.save_task(task_id, journal)?;
                let task = self.task_mut(task_id)?;
                task.state = state;
                task.state_description = description;
                if finished_at.is_some() {
                    task.finished_at = finished_at;
                }
            }
            Mutation::PutProcessedRecord(record) => {
                let key = (record.task_id, record.record_id.clone());
                journal.push(Undo::Processed(
                    key.clone(),
                    self.processed.get(&key).cloned(),
                ));
                self.put_processed(record);
            }
            Mutation::CountError {
                signature,
                sample,
                max_samples,
            } => {
                let key = (signature.task_id, signature.error_type);
                journal.push(Undo::ErrorType(
                    key,
                    self.error_types.get(&key).cloned(),
                ));
                let stored = self.error_types.entry(key).or_insert(ErrorType {
                    count: 0,
                    ..signature.clone()
                });
                stored.count += signature.count;
                stored.message = signature.message;
                if stored.count <= max_samples {
                    journal.push(Undo::ErrorSample);
                    self.error_notifications.push(sample);
                }
            }
            Mutation::MoveTaskByState(entry) => {
                journal.push(Undo::Index(
                    entry.task_id,
                    self.index_of(entry.task_id),
                ));
                self.tasks_by_state.retain(|(_, topology, task_id), _| {
                    !(topology == &entry.topology_name
                        && *task_id == entry.task_id)
                });
                self.tasks_by_state.insert(index_key(&entry), entry);
            }
            Mutation::TouchDiagnostics {
                task_id,
                last_record_finished_at,
                retried,
                finished_at,
            } => {
                journal.push(Undo::Diagnostics(
                    task_id,
                    self.diagnostics.get(&task_id).cloned(),
                ));
                let diagnostics = self
                    .diagnostics
                    .entry(task_id)
                    .or_insert_with(|| TaskDiagnostics::new(task_id));
                if last_record_finished_at.is_some() {
                    diagnostics.last_record_finished_at =
                        last_record_finished_at;
                }
                if retried {
                    diagnostics.records_retry_count += 1;
                }
                if finished_at.is_some() {
                    diagnostics.finished_at = finished_at;
                }
            }
            Mutation::CompleteIfFinished { task_id } => {
                let info = self.tasks.get(&task_id).ok_or_else(|| {
                    TallyError::NotFound(format!("task {task_id}"))
                })?;
                if let Some((state, mutations)) = completion(info) {
                    for mutation in mutations {
                        self.apply(mutation, journal, report)?;
                    }
                    report.completed = Some(state);
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self, journal: Vec<Undo>) {
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::Task(info) => {
                    self.tasks.insert(info.id, info);
                }
                Undo::Index(task_id, previous) => {
                    self.tasks_by_state.retain(|(_, _, id), _| *id != task_id);
                    self.tasks_by_state.extend(previous);
                }
                Undo::Notification(key) => {
                    if let Some(rows) = self.notifications.get_mut(&key) {
                        rows.pop();
                        if rows.is_empty() {
                            self.notifications.remove(&key);
                        }
                    }
                }
                Undo::Processed(key, previous) => match previous {
                    Some(record) => {
                        self.processed.insert(key, record);
                    }
                    None => {
                        self.processed.remove(&key);
                    }
                },
                Undo::ErrorType(key, previous) => match previous {
                    Some(error_type) => {
                        self.error_types.insert(key, error_type);
                    }
                    None => {
                        self.error_types.remove(&key);
                    }
                },
                Undo::ErrorSample => {
                    self.error_notifications.pop();
                }
                Undo::Diagnostics(task_id, previous) => match previous {
                    Some(diagnostics) => {
                        self.diagnostics.insert(task_id, diagnostics);
                    }
                    None => {
                        self.diagnostics.remove(&task_id);
                    }
                },
            }
        }
    }

    fn save_task(&self, task_id: TaskId, journal: &mut Vec<Undo>) -> Result<()> {
        let info = self
            .tasks
            .get(&task_id)
            .ok_or_else(|| TallyError::NotFound(format!("task {task_id}")))?;
        journal.push(Undo::Task(info.clone()));
        Ok(())
    }

    fn index_of(&self, task_id: TaskId) -> Vec<(IndexKey, TaskByState)> {
        self.tasks_by_state
            .iter()
            .filter(|((_, _, id), _)| *id == task_id)
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Keeps the stored start time when the new row carries none.
    fn put_processed(&mut self, mut record: ProcessedRecord) {
        let key = (record.task_id, record.record_id.clone());
        if record.started_at.is_none() {
            record.started_at =
                self.processed.get(&key).and_then(|old| old.started_at);
        }
        self.processed.insert(key, record);
    }

    fn task_mut(&mut self, task_id: TaskId) -> Result<&mut TaskInfo> {
        self.tasks
            .get_mut(&task_id)
            .ok_or_else(|| TallyError::NotFound(format!("task {task_id}")))
    }
}

fn index_key(entry: &TaskByState) -> IndexKey {
    (entry.state.as_str(), entry.topology_name.clone(), entry.task_id)
}

fn ledger_key(provider: &str, dataset: &str, record: &str) -> LedgerKey {
    (provider.to_string(), dataset.to_string(), record.to_string())
}

/// Storage kept in memory behind one async mutex.
///
/// Every port method locks the whole state. A failing batch is undone from
/// a journal of the rows it already wrote.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<tokio::sync::Mutex<MemoryState>>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("MemoryStore");
        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("tasks", &state.tasks.len())
                    .field("tasks_by_state", &state.tasks_by_state.len())
                    .field("processed", &state.processed.len())
                    .field("harvested", &state.harvested.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` batches fail with a storage error.
    pub async fn fail_next_batches(&self, count: u32) {
        self.state.lock().await.failing_batches = count;
    }

    /// Every notification row of a task, in bucket order.
    pub async fn notifications_of(&self, task_id: TaskId) -> Vec<Notification> {
        let state = self.state.lock().await;
        state
            .notifications
            .iter()
            .filter(|((task, _), _)| *task == task_id)
            .flat_map(|(_, rows)| rows.iter().cloned())
            .collect()
    }

    pub async fn error_notifications_of(
        &self,
        task_id: TaskId,
    ) -> Vec<ErrorNotification> {
        let state = self.state.lock().await;
        state
            .error_notifications
            .iter()
            .filter(|sample| sample.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Index entries of a task regardless of state.
    pub async fn index_entries_of(&self, task_id: TaskId) -> Vec<TaskByState> {
        let state = self.state.lock().await;
        state
            .tasks_by_state
            .values()
            .filter(|entry| entry.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskInfoStore for MemoryStore {
    async fn find(&self, task_id: TaskId) -> Result<Option<TaskInfo>> {
        Ok(self.state.lock().await.tasks.get(&task_id).cloned())
    }

    async fn insert(&self, info: &TaskInfo) -> Result<()> {
        self.state.lock().await.tasks.insert(info.id, info.clone());
        Ok(())
    }

    async fn update_state(
        &self,
        task_id: TaskId,
        state: TaskState,
        description: &str,
    ) -> Result<()> {
        let mut guard = self.state.lock().await;
        let task = guard.task_mut(task_id)?;
        task.state = state;
        task.state_description = description.to_string();
        Ok(())
    }

    async fn set_expected_size(
        &self,
        task_id: TaskId,
        expected_size: i64,
    ) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.task_mut(task_id)?.expected_size = Some(expected_size);
        Ok(())
    }
}

#[async_trait]
impl TasksByStateStore for MemoryStore {
    async fn list(
        &self,
        topology_name: &str,
        states: &[TaskState],
    ) -> Result<Vec<TaskByState>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks_by_state
            .values()
            .filter(|entry| {
                entry.topology_name == topology_name
                    && states.contains(&entry.state)
            })
            .cloned()
            .collect())
    }

    async fn upsert(&self, entry: &TaskByState) -> Result<()> {
        self.state
            .lock()
            .await
            .tasks_by_state
            .insert(index_key(entry), entry.clone());
        Ok(())
    }

    async fn delete(
        &self,
        state: TaskState,
        topology_name: &str,
        task_id: TaskId,
    ) -> Result<()> {
        self.state.lock().await.tasks_by_state.remove(&(
            state.as_str(),
            topology_name.to_string(),
            task_id,
        ));
        Ok(())
    }
}

#[async_trait]
impl DiagnosticStore for MemoryStore {
    async fn find(&self, task_id: TaskId) -> Result<Option<TaskDiagnostics>> {
        Ok(self.state.lock().await.diagnostics.get(&task_id).cloned())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn count_in_bucket(&self, task_id: TaskId, bucket: i32) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .get(&(task_id, bucket))
            .map_or(0, |rows| rows.len() as i64))
    }

    async fn list_bucket(
        &self,
        task_id: TaskId,
        bucket: i32,
    ) -> Result<Vec<Notification>> {
        let state = self.state.lock().await;
        let mut rows = state
            .notifications
            .get(&(task_id, bucket))
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|row| row.resource_num);
        Ok(rows)
    }
}

#[async_trait]
impl ProcessedRecordStore for MemoryStore {
    async fn find(
        &self,
        task_id: TaskId,
        record_id: &str,
    ) -> Result<Option<ProcessedRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .processed
            .get(&(task_id, record_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, record: &ProcessedRecord) -> Result<()> {
        self.state.lock().await.put_processed(record.clone());
        Ok(())
    }
}

#[async_trait]
impl TaskErrorStore for MemoryStore {
    async fn list_error_types(&self, task_id: TaskId) -> Result<Vec<ErrorType>> {
        let state = self.state.lock().await;
        Ok(state
            .error_types
            .values()
            .filter(|error_type| error_type.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn list_error_notifications(
        &self,
        task_id: TaskId,
        error_type: Uuid,
        limit: i64,
    ) -> Result<Vec<ErrorNotification>> {
        let state = self.state.lock().await;
        Ok(state
            .error_notifications
            .iter()
            .filter(|sample| {
                sample.task_id == task_id && sample.error_type == error_type
            })
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl HarvestedRecordStore for MemoryStore {
    async fn find(
        &self,
        provider_id: &str,
        dataset_id: &str,
        record_local_id: &str,
    ) -> Result<Option<HarvestedRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .harvested
            .get(&ledger_key(provider_id, dataset_id, record_local_id))
            .cloned())
    }

    async fn upsert(&self, record: &HarvestedRecord) -> Result<()> {
        let key = ledger_key(
            &record.provider_id,
            &record.dataset_id,
            &record.record_local_id,
        );
        let mut state = self.state.lock().await;
        let mut record = record.clone();
        if let Some(old) = state.harvested.get(&key) {
            record.latest_harvest_date =
                record.latest_harvest_date.max(old.latest_harvest_date);
        }
        state.harvested.insert(key, record);
        Ok(())
    }

    async fn update_latest(
        &self,
        provider_id: &str,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Option<Uuid>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state
            .harvested
            .get_mut(&ledger_key(provider_id, dataset_id, record_local_id))
            .ok_or_else(|| {
                TallyError::NotFound(format!(
                    "harvested record {provider_id}/{dataset_id}/{record_local_id}"
                ))
            })?;
        if harvest_date > record.latest_harvest_date {
            record.latest_harvest_date = harvest_date;
        }
        if md5.is_some() {
            record.latest_harvest_md5 = md5;
        }
        Ok(())
    }

    async fn list_bucket(
        &self,
        provider_id: &str,
        dataset_id: &str,
        bucket: i32,
    ) -> Result<Vec<HarvestedRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .harvested
            .values()
            .filter(|record| {
                record.provider_id == provider_id
                    && record.dataset_id == dataset_id
                    && record.bucket == bucket
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BatchExecutor for MemoryStore {
    async fn execute_all(&self, mutations: Vec<Mutation>) -> Result<BatchReport> {
        let mut guard = self.state.lock().await;
        if guard.failing_batches > 0 {
            guard.failing_batches -= 1;
            return Err(TallyError::Storage("injected batch failure".into()));
        }

        let mut journal = Vec::with_capacity(mutations.len());
        let mut report = BatchReport::default();
        for mutation in mutations {
            if let Err(err) = guard.apply(mutation, &mut journal, &mut report) {
                guard.rollback(journal);
                return Err(err);
            }
        }
        Ok(report)
    }
}
