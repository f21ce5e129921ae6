//! Repairs drift between `task_info` and the per-topic task index.
//!
//! `task_info` is authoritative. Index entries whose recorded state differs
//! are moved to the authoritative state; `task_info` is never written here.

use std::collections::HashSet;

use tallyflow_model::{TaskByState, TaskState};
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    retry::{RetryPolicy, Retryability, with_retry},
    storage::Stores,
};

/// Aligns the index entries of `topology` with the authoritative task state.
///
/// Only entries whose topic is in `topics` are considered. Returns the
/// number of corrected entries; a second run right after returns zero.
pub async fn synchronize(
    stores: &Stores,
    retry: RetryPolicy,
    topology: &str,
    topics: &[String],
) -> Result<usize> {
    let owned: HashSet<&str> = topics.iter().map(String::as_str).collect();
    let index = &stores.tasks_by_state;
    let entries = with_retry(retry, Retryability::Retryable, "list active tasks", || {
        index.list(topology, &TaskState::ACTIVE)
    })
    .await?;

    let mut corrected = 0;
    for entry in entries {
        let Some(topic) = entry.topic_name.as_deref() else {
            debug!(task_id = %entry.task_id, "index entry without topic, skipping");
            continue;
        };
        if !owned.contains(topic) {
            continue;
        }

        let tasks = &stores.tasks;
        let task_id = entry.task_id;
        let Some(info) = with_retry(retry, Retryability::Retryable, "load task", || {
            tasks.find(task_id)
        })
        .await?
        else {
            warn!(%task_id, topic, "index entry refers to an unknown task");
            continue;
        };

        if info.state == entry.state {
            continue;
        }

        let mut replacement = TaskByState::for_task(&info);
        replacement.topology_name = entry.topology_name.clone();
        with_retry(retry, Retryability::Retryable, "correct index entry", || {
            index.replace(&entry, &replacement)
        })
        .await?;
        info!(
            %task_id,
            from = %entry.state,
            to = %info.state,
            "corrected task index entry"
        );
        corrected += 1;
    }

    Ok(corrected)
}

#[cfg(test)]
mod tests {
    use tallyflow_model::{TaskId, TaskInfo};

    use super::*;
    use crate::storage::{MemoryStore, TaskInfoStore, TasksByStateStore};

    async fn task(
        store: &MemoryStore,
        id: i64,
        indexed: TaskState,
        actual: TaskState,
        topic: &str,
    ) {
        let mut info = TaskInfo::new(TaskId(id), "oai_topology");
        info.topic_name = Some(topic.into());
        info.state = indexed;
        TasksByStateStore::upsert(store, &TaskByState::for_task(&info))
            .await
            .unwrap();
        info.state = actual;
        TaskInfoStore::insert(store, &info).await.unwrap();
    }

    fn topics() -> Vec<String> {
        vec!["oai_topic_1".into(), "oai_topic_2".into()]
    }

    #[tokio::test]
    async fn stale_entries_follow_the_authoritative_state() {
        let store = MemoryStore::new();
        task(&store, 1, TaskState::Processing, TaskState::Processed, "oai_topic_1").await;
        task(&store, 2, TaskState::Processing, TaskState::Processing, "oai_topic_2").await;
        let stores = Stores::from_memory(store.clone());

        let corrected = synchronize(&stores, RetryPolicy::none(), "oai_topology", &topics())
            .await
            .unwrap();

        assert_eq!(corrected, 1);
        let entries = store.index_entries_of(TaskId(1)).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, TaskState::Processed);
        let untouched = store.index_entries_of(TaskId(2)).await;
        assert_eq!(untouched[0].state, TaskState::Processing);
    }

    #[tokio::test]
    async fn foreign_topics_are_ignored() {
        let store = MemoryStore::new();
        task(&store, 3, TaskState::Queued, TaskState::Dropped, "http_topic").await;
        let stores = Stores::from_memory(store.clone());

        let corrected = synchronize(&stores, RetryPolicy::none(), "oai_topology", &topics())
            .await
            .unwrap();

        assert_eq!(corrected, 0);
        let entries = store.index_entries_of(TaskId(3)).await;
        assert_eq!(entries[0].state, TaskState::Queued);
    }

    #[tokio::test]
    async fn second_run_finds_nothing_to_correct() {
        let store = MemoryStore::new();
        task(&store, 4, TaskState::Queued, TaskState::Processing, "oai_topic_1").await;
        task(&store, 5, TaskState::Processing, TaskState::Killed, "oai_topic_2").await;
        let stores = Stores::from_memory(store.clone());

        let first = synchronize(&stores, RetryPolicy::none(), "oai_topology", &topics())
            .await
            .unwrap();
        let second = synchronize(&stores, RetryPolicy::none(), "oai_topology", &topics())
            .await
            .unwrap();

        assert_eq!((first, second), (2, 0));
    }

    #[tokio::test]
    async fn entries_of_unknown_tasks_are_skipped() {
        let store = MemoryStore::new();
        let mut orphan = TaskInfo::new(TaskId(6), "oai_topology");
        orphan.topic_name = Some("oai_topic_1".into());
        TasksByStateStore::upsert(&store, &TaskByState::for_task(&orphan))
            .await
            .unwrap();
        let stores = Stores::from_memory(store);

        let corrected = synchronize(&stores, RetryPolicy::none(), "oai_topology", &topics())
            .await
            .unwrap();

        assert_eq!(corrected, 0);
    }
}
