//! Read side of the notification tables.

use futures::Stream;
use tallyflow_model::{ErrorNotification, ErrorType, Notification, TaskId};

use crate::{
    bucket::{BucketCount, count_contiguous, notification_bucket, page_cursor, scan_buckets},
    error::Result,
    storage::{NotificationStore, TaskErrorStore},
};

/// Number of notification rows stored for a task.
pub async fn count_notifications(
    store: &dyn NotificationStore,
    task_id: TaskId,
) -> Result<i64> {
    count_contiguous(|bucket| store.count_in_bucket(task_id, bucket)).await
}

/// Every notification of a task in sequence order.
///
/// `total` is the task's current record count; it bounds the buckets that
/// are visited.
pub fn task_notifications<'a>(
    store: &'a dyn NotificationStore,
    task_id: TaskId,
    total: i64,
    bucket_size: i64,
) -> impl Stream<Item = Result<Notification>> + Send + 'a {
    let last = i64::from(notification_bucket(total, bucket_size));
    scan_buckets(BucketCount::clamped(last + 1), move |bucket| async move {
        store.list_bucket(task_id, bucket).await.map(page_cursor)
    })
}

/// One error signature with a few of its samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub error_type: ErrorType,
    pub samples: Vec<ErrorNotification>,
}

/// Error signatures of a task, most frequent first.
pub async fn error_report(
    store: &dyn TaskErrorStore,
    task_id: TaskId,
    samples_per_type: i64,
) -> Result<Vec<ErrorReport>> {
    let mut types = store.list_error_types(task_id).await?;
    types.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));

    let mut report = Vec::with_capacity(types.len());
    for error_type in types {
        let samples = store
            .list_error_notifications(task_id, error_type.error_type, samples_per_type)
            .await?;
        report.push(ErrorReport {
            error_type,
            samples,
        });
    }
    Ok(report)
}
