use async_trait::async_trait;
use sqlx::{PgConnection, PgExecutor, PgPool, Row, types::Json};
use tallyflow_model::{
    ErrorNotification, ErrorType, Notification, ProcessedRecord, TaskCounters,
    TaskId,
};
use tracing::debug;

use super::tasks::map_task_info;
use crate::{
    bucket::notification_bucket,
    error::{Result, TallyError},
    notification::engine::completion,
    storage::ports::{BatchExecutor, BatchReport, Mutation},
};

/// Runs each batch inside one transaction.
///
/// Counter increments lock the task row until commit, so concurrent workers
/// see each other's totals when deciding completion.
#[derive(Clone, Debug)]
pub struct PostgresBatchExecutor {
    pool: PgPool,
}

impl PostgresBatchExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchExecutor for PostgresBatchExecutor {
    async fn execute_all(&self, mutations: Vec<Mutation>) -> Result<BatchReport> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TallyError::storage("Failed to begin batch", e))?;

        debug!(statements = mutations.len(), "executing batch");
        let mut report = BatchReport::default();
        for mutation in &mutations {
            apply(&mut tx, mutation, &mut report).await?;
        }

        tx.commit()
            .await
            .map_err(|e| TallyError::storage("Failed to commit batch", e))?;
        Ok(report)
    }
}

pub(super) async fn upsert_processed_record<'e, E>(
    executor: E,
    record: &ProcessedRecord,
) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO processed_records (
            task_id, record_id, bucket_number, attempt_number, state,
            info_text, started_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (task_id, record_id) DO UPDATE SET
            bucket_number = EXCLUDED.bucket_number,
            attempt_number = EXCLUDED.attempt_number,
            state = EXCLUDED.state,
            info_text = EXCLUDED.info_text,
            started_at = COALESCE(EXCLUDED.started_at, processed_records.started_at)
        "#,
    )
    .bind(record.task_id.get())
    .bind(&record.record_id)
    .bind(record.bucket)
    .bind(record.attempt)
    .bind(record.state.as_str())
    .bind(&record.info_text)
    .bind(record.started_at)
    .execute(executor)
    .await
    .map_err(|e| TallyError::storage("Failed to upsert processed record", e))?;

    Ok(())
}

async fn apply(
    conn: &mut PgConnection,
    mutation: &Mutation,
    report: &mut BatchReport,
) -> Result<()> {
    match mutation {
        Mutation::RecordNotification {
            notification,
            delta,
            bucket_size,
        } => {
            let counters =
                increment_counters(&mut *conn, notification.task_id, delta).await?;
            let resource_num = counters.total();
            let mut notification = notification.clone();
            notification.resource_num = resource_num;
            notification.bucket = notification_bucket(resource_num, *bucket_size);
            insert_notification(&mut *conn, &notification).await?;
            report.counters = Some(counters);
            report.resource_num = Some(resource_num);
        }
        Mutation::CountError {
            signature,
            sample,
            max_samples,
        } => {
            let occurrences = count_error(&mut *conn, signature).await?;
            if occurrences <= *max_samples {
                insert_error_sample(&mut *conn, sample).await?;
            }
        }
        Mutation::CompleteIfFinished { task_id } => {
            let row = sqlx::query(
                r#"
                SELECT id, topology_name, state, state_description, expected_size,
                       processed_count, ignored_count, deleted_count,
                       processed_errors_count, deleted_errors_count,
                       owner_id, topic_name, incremental,
                       sent_at, started_at, finished_at
                FROM task_info
                WHERE id = $1
                FOR UPDATE
                "#,
            )
            .bind(task_id.get())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| TallyError::storage("Failed to lock task", e))?
            .ok_or_else(|| TallyError::NotFound(format!("task {task_id}")))?;

            if let Some((state, writes)) = completion(&map_task_info(&row)?) {
                for write in &writes {
                    apply_write(&mut *conn, write).await?;
                }
                report.completed = Some(state);
            }
        }
        other => apply_write(conn, other).await?,
    }
    Ok(())
}

async fn increment_counters(
    conn: &mut PgConnection,
    task_id: TaskId,
    delta: &TaskCounters,
) -> Result<TaskCounters> {
    let row = sqlx::query(
        r#"
        UPDATE task_info SET
            processed_count = processed_count + $2,
            ignored_count = ignored_count + $3,
            deleted_count = deleted_count + $4,
            processed_errors_count = processed_errors_count + $5,
            deleted_errors_count = deleted_errors_count + $6
        WHERE id = $1
        RETURNING processed_count, ignored_count, deleted_count,
                  processed_errors_count, deleted_errors_count
        "#,
    )
    .bind(task_id.get())
    .bind(delta.processed)
    .bind(delta.ignored)
    .bind(delta.deleted)
    .bind(delta.processed_errors)
    .bind(delta.deleted_errors)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| TallyError::storage("Failed to update counters", e))?
    .ok_or_else(|| TallyError::NotFound(format!("task {task_id}")))?;

    let read = |e: sqlx::Error| TallyError::storage("Failed to read counters", e);
    Ok(TaskCounters {
        processed: row.try_get("processed_count").map_err(read)?,
        ignored: row.try_get("ignored_count").map_err(read)?,
        deleted: row.try_get("deleted_count").map_err(read)?,
        processed_errors: row.try_get("processed_errors_count").map_err(read)?,
        deleted_errors: row.try_get("deleted_errors_count").map_err(read)?,
    })
}

async fn insert_notification(
    conn: &mut PgConnection,
    notification: &Notification,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notifications (
            task_id, bucket_number, resource_num, resource, state,
            info_text, additional_info, result_resource, attempt,
            recorded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (task_id, bucket_number, resource_num, resource)
        DO NOTHING
        "#,
    )
    .bind(notification.task_id.get())
    .bind(notification.bucket)
    .bind(notification.resource_num)
    .bind(&notification.resource)
    .bind(notification.state.as_str())
    .bind(&notification.info_text)
    .bind(Json(&notification.additional_info))
    .bind(&notification.result_resource)
    .bind(notification.attempt)
    .bind(notification.recorded_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| TallyError::storage("Failed to insert notification", e))?;
    Ok(())
}

/// Adds the signature's occurrences and returns the stored total.
async fn count_error(conn: &mut PgConnection, signature: &ErrorType) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO task_errors (task_id, error_type, message, occurrences)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (task_id, error_type) DO UPDATE SET
            message = EXCLUDED.message,
            occurrences = task_errors.occurrences + EXCLUDED.occurrences
        RETURNING occurrences
        "#,
    )
    .bind(signature.task_id.get())
    .bind(signature.error_type)
    .bind(&signature.message)
    .bind(signature.count)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| TallyError::storage("Failed to count error type", e))?;

    row.try_get("occurrences")
        .map_err(|e| TallyError::storage("Failed to read error occurrences", e))
}

async fn insert_error_sample(
    conn: &mut PgConnection,
    sample: &ErrorNotification,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO error_notifications (
            task_id, error_type, resource, message, additional_info
        )
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (task_id, error_type, resource) DO NOTHING
        "#,
    )
    .bind(sample.task_id.get())
    .bind(sample.error_type)
    .bind(&sample.resource)
    .bind(&sample.message)
    .bind(&sample.additional_info)
    .execute(&mut *conn)
    .await
    .map_err(|e| TallyError::storage("Failed to insert error notification", e))?;
    Ok(())
}

/// Mutations that write without reporting anything back.
async fn apply_write(conn: &mut PgConnection, mutation: &Mutation) -> Result<()> {
    match mutation {
        Mutation::SetExpectedSize {
            task_id,
            expected_size,
        } => {
            let result =
                sqlx::query("UPDATE task_info SET expected_size = $2 WHERE id = $1")
                    .bind(task_id.get())
                    .bind(expected_size)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        TallyError::storage("Failed to set expected size", e)
                    })?;

            if result.rows_affected() == 0 {
                return Err(TallyError::NotFound(format!("task {task_id}")));
            }
        }
        Mutation::UpdateTaskState {
            task_id,
            state,
            description,
            finished_at,
        } => {
            let result = sqlx::query(
                r#"
                UPDATE task_info SET
                    state = $2,
                    state_description = $3,
                    finished_at = COALESCE($4, finished_at)
                WHERE id = $1
                "#,
            )
            .bind(task_id.get())
            .bind(state.as_str())
            .bind(description)
            .bind(finished_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| TallyError::storage("Failed to update task state", e))?;

            if result.rows_affected() == 0 {
                return Err(TallyError::NotFound(format!("task {task_id}")));
            }
        }
        Mutation::PutProcessedRecord(record) => {
            upsert_processed_record(&mut *conn, record).await?;
        }
        Mutation::MoveTaskByState(entry) => {
            sqlx::query(
                "DELETE FROM tasks_by_state WHERE topology_name = $1 AND task_id = $2",
            )
            .bind(&entry.topology_name)
            .bind(entry.task_id.get())
            .execute(&mut *conn)
            .await
            .map_err(|e| TallyError::storage("Failed to clear task index", e))?;

            sqlx::query(
                r#"
                INSERT INTO tasks_by_state (
                    state, topology_name, task_id, owner_id, topic_name, started_at
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(entry.state.as_str())
            .bind(&entry.topology_name)
            .bind(entry.task_id.get())
            .bind(&entry.owner_id)
            .bind(&entry.topic_name)
            .bind(entry.started_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| TallyError::storage("Failed to insert task index", e))?;
        }
        Mutation::TouchDiagnostics {
            task_id,
            last_record_finished_at,
            retried,
            finished_at,
        } => {
            sqlx::query(
                r#"
                INSERT INTO task_diagnostic_info (
                    task_id, last_record_finished_at, records_retry_count,
                    finished_at
                )
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (task_id) DO UPDATE SET
                    last_record_finished_at = COALESCE(
                        EXCLUDED.last_record_finished_at,
                        task_diagnostic_info.last_record_finished_at
                    ),
                    records_retry_count = task_diagnostic_info.records_retry_count
                        + EXCLUDED.records_retry_count,
                    finished_at = COALESCE(
                        EXCLUDED.finished_at,
                        task_diagnostic_info.finished_at
                    )
                "#,
            )
            .bind(task_id.get())
            .bind(last_record_finished_at)
            .bind(i64::from(*retried))
            .bind(finished_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| TallyError::storage("Failed to touch diagnostics", e))?;
        }
        Mutation::RecordNotification { .. }
        | Mutation::CountError { .. }
        | Mutation::CompleteIfFinished { .. } => {
            return Err(TallyError::Internal(format!(
                "{mutation:?} reports back and cannot run as a plain write"
            )));
        }
    }
    Ok(())
}
