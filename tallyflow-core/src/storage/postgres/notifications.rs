use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use tallyflow_model::{
    ErrorNotification, ErrorType, Notification, ProcessedRecord, TaskId,
};
use uuid::Uuid;

use crate::{
    error::{Result, TallyError},
    storage::ports::{NotificationStore, ProcessedRecordStore, TaskErrorStore},
};

#[derive(Clone, Debug)]
pub struct PostgresNotificationRepository {
    pool: PgPool,
}

impl PostgresNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_notification(row: &PgRow) -> Result<Notification> {
    let read =
        |e: sqlx::Error| TallyError::storage("Failed to read notifications", e);
    let state: String = row.try_get("state").map_err(read)?;
    let additional_info: Json<BTreeMap<String, String>> =
        row.try_get("additional_info").map_err(read)?;

    Ok(Notification {
        task_id: TaskId(row.try_get("task_id").map_err(read)?),
        bucket: row.try_get("bucket_number").map_err(read)?,
        resource_num: row.try_get("resource_num").map_err(read)?,
        resource: row.try_get("resource").map_err(read)?,
        state: state.parse()?,
        info_text: row.try_get("info_text").map_err(read)?,
        additional_info: additional_info.0,
        result_resource: row.try_get("result_resource").map_err(read)?,
        attempt: row.try_get("attempt").map_err(read)?,
        recorded_at: row.try_get("recorded_at").map_err(read)?,
    })
}

#[async_trait]
impl NotificationStore for PostgresNotificationRepository {
    async fn count_in_bucket(&self, task_id: TaskId, bucket: i32) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM notifications
            WHERE task_id = $1 AND bucket_number = $2
            "#,
        )
        .bind(task_id.get())
        .bind(bucket)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to count notifications", e))?;

        row.try_get("total")
            .map_err(|e| TallyError::storage("Failed to read count", e))
    }

    async fn list_bucket(
        &self,
        task_id: TaskId,
        bucket: i32,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, bucket_number, resource_num, resource, state,
                   info_text, additional_info, result_resource, attempt,
                   recorded_at
            FROM notifications
            WHERE task_id = $1 AND bucket_number = $2
            ORDER BY resource_num
            "#,
        )
        .bind(task_id.get())
        .bind(bucket)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to list notifications", e))?;

        rows.iter().map(map_notification).collect()
    }
}

#[derive(Clone, Debug)]
pub struct PostgresProcessedRecordRepository {
    pool: PgPool,
}

impl PostgresProcessedRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedRecordStore for PostgresProcessedRecordRepository {
    async fn find(
        &self,
        task_id: TaskId,
        record_id: &str,
    ) -> Result<Option<ProcessedRecord>> {
        let row = sqlx::query(
            r#"
            SELECT task_id, record_id, bucket_number, attempt_number, state,
                   info_text, started_at
            FROM processed_records
            WHERE task_id = $1 AND record_id = $2
            "#,
        )
        .bind(task_id.get())
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to load processed record", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let read = |e: sqlx::Error| {
            TallyError::storage("Failed to read processed_records", e)
        };
        let state: String = row.try_get("state").map_err(read)?;

        Ok(Some(ProcessedRecord {
            task_id,
            record_id: row.try_get("record_id").map_err(read)?,
            bucket: row.try_get("bucket_number").map_err(read)?,
            attempt: row.try_get("attempt_number").map_err(read)?,
            state: state.parse()?,
            info_text: row.try_get("info_text").map_err(read)?,
            started_at: row.try_get("started_at").map_err(read)?,
        }))
    }

    async fn upsert(&self, record: &ProcessedRecord) -> Result<()> {
        super::batch::upsert_processed_record(&self.pool, record).await
    }
}

#[derive(Clone, Debug)]
pub struct PostgresTaskErrorRepository {
    pool: PgPool,
}

impl PostgresTaskErrorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskErrorStore for PostgresTaskErrorRepository {
    async fn list_error_types(&self, task_id: TaskId) -> Result<Vec<ErrorType>> {
        let rows = sqlx::query(
            r#"
            SELECT error_type, message, occurrences
            FROM task_errors
            WHERE task_id = $1
            ORDER BY occurrences DESC
            "#,
        )
        .bind(task_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to list error types", e))?;

        let read =
            |e: sqlx::Error| TallyError::storage("Failed to read task_errors", e);
        rows.iter()
            .map(|row| {
                Ok(ErrorType {
                    task_id,
                    error_type: row.try_get("error_type").map_err(read)?,
                    message: row.try_get("message").map_err(read)?,
                    count: row.try_get("occurrences").map_err(read)?,
                })
            })
            .collect()
    }

    async fn list_error_notifications(
        &self,
        task_id: TaskId,
        error_type: Uuid,
        limit: i64,
    ) -> Result<Vec<ErrorNotification>> {
        let rows = sqlx::query(
            r#"
            SELECT resource, message, additional_info
            FROM error_notifications
            WHERE task_id = $1 AND error_type = $2
            ORDER BY resource
            LIMIT $3
            "#,
        )
        .bind(task_id.get())
        .bind(error_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            TallyError::storage("Failed to list error notifications", e)
        })?;

        let read = |e: sqlx::Error| {
            TallyError::storage("Failed to read error_notifications", e)
        };
        rows.iter()
            .map(|row| {
                Ok(ErrorNotification {
                    task_id,
                    error_type,
                    resource: row.try_get("resource").map_err(read)?,
                    message: row.try_get("message").map_err(read)?,
                    additional_info: row
                        .try_get("additional_info")
                        .map_err(read)?,
                })
            })
            .collect()
    }
}
