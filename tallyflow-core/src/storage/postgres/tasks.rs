use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tallyflow_model::{
    TaskByState, TaskCounters, TaskDiagnostics, TaskId, TaskInfo, TaskState,
};

use crate::{
    error::{Result, TallyError},
    storage::ports::{DiagnosticStore, TaskInfoStore, TasksByStateStore},
};

#[derive(Clone, Debug)]
pub struct PostgresTaskInfoRepository {
    pool: PgPool,
}

impl PostgresTaskInfoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(super) fn map_task_info(row: &PgRow) -> Result<TaskInfo> {
    let read = |e: sqlx::Error| TallyError::storage("Failed to read task_info", e);
    let state: String = row.try_get("state").map_err(read)?;

    Ok(TaskInfo {
        id: TaskId(row.try_get("id").map_err(read)?),
        topology_name: row.try_get("topology_name").map_err(read)?,
        state: state.parse()?,
        state_description: row.try_get("state_description").map_err(read)?,
        expected_size: row.try_get("expected_size").map_err(read)?,
        counters: TaskCounters {
            processed: row.try_get("processed_count").map_err(read)?,
            ignored: row.try_get("ignored_count").map_err(read)?,
            deleted: row.try_get("deleted_count").map_err(read)?,
            processed_errors: row
                .try_get("processed_errors_count")
                .map_err(read)?,
            deleted_errors: row.try_get("deleted_errors_count").map_err(read)?,
        },
        owner_id: row.try_get("owner_id").map_err(read)?,
        topic_name: row.try_get("topic_name").map_err(read)?,
        incremental: row.try_get("incremental").map_err(read)?,
        sent_at: row.try_get("sent_at").map_err(read)?,
        started_at: row.try_get("started_at").map_err(read)?,
        finished_at: row.try_get("finished_at").map_err(read)?,
    })
}

#[async_trait]
impl TaskInfoStore for PostgresTaskInfoRepository {
    async fn find(&self, task_id: TaskId) -> Result<Option<TaskInfo>> {
        let row = sqlx::query(
            r#"
            SELECT id, topology_name, state, state_description, expected_size,
                   processed_count, ignored_count, deleted_count,
                   processed_errors_count, deleted_errors_count,
                   owner_id, topic_name, incremental,
                   sent_at, started_at, finished_at
            FROM task_info
            WHERE id = $1
            "#,
        )
        .bind(task_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to load task", e))?;

        row.as_ref().map(map_task_info).transpose()
    }

    async fn insert(&self, info: &TaskInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_info (
                id, topology_name, state, state_description, expected_size,
                processed_count, ignored_count, deleted_count,
                processed_errors_count, deleted_errors_count,
                owner_id, topic_name, incremental,
                sent_at, started_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                topology_name = EXCLUDED.topology_name,
                state = EXCLUDED.state,
                state_description = EXCLUDED.state_description,
                expected_size = EXCLUDED.expected_size,
                owner_id = EXCLUDED.owner_id,
                topic_name = EXCLUDED.topic_name,
                incremental = EXCLUDED.incremental,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(info.id.get())
        .bind(&info.topology_name)
        .bind(info.state.as_str())
        .bind(&info.state_description)
        .bind(info.expected_size)
        .bind(info.counters.processed)
        .bind(info.counters.ignored)
        .bind(info.counters.deleted)
        .bind(info.counters.processed_errors)
        .bind(info.counters.deleted_errors)
        .bind(&info.owner_id)
        .bind(&info.topic_name)
        .bind(info.incremental)
        .bind(info.sent_at)
        .bind(info.started_at)
        .bind(info.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to insert task", e))?;

        Ok(())
    }

    async fn update_state(
        &self,
        task_id: TaskId,
        state: TaskState,
        description: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE task_info SET state = $2, state_description = $3 WHERE id = $1",
        )
        .bind(task_id.get())
        .bind(state.as_str())
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to update task state", e))?;

        if result.rows_affected() == 0 {
            return Err(TallyError::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }

    async fn set_expected_size(
        &self,
        task_id: TaskId,
        expected_size: i64,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE task_info SET expected_size = $2 WHERE id = $1")
                .bind(task_id.get())
                .bind(expected_size)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    TallyError::storage("Failed to set expected size", e)
                })?;

        if result.rows_affected() == 0 {
            return Err(TallyError::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PostgresTasksByStateRepository {
    pool: PgPool,
}

impl PostgresTasksByStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_task_by_state(row: &PgRow) -> Result<TaskByState> {
    let read =
        |e: sqlx::Error| TallyError::storage("Failed to read tasks_by_state", e);
    let state: String = row.try_get("state").map_err(read)?;

    Ok(TaskByState {
        state: state.parse()?,
        topology_name: row.try_get("topology_name").map_err(read)?,
        task_id: TaskId(row.try_get("task_id").map_err(read)?),
        owner_id: row.try_get("owner_id").map_err(read)?,
        topic_name: row.try_get("topic_name").map_err(read)?,
        started_at: row.try_get("started_at").map_err(read)?,
    })
}

#[async_trait]
impl TasksByStateStore for PostgresTasksByStateRepository {
    async fn list(
        &self,
        topology_name: &str,
        states: &[TaskState],
    ) -> Result<Vec<TaskByState>> {
        let states: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query(
            r#"
            SELECT state, topology_name, task_id, owner_id, topic_name, started_at
            FROM tasks_by_state
            WHERE topology_name = $1 AND state = ANY($2)
            ORDER BY task_id
            "#,
        )
        .bind(topology_name)
        .bind(&states)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to list tasks by state", e))?;

        rows.iter().map(map_task_by_state).collect()
    }

    async fn upsert(&self, entry: &TaskByState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks_by_state (
                state, topology_name, task_id, owner_id, topic_name, started_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (state, topology_name, task_id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                topic_name = EXCLUDED.topic_name,
                started_at = EXCLUDED.started_at
            "#,
        )
        .bind(entry.state.as_str())
        .bind(&entry.topology_name)
        .bind(entry.task_id.get())
        .bind(&entry.owner_id)
        .bind(&entry.topic_name)
        .bind(entry.started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to upsert task index", e))?;

        Ok(())
    }

    async fn delete(
        &self,
        state: TaskState,
        topology_name: &str,
        task_id: TaskId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM tasks_by_state
            WHERE state = $1 AND topology_name = $2 AND task_id = $3
            "#,
        )
        .bind(state.as_str())
        .bind(topology_name)
        .bind(task_id.get())
        .execute(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to delete task index", e))?;

        Ok(())
    }

    async fn replace(
        &self,
        stale: &TaskByState,
        corrected: &TaskByState,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TallyError::storage("Failed to begin transaction", e))?;

        sqlx::query(
            r#"
            DELETE FROM tasks_by_state
            WHERE state = $1 AND topology_name = $2 AND task_id = $3
            "#,
        )
        .bind(stale.state.as_str())
        .bind(&stale.topology_name)
        .bind(stale.task_id.get())
        .execute(&mut *tx)
        .await
        .map_err(|e| TallyError::storage("Failed to delete task index", e))?;

        sqlx::query(
            r#"
            INSERT INTO tasks_by_state (
                state, topology_name, task_id, owner_id, topic_name, started_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (state, topology_name, task_id) DO NOTHING
            "#,
        )
        .bind(corrected.state.as_str())
        .bind(&corrected.topology_name)
        .bind(corrected.task_id.get())
        .bind(&corrected.owner_id)
        .bind(&corrected.topic_name)
        .bind(corrected.started_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| TallyError::storage("Failed to insert task index", e))?;

        tx.commit()
            .await
            .map_err(|e| TallyError::storage("Failed to commit transaction", e))
    }
}

#[derive(Clone, Debug)]
pub struct PostgresDiagnosticRepository {
    pool: PgPool,
}

impl PostgresDiagnosticRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DiagnosticStore for PostgresDiagnosticRepository {
    async fn find(&self, task_id: TaskId) -> Result<Option<TaskDiagnostics>> {
        let row = sqlx::query(
            r#"
            SELECT task_id, last_record_finished_at, records_retry_count, finished_at
            FROM task_diagnostic_info
            WHERE task_id = $1
            "#,
        )
        .bind(task_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to load diagnostics", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let read = |e: sqlx::Error| {
            TallyError::storage("Failed to read task_diagnostic_info", e)
        };

        Ok(Some(TaskDiagnostics {
            task_id,
            last_record_finished_at: row
                .try_get("last_record_finished_at")
                .map_err(read)?,
            records_retry_count: row.try_get("records_retry_count").map_err(read)?,
            finished_at: row.try_get("finished_at").map_err(read)?,
        }))
    }
}
