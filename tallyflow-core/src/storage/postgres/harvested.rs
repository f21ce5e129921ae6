use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tallyflow_model::HarvestedRecord;
use uuid::Uuid;

use crate::{
    error::{Result, TallyError},
    storage::ports::HarvestedRecordStore,
};

#[derive(Clone, Debug)]
pub struct PostgresHarvestedRecordRepository {
    pool: PgPool,
}

impl PostgresHarvestedRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = r#"
    provider_id, dataset_id, record_local_id, bucket_number,
    latest_harvest_date, latest_harvest_md5,
    preview_harvest_date, preview_harvest_md5,
    published_harvest_date, published_harvest_md5
"#;

fn map_harvested_record(row: &PgRow) -> Result<HarvestedRecord> {
    let read = |e: sqlx::Error| {
        TallyError::storage("Failed to read harvested_records", e)
    };

    Ok(HarvestedRecord {
        provider_id: row.try_get("provider_id").map_err(read)?,
        dataset_id: row.try_get("dataset_id").map_err(read)?,
        record_local_id: row.try_get("record_local_id").map_err(read)?,
        bucket: row.try_get("bucket_number").map_err(read)?,
        latest_harvest_date: row.try_get("latest_harvest_date").map_err(read)?,
        latest_harvest_md5: row.try_get("latest_harvest_md5").map_err(read)?,
        preview_harvest_date: row
            .try_get("preview_harvest_date")
            .map_err(read)?,
        preview_harvest_md5: row.try_get("preview_harvest_md5").map_err(read)?,
        published_harvest_date: row
            .try_get("published_harvest_date")
            .map_err(read)?,
        published_harvest_md5: row
            .try_get("published_harvest_md5")
            .map_err(read)?,
    })
}

#[async_trait]
impl HarvestedRecordStore for PostgresHarvestedRecordRepository {
    async fn find(
        &self,
        provider_id: &str,
        dataset_id: &str,
        record_local_id: &str,
    ) -> Result<Option<HarvestedRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM harvested_records \
             WHERE provider_id = $1 AND dataset_id = $2 AND record_local_id = $3"
        );
        let row = sqlx::query(&sql)
            .bind(provider_id)
            .bind(dataset_id)
            .bind(record_local_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                TallyError::storage("Failed to load harvested record", e)
            })?;

        row.as_ref().map(map_harvested_record).transpose()
    }

    async fn upsert(&self, record: &HarvestedRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO harvested_records (
                provider_id, dataset_id, record_local_id, bucket_number,
                latest_harvest_date, latest_harvest_md5,
                preview_harvest_date, preview_harvest_md5,
                published_harvest_date, published_harvest_md5
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (provider_id, dataset_id, record_local_id) DO UPDATE SET
                bucket_number = EXCLUDED.bucket_number,
                latest_harvest_date = GREATEST(
                    harvested_records.latest_harvest_date,
                    EXCLUDED.latest_harvest_date
                ),
                latest_harvest_md5 = EXCLUDED.latest_harvest_md5,
                preview_harvest_date = EXCLUDED.preview_harvest_date,
                preview_harvest_md5 = EXCLUDED.preview_harvest_md5,
                published_harvest_date = EXCLUDED.published_harvest_date,
                published_harvest_md5 = EXCLUDED.published_harvest_md5
            "#,
        )
        .bind(&record.provider_id)
        .bind(&record.dataset_id)
        .bind(&record.record_local_id)
        .bind(record.bucket)
        .bind(record.latest_harvest_date)
        .bind(record.latest_harvest_md5)
        .bind(record.preview_harvest_date)
        .bind(record.preview_harvest_md5)
        .bind(record.published_harvest_date)
        .bind(record.published_harvest_md5)
        .execute(&self.pool)
        .await
        .map_err(|e| TallyError::storage("Failed to upsert harvested record", e))?;

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
        let result = sqlx::query(
            r#"
            UPDATE harvested_records SET
                latest_harvest_date = GREATEST(latest_harvest_date, $4),
                latest_harvest_md5 = COALESCE($5, latest_harvest_md5)
            WHERE provider_id = $1 AND dataset_id = $2 AND record_local_id = $3
            "#,
        )
        .bind(provider_id)
        .bind(dataset_id)
        .bind(record_local_id)
        .bind(harvest_date)
        .bind(md5)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            TallyError::storage("Failed to update latest harvest date", e)
        })?;

        if result.rows_affected() == 0 {
            return Err(TallyError::NotFound(format!(
                "harvested record {provider_id}/{dataset_id}/{record_local_id}"
            )));
        }
        Ok(())
    }

    async fn list_bucket(
        &self,
        provider_id: &str,
        dataset_id: &str,
        bucket: i32,
    ) -> Result<Vec<HarvestedRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM harvested_records \
             WHERE provider_id = $1 AND dataset_id = $2 AND bucket_number = $3 \
             ORDER BY record_local_id"
        );
        let rows = sqlx::query(&sql)
            .bind(provider_id)
            .bind(dataset_id)
            .bind(bucket)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                TallyError::storage("Failed to list harvested records", e)
            })?;

        rows.iter().map(map_harvested_record).collect()
    }
}
