use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tallyflow_model::HarvestedRecord;
use uuid::Uuid;

use crate::error::Result;

/// Ledger of records seen by incremental harvesting.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HarvestedRecordStore: Send + Sync {
    async fn find(
        &self,
        provider_id: &str,
        dataset_id: &str,
        record_local_id: &str,
    ) -> Result<Option<HarvestedRecord>>;

    /// Writes the whole row, publication dates included.
    async fn upsert(&self, record: &HarvestedRecord) -> Result<()>;

    /// Moves the latest-harvest fields of an existing row forward.
    ///
    /// Never moves `latest_harvest_date` backwards and never touches the
    /// preview or published columns.
    async fn update_latest(
        &self,
        provider_id: &str,
        dataset_id: &str,
        record_local_id: &str,
        harvest_date: DateTime<Utc>,
        md5: Option<Uuid>,
    ) -> Result<()>;

    async fn list_bucket(
        &self,
        provider_id: &str,
        dataset_id: &str,
        bucket: i32,
    ) -> Result<Vec<HarvestedRecord>>;
}
