//! Decides, per harvested record, whether an incremental harvest has to
//! process it again, and keeps the harvested-record ledger current.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::Stream;
use tallyflow_model::HarvestedRecord;
use tracing::debug;
use uuid::Uuid;

use crate::{
    bucket::{BucketCount, bucket_for, page_cursor, scan_buckets},
    error::Result,
    retry::{RetryPolicy, Retryability, with_retry},
    storage::HarvestedRecordStore,
};

/// Slack added to OAI dateStamps; some repositories only report the day.
pub const DEFAULT_DATE_STAMP_SLACK_DAYS: i64 = 2;

pub const ALREADY_PROCESSED: &str = "ignored, already processed";

/// Inputs of one categorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizationParameters {
    pub full_harvest: bool,
    pub provider_id: String,
    pub dataset_id: String,
    pub record_id: String,
    pub record_date_stamp: Option<DateTime<Utc>>,
    pub record_md5: Option<Uuid>,
    pub current_harvest_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Categorization {
    Process,
    /// Already up to date; the record is reported with `notification`.
    Skip { notification: String },
}

impl Categorization {
    pub fn should_be_processed(&self) -> bool {
        matches!(self, Categorization::Process)
    }

    fn skip() -> Self {
        Categorization::Skip {
            notification: ALREADY_PROCESSED.to_string(),
        }
    }
}

/// Eligibility check of an incremental harvest against an existing ledger
/// row.
pub trait CategorizationRule: Send + Sync {
    fn is_changed(
        &self,
        params: &CategorizationParameters,
        record: &HarvestedRecord,
    ) -> bool;
}

/// OAI-PMH flavour, driven by the record's dateStamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateStampCategorization {
    pub slack: Duration,
}

impl Default for DateStampCategorization {
    fn default() -> Self {
        Self {
            slack: Duration::days(DEFAULT_DATE_STAMP_SLACK_DAYS),
        }
    }
}

impl CategorizationRule for DateStampCategorization {
    fn is_changed(
        &self,
        params: &CategorizationParameters,
        record: &HarvestedRecord,
    ) -> bool {
        let (Some(preview), Some(published), Some(date_stamp)) = (
            record.preview_harvest_date,
            record.published_harvest_date,
            params.record_date_stamp,
        ) else {
            return true;
        };

        let shifted = date_stamp + self.slack;
        shifted >= preview || shifted >= published
    }
}

/// HTTP archive flavour, driven by the record's content hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Md5Categorization;

impl CategorizationRule for Md5Categorization {
    fn is_changed(
        &self,
        params: &CategorizationParameters,
        record: &HarvestedRecord,
    ) -> bool {
        let (Some(preview), Some(published), Some(md5)) = (
            record.preview_harvest_md5,
            record.published_harvest_md5,
            params.record_md5,
        ) else {
            return true;
        };

        md5 != preview || md5 != published
    }
}

/// Categorization on top of the harvested-record ledger.
pub struct CategorizationService<R> {
    ledger: Arc<dyn HarvestedRecordStore>,
    rule: R,
    buckets: BucketCount,
    retry: RetryPolicy,
}

impl<R: std::fmt::Debug> std::fmt::Debug for CategorizationService<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategorizationService")
            .field("rule", &self.rule)
            .field("buckets", &self.buckets)
            .field("retry", &self.retry)
            .finish()
    }
}

impl<R: CategorizationRule> CategorizationService<R> {
    pub fn new(
        ledger: Arc<dyn HarvestedRecordStore>,
        rule: R,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            rule,
            buckets: BucketCount::HARVESTED_RECORDS,
            retry,
        }
    }

    pub fn with_buckets(mut self, buckets: BucketCount) -> Self {
        self.buckets = buckets;
        self
    }

    /// Records the sighting in the ledger and decides whether to process.
    ///
    /// The ledger is updated before deciding, so skipped records still carry
    /// their latest harvest date.
    pub async fn categorize(
        &self,
        params: &CategorizationParameters,
    ) -> Result<Categorization> {
        let ledger = &self.ledger;
        let existing = with_retry(
            self.retry,
            Retryability::Retryable,
            "find harvested record",
            || {
                ledger.find(
                    &params.provider_id,
                    &params.dataset_id,
                    &params.record_id,
                )
            },
        )
        .await?;

        let Some(mut record) = existing else {
            let record = HarvestedRecord {
                provider_id: params.provider_id.clone(),
                dataset_id: params.dataset_id.clone(),
                record_local_id: params.record_id.clone(),
                bucket: bucket_for(&params.record_id, self.buckets),
                latest_harvest_date: params.current_harvest_date,
                latest_harvest_md5: params.record_md5,
                preview_harvest_date: None,
                preview_harvest_md5: None,
                published_harvest_date: None,
                published_harvest_md5: None,
            };
            with_retry(
                self.retry,
                Retryability::Retryable,
                "insert harvested record",
                || ledger.upsert(&record),
            )
            .await?;
            debug!(record = %params.record_id, "new record, processing");
            return Ok(Categorization::Process);
        };

        with_retry(
            self.retry,
            Retryability::Retryable,
            "update harvested record",
            || {
                ledger.update_latest(
                    &params.provider_id,
                    &params.dataset_id,
                    &params.record_id,
                    params.current_harvest_date,
                    params.record_md5,
                )
            },
        )
        .await?;
        record.latest_harvest_date =
            record.latest_harvest_date.max(params.current_harvest_date);

        if params.full_harvest || self.rule.is_changed(params, &record) {
            Ok(Categorization::Process)
        } else {
            debug!(
                record = %params.record_id,
                "record unchanged since last publication"
            );
            Ok(Categorization::skip())
        }
    }

    /// Every ledger row of a dataset, bucket by bucket.
    pub fn list_dataset_records<'a>(
        &'a self,
        provider_id: &'a str,
        dataset_id: &'a str,
    ) -> impl Stream<Item = Result<HarvestedRecord>> + Send + 'a {
        let ledger = self.ledger.as_ref();
        scan_buckets(self.buckets, move |bucket| async move {
            ledger
                .list_bucket(provider_id, dataset_id, bucket)
                .await
                .map(page_cursor)
        })
    }
}
