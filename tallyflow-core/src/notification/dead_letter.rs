use async_trait::async_trait;
use tallyflow_model::NotificationEvent;

use crate::error::Result;

/// Last resort for events whose outcome could not be stored at all.
///
/// Only consulted after both the event batch and the fallback that drops the
/// task have failed.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn push(&self, event: &NotificationEvent, reason: &str) -> Result<()>;
}
