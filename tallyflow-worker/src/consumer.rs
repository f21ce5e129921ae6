use std::time::Duration;

use async_trait::async_trait;
use tallyflow_core::{
    Result, notification::EventOutcome, worker::NotificationWorker,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::queue::RedisEventQueue;

/// Source of raw event payloads; `None` means the poll timed out.
#[async_trait]
pub trait EventSource: Send {
    async fn next(&mut self) -> Result<Option<String>>;
}

#[async_trait]
impl EventSource for RedisEventQueue {
    async fn next(&mut self) -> Result<Option<String>> {
        RedisEventQueue::next(self).await
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeStats {
    pub recorded: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub lost: u64,
}

impl ConsumeStats {
    fn count(&mut self, outcome: &EventOutcome) {
        match outcome {
            EventOutcome::Recorded { .. } => self.recorded += 1,
            EventOutcome::Duplicate => self.duplicates += 1,
            EventOutcome::Rejected(_) => self.rejected += 1,
            EventOutcome::TaskDropped { .. } => self.dropped += 1,
            EventOutcome::Lost { .. } => self.lost += 1,
        }
    }
}

/// Feeds payloads to `worker` one at a time until `shutdown` turns true.
///
/// The flag is checked between polls and every poll returns within the
/// source's timeout, so a pop is never abandoned half way. A popped event is
/// always processed to completion.
pub async fn consume<S>(
    worker: &mut NotificationWorker,
    source: &mut S,
    idle_backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> ConsumeStats
where
    S: EventSource,
{
    let mut stats = ConsumeStats::default();

    while !*shutdown.borrow_and_update() {
        match source.next().await {
            Ok(Some(payload)) => {
                let outcome = worker.process_payload(&payload).await;
                match &outcome {
                    EventOutcome::Lost {
                        reason,
                        dead_lettered,
                    } => {
                        error!(%reason, dead_lettered, "notification event lost")
                    }
                    EventOutcome::Recorded {
                        completed: Some(state),
                    } => info!(%state, "task reached a final state"),
                    other => debug!(outcome = ?other, "event handled"),
                }
                stats.count(&outcome);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "polling the event queue failed");
                // Nothing is in flight here, so the wait may be cut short.
                tokio::select! {
                    _ = tokio::time::sleep(idle_backoff) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    info!(?stats, "Shutdown requested, leaving event loop");
    stats
}
