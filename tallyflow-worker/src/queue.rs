//! Redis lists carrying notification events.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::Serialize;
use tallyflow_core::{Result, TallyError, notification::DeadLetterSink};
use tallyflow_model::NotificationEvent;
use tracing::{debug, info};

/// Where a Redis URL points, without credentials or database index.
pub(crate) fn redis_endpoint(redis_url: &str) -> String {
    match url::Url::parse(redis_url) {
        Ok(url) => match url.host_str() {
            Some(host) => format!("{host}:{}", url.port().unwrap_or(6379)),
            None => url.path().to_string(),
        },
        Err(_) => "<unparseable url>".to_string(),
    }
}

pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    info!(endpoint = %redis_endpoint(redis_url), "Connecting to Redis");

    let client = redis::Client::open(redis_url)
        .map_err(|e| TallyError::storage("Failed to create Redis client", e))?;
    let conn = ConnectionManager::new(client)
        .await
        .map_err(|e| TallyError::storage("Failed to connect to Redis", e))?;

    info!("Successfully connected to Redis");
    Ok(conn)
}

/// Blocking consumer of the event list.
#[derive(Clone)]
pub struct RedisEventQueue {
    conn: ConnectionManager,
    key: String,
    timeout: Duration,
}

impl fmt::Debug for RedisEventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisEventQueue")
            .field("connection", &"ConnectionManager")
            .field("key", &self.key)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisEventQueue {
    pub fn new(conn: ConnectionManager, key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            conn,
            key: key.into(),
            timeout,
        }
    }

    /// Pops the oldest payload, waiting up to the poll timeout.
    ///
    /// Producers `LPUSH`, so `BRPOP` yields events in arrival order.
    pub async fn next(&mut self) -> Result<Option<String>> {
        let popped: Option<(String, String)> = self
            .conn
            .brpop(&self.key, self.timeout.as_secs_f64())
            .await
            .map_err(|e| TallyError::storage("Redis BRPOP failed", e))?;

        Ok(popped.map(|(_, payload)| payload))
    }
}

#[derive(Debug, Serialize)]
struct DeadLetter<'a> {
    event: &'a NotificationEvent,
    reason: &'a str,
}

pub(crate) fn dead_letter_payload(
    event: &NotificationEvent,
    reason: &str,
) -> Result<String> {
    Ok(serde_json::to_string(&DeadLetter { event, reason })?)
}

/// Parks events whose outcome could not be stored on a separate list.
#[derive(Clone)]
pub struct RedisDeadLetterSink {
    conn: ConnectionManager,
    key: String,
}

impl fmt::Debug for RedisDeadLetterSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisDeadLetterSink")
            .field("connection", &"ConnectionManager")
            .field("key", &self.key)
            .finish()
    }
}

impl RedisDeadLetterSink {
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }
}

#[async_trait]
impl DeadLetterSink for RedisDeadLetterSink {
    async fn push(&self, event: &NotificationEvent, reason: &str) -> Result<()> {
        let payload = dead_letter_payload(event, reason)?;
        debug!(key = %self.key, "Dead-lettering notification event");

        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(&self.key, payload)
            .await
            .map_err(|e| TallyError::storage("Redis LPUSH failed", e))?;
        Ok(())
    }
}
