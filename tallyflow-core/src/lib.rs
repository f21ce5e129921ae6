//! # Tallyflow Core
//!
//! Task-progress aggregation for record-processing pipelines.
//!
//! ## Overview
//!
//! A task fans out into many records that are processed independently and
//! report their outcome as notification events. `tallyflow-core` turns those
//! events into per-task counters, error summaries and state transitions:
//!
//! - **Aggregation**: [`notification::NotificationEngine`] applies one event at
//!   a time, idempotently, and completes the task once every expected record
//!   has been seen
//! - **Reconciliation**: [`reconcile::synchronize`] repairs the per-topic task
//!   index from the authoritative task records
//! - **Categorization**: [`categorize::CategorizationService`] decides which
//!   records an incremental harvest has to process again
//! - **Harvesting**: [`harvest`] enumerates identifiers with retries and a
//!   cooperative kill switch
//! - **Storage**: async ports with a Postgres adapter and an in-memory one
//!
//! ## Feature Flags
//!
//! - `postgres` (default): sqlx-backed storage adapters and [`MIGRATOR`]
//!
//! ## Examples
//!
//! ```no_run
//! use tallyflow_core::{
//!     notification::{EngineConfig, NotificationEngine},
//!     storage::{MemoryStore, Stores},
//! };
//! use tallyflow_model::{NotificationEvent, RecordState, TaskId};
//!
//! async fn record_one(store: MemoryStore) {
//!     let mut engine =
//!         NotificationEngine::new(Stores::from_memory(store), EngineConfig::default());
//!     let event = NotificationEvent {
//!         task_id: Some(TaskId(1)),
//!         resource_id: Some("record-1".into()),
//!         state: Some(RecordState::Success),
//!         ..NotificationEvent::default()
//!     };
//!     let outcome = engine.handle(&event).await;
//!     println!("{outcome:?}");
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Stable record bucketing and bucket scans
pub mod bucket;

/// Bounded least-recently-used cache
pub mod cache;

/// Per-record harvest categorization backed by the harvested-record ledger
pub mod categorize;

/// Error types and error handling utilities
pub mod error;

/// Identifier harvesting with cooperative cancellation
pub mod harvest;

/// Notification aggregation engine
pub mod notification;

/// Repair of the per-topic task index
pub mod reconcile;

/// Bounded retries with fixed backoff
pub mod retry;

/// Storage ports and adapters
pub mod storage;

/// Per-event worker entry point
pub mod worker;

#[cfg(feature = "postgres")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use error::{Result, TallyError};
