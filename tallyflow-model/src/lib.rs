//! Core data model definitions shared across tallyflow crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod error;
pub mod ids;
pub mod notification;
pub mod record;
pub mod task;

pub use error::{ModelError, Result as ModelResult};
pub use ids::TaskId;
pub use notification::{
    ErrorNotification, ErrorType, Notification, NotificationEvent,
};
pub use record::{HarvestedRecord, ProcessedRecord, RecordState};
pub use task::{
    TaskByState, TaskCounters, TaskDiagnostics, TaskInfo, TaskState,
};
