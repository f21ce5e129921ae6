//! Aggregation of per-record outcome events into task state.

pub mod dead_letter;
pub mod engine;
pub mod event;
pub mod post_processing;
pub mod report;
pub mod snapshot;

pub use dead_letter::DeadLetterSink;
pub use engine::{EngineConfig, EventOutcome, NotificationEngine};
pub use event::RecordOutcome;
pub use post_processing::{PostProcessingRegistry, PostProcessor};
pub use report::{ErrorReport, count_notifications, error_report, task_notifications};
pub use snapshot::{TaskSnapshot, apply_outcome, error_type_id};
