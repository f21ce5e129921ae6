pub mod batch;
pub mod harvested;
pub mod notifications;
pub mod tasks;

pub use batch::{BatchExecutor, BatchReport, Mutation};
pub use harvested::HarvestedRecordStore;
pub use notifications::{NotificationStore, ProcessedRecordStore, TaskErrorStore};
pub use tasks::{DiagnosticStore, TaskInfoStore, TasksByStateStore};
