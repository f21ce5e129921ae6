//! Storage ports and their adapters.

pub mod memory;
pub mod ports;
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres;

pub use memory::MemoryStore;
pub use ports::{
    BatchExecutor, BatchReport, DiagnosticStore, HarvestedRecordStore, Mutation,
    NotificationStore, ProcessedRecordStore, TaskErrorStore, TaskInfoStore,
    TasksByStateStore,
};

use std::{any::type_name_of_val, fmt, sync::Arc};

/// Every storage port a worker needs, behind shared handles.
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskInfoStore>,
    pub tasks_by_state: Arc<dyn TasksByStateStore>,
    pub diagnostics: Arc<dyn DiagnosticStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub processed: Arc<dyn ProcessedRecordStore>,
    pub errors: Arc<dyn TaskErrorStore>,
    pub harvested: Arc<dyn HarvestedRecordStore>,
    pub batch: Arc<dyn BatchExecutor>,
}

impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stores")
            .field("tasks", &type_name_of_val(self.tasks.as_ref()))
            .field(
                "tasks_by_state",
                &type_name_of_val(self.tasks_by_state.as_ref()),
            )
            .field("diagnostics", &type_name_of_val(self.diagnostics.as_ref()))
            .field(
                "notifications",
                &type_name_of_val(self.notifications.as_ref()),
            )
            .field("processed", &type_name_of_val(self.processed.as_ref()))
            .field("errors", &type_name_of_val(self.errors.as_ref()))
            .field("harvested", &type_name_of_val(self.harvested.as_ref()))
            .field("batch", &type_name_of_val(self.batch.as_ref()))
            .finish()
    }
}

impl Stores {
    pub fn from_memory(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            tasks: store.clone(),
            tasks_by_state: store.clone(),
            diagnostics: store.clone(),
            notifications: store.clone(),
            processed: store.clone(),
            errors: store.clone(),
            harvested: store.clone(),
            batch: store,
        }
    }

    #[cfg(feature = "postgres")]
    pub fn from_postgres(storage: &postgres::PostgresStorage) -> Self {
        Self {
            tasks: Arc::new(storage.task_info()),
            tasks_by_state: Arc::new(storage.tasks_by_state()),
            diagnostics: Arc::new(storage.diagnostics()),
            notifications: Arc::new(storage.notifications()),
            processed: Arc::new(storage.processed_records()),
            errors: Arc::new(storage.task_errors()),
            harvested: Arc::new(storage.harvested_records()),
            batch: Arc::new(storage.batch()),
        }
    }
}
