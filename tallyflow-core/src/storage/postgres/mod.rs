//! Postgres adapters for the storage ports.

mod batch;
mod harvested;
mod notifications;
mod tasks;

pub use batch::PostgresBatchExecutor;
pub use harvested::PostgresHarvestedRecordRepository;
pub use notifications::{
    PostgresNotificationRepository, PostgresProcessedRecordRepository,
    PostgresTaskErrorRepository,
};
pub use tasks::{
    PostgresDiagnosticRepository, PostgresTaskInfoRepository,
    PostgresTasksByStateRepository,
};

use std::fmt;

use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

use crate::error::{Result, TallyError};

/// Shared connection pool plus one repository per table family.
///
/// The pool is created once per process and cloned into every repository.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    max_connections: u32,
    min_connections: u32,
}

impl fmt::Debug for PostgresStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStorage")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .finish()
    }
}

impl PostgresStorage {
    pub async fn connect(
        connection_string: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        info!(
            max_connections,
            min_connections, "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect(connection_string)
            .await
            .map_err(|e| TallyError::storage("Failed to connect", e))?;

        Ok(Self {
            pool,
            max_connections,
            min_connections,
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            max_connections: 0,
            min_connections: 0,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the embedded schema.
    pub async fn initialize_schema(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await.map_err(|e| {
            TallyError::Internal(format!("Migration failed: {}", e))
        })?;
        Ok(())
    }

    pub fn task_info(&self) -> PostgresTaskInfoRepository {
        PostgresTaskInfoRepository::new(self.pool.clone())
    }

    pub fn tasks_by_state(&self) -> PostgresTasksByStateRepository {
        PostgresTasksByStateRepository::new(self.pool.clone())
    }

    pub fn diagnostics(&self) -> PostgresDiagnosticRepository {
        PostgresDiagnosticRepository::new(self.pool.clone())
    }

    pub fn notifications(&self) -> PostgresNotificationRepository {
        PostgresNotificationRepository::new(self.pool.clone())
    }

    pub fn processed_records(&self) -> PostgresProcessedRecordRepository {
        PostgresProcessedRecordRepository::new(self.pool.clone())
    }

    pub fn task_errors(&self) -> PostgresTaskErrorRepository {
        PostgresTaskErrorRepository::new(self.pool.clone())
    }

    pub fn harvested_records(&self) -> PostgresHarvestedRecordRepository {
        PostgresHarvestedRecordRepository::new(self.pool.clone())
    }

    pub fn batch(&self) -> PostgresBatchExecutor {
        PostgresBatchExecutor::new(self.pool.clone())
    }
}
