//! # tenant-schemas-db
//!
//! Database backends for tenant-schemas. Provides dedicated-connection pools,
//! schema context switching, and the applied-migration ledger.
//!
//! Supported backends:
//! - `PostgreSQL` (behind the `postgres` feature)
//! - In-memory (always available; used by tests and dry local runs)

pub mod base;
pub mod context;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgresql;

use std::sync::Arc;

use tenant_schemas_core::TenantError;

pub use base::{ConnectionPool, DatabaseConfig, DatabaseConnection, MIGRATIONS_TABLE};
pub use context::{ActivationHandle, SchemaContext};
pub use memory::{Activation, ExecutedStatement, InMemoryConnection, InMemoryPool};
#[cfg(feature = "postgres")]
pub use postgresql::{PostgresConnection, PostgresPool};

/// Builds a connection pool for the engine named in `config`.
///
/// # Errors
///
/// Returns a configuration error for unknown engines, or for `postgresql`
/// when the `postgres` feature is disabled.
pub fn create_pool(config: &DatabaseConfig) -> Result<Arc<dyn ConnectionPool>, TenantError> {
    match config.engine.as_str() {
        "memory" => Ok(Arc::new(InMemoryPool::new().with_max_size(config.pool_size))),
        #[cfg(feature = "postgres")]
        "postgresql" | "postgres" => Ok(Arc::new(PostgresPool::from_config(config)?)),
        other => Err(TenantError::ConfigurationError(format!(
            "unsupported database engine '{other}'"
        ))),
    }
}
