//! # tenant-schemas
//!
//! Schema-per-tenant migrations for Rust.
//!
//! This is the meta-crate that re-exports all sub-crates for convenient access.
//! You can depend on `tenant-schemas` to get everything, or depend on
//! individual crates for finer-grained control.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tenant_schemas::prelude::*;
//!
//! # async fn demo() -> Result<(), TenantError> {
//! let pool = Arc::new(InMemoryPool::with_schemas(["public", "acme"]));
//! let framework = Arc::new(GraphMigrationFramework::new(vec![
//!     Migration::new("shop", "0001_initial").forwards("CREATE TABLE shop_order (id int)"),
//! ])?);
//! let executor = ExecutorSelector::build("sequential", ExecutionEnv::new(pool, framework))?;
//! let targets = TargetList::for_schemas([SchemaName::parse("acme")?], None, None)?;
//! let report = executor
//!     .run_migrations(&targets, &Arc::new(ExecutorConfig::default()))
//!     .await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

/// Core types, settings, logging, and error types.
pub use tenant_schemas_core as core;

/// Connection pools and schema switching: `PostgreSQL` and in-memory.
pub use tenant_schemas_db as db;

/// Migration engine, executors, and reports.
pub use tenant_schemas_migrations as migrations;

/// Management commands (CLI).
#[cfg(feature = "cli")]
pub use tenant_schemas_cli as cli;

/// The types most programs need.
pub mod prelude {
    pub use tenant_schemas_core::{SchemaName, Settings, TenantError, TenantResult};
    pub use tenant_schemas_db::{create_pool, ConnectionPool, DatabaseConfig, InMemoryPool};
    pub use tenant_schemas_migrations::{
        ExecutionEnv, ExecutionOutcome, ExecutionReport, Executor, ExecutorConfig,
        ExecutorSelector, GraphMigrationFramework, Migration, MigrationFramework,
        MigrationLoader, TargetList,
    };

    #[cfg(feature = "cli")]
    pub use tenant_schemas_cli::{MigrateSchemasCommand, StaticTenantResolver, TenantResolver};
}
