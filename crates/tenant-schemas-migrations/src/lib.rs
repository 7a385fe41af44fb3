//! # tenant-schemas-migrations
//!
//! Migration engine for schema-per-tenant databases. Applies registered
//! migrations to many schemas that share one connection pool, sequentially or
//! across concurrent lanes, and reports one outcome per schema.
//!
//! ## Architecture
//!
//! - [`Migration`] is a named set of SQL statements belonging to an app.
//! - [`MigrationGraph`] resolves dependency ordering across apps.
//! - [`MigrationRecorder`] tracks applied migrations inside each schema.
//! - [`MigrationFramework`] builds and applies plans; [`GraphMigrationFramework`]
//!   is the graph-backed implementation.
//! - [`MigrationPlanRunner`] migrates one target on one [`SchemaContext`](tenant_schemas_db::SchemaContext).
//! - [`Executor`]s, chosen by codename through [`ExecutorSelector`], run a
//!   [`TargetList`] and return an [`ExecutionReport`].
//!
//! ## Module Overview
//!
//! - [`migration`] - `Migration`, `MigrationGraph`
//! - [`loader`] - `MigrationLoader` for JSON migration files on disk
//! - [`recorder`] - `MigrationRecorder`
//! - [`plan`] - `MigrationPlan`, `MigrationStep`, `make_plan`
//! - [`framework`] - `MigrationFramework`, `GraphMigrationFramework`
//! - [`target`] - `MigrationTarget`, `TargetList`
//! - [`config`] - `ExecutorConfig`
//! - [`outcome`] - `ExecutionOutcome` and its payloads
//! - [`runner`] - `MigrationPlanRunner`
//! - [`executors`] - `ExecutorSelector`, `Executor`, sequential and parallel executors
//! - [`report`] - `ExecutionReport`, `ReportBuilder`
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tenant_schemas_core::SchemaName;
//! use tenant_schemas_db::InMemoryPool;
//! use tenant_schemas_migrations::{
//!     ExecutionEnv, ExecutorConfig, ExecutorSelector, GraphMigrationFramework, Migration,
//!     TargetList,
//! };
//!
//! # async fn demo() -> Result<(), tenant_schemas_core::TenantError> {
//! let pool = Arc::new(InMemoryPool::with_schemas(["public", "tenant_a", "tenant_b"]));
//! let framework = Arc::new(GraphMigrationFramework::new(vec![
//!     Migration::new("shop", "0001_initial").forwards("CREATE TABLE shop_order (id int)"),
//! ])?);
//!
//! let executor = ExecutorSelector::build("parallel", ExecutionEnv::new(pool, framework))?;
//! let targets = TargetList::for_schemas(
//!     [SchemaName::parse("tenant_a")?, SchemaName::parse("tenant_b")?],
//!     None,
//!     None,
//! )?;
//! let config = Arc::new(ExecutorConfig::builder().concurrency_width(2).build()?);
//! let report = executor.run_migrations(&targets, &config).await?;
//! println!("{}", report.render_text());
//! # Ok(())
//! # }
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod executors;
pub mod framework;
pub mod loader;
pub mod migration;
pub mod outcome;
pub mod plan;
pub mod recorder;
pub mod report;
pub mod runner;
pub mod target;

pub use config::{ExecutorConfig, ExecutorConfigBuilder, DEFAULT_MAX_WIDTH};
pub use executors::{
    ExecutionEnv, Executor, ExecutorFactory, ExecutorSelector, LaneReport, LaneState,
    ParallelExecutor, SequentialExecutor,
};
pub use framework::{GraphMigrationFramework, MigrationFramework};
pub use loader::MigrationLoader;
pub use migration::{Migration, MigrationGraph, MigrationKey};
pub use outcome::{
    AppliedSummary, ExecutionOutcome, FailureDetail, OutcomeKind, PlannedMigrations, SkipReason,
};
pub use plan::{make_plan, MigrationPlan, MigrationStep, PlanTarget};
pub use recorder::MigrationRecorder;
pub use report::{ExecutionReport, OutcomeCounts, ReportBuilder, ReportEntry};
pub use runner::MigrationPlanRunner;
pub use target::{MigrationTarget, TargetList};
