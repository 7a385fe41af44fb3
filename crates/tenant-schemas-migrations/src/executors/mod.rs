//! Migration executors.
//!
//! An executor takes an ordered [`TargetList`] and produces an
//! [`ExecutionReport`] with exactly one outcome per target, in caller order.
//! Two strategies are registered:
//!
//! - `sequential` (alias `standard`): one lane on the calling task.
//! - `parallel` (alias `multiprocessing`): a bounded number of lanes, each on
//!   its own task with its own pooled connection.
//!
//! Executors are looked up by codename through [`ExecutorSelector`]; an unknown
//! codename fails before any schema is touched.

mod lane;
mod parallel;
mod sequential;

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tenant_schemas_core::{SchemaName, TenantError, TenantResult};
use tenant_schemas_db::ConnectionPool;

use crate::config::ExecutorConfig;
use crate::framework::MigrationFramework;
use crate::report::ExecutionReport;
use crate::target::TargetList;

pub use lane::{LaneReport, LaneState};
pub use parallel::ParallelExecutor;
pub use sequential::SequentialExecutor;

/// The collaborators an executor works with.
#[derive(Clone)]
pub struct ExecutionEnv {
    /// Source of dedicated connections, one per lane.
    pub pool: Arc<dyn ConnectionPool>,
    /// Computes and applies migration plans.
    pub framework: Arc<dyn MigrationFramework>,
    /// The schema every connection falls back to between targets.
    pub public_schema: SchemaName,
}

impl ExecutionEnv {
    /// Creates an environment whose baseline schema is `public`.
    pub fn new(pool: Arc<dyn ConnectionPool>, framework: Arc<dyn MigrationFramework>) -> Self {
        Self {
            pool,
            framework,
            public_schema: SchemaName::public(),
        }
    }

    /// Overrides the baseline schema.
    #[must_use]
    pub fn with_public_schema(mut self, public_schema: SchemaName) -> Self {
        self.public_schema = public_schema;
        self
    }
}

/// Builds an executor for an environment.
pub type ExecutorFactory = fn(ExecutionEnv) -> Executor;

static REGISTRY: Lazy<BTreeMap<&'static str, ExecutorFactory>> = Lazy::new(|| {
    let mut registry: BTreeMap<&'static str, ExecutorFactory> = BTreeMap::new();
    registry.insert(SequentialExecutor::CODENAME, |env| {
        Executor::Sequential(SequentialExecutor::new(env))
    });
    registry.insert("standard", |env| Executor::Sequential(SequentialExecutor::new(env)));
    registry.insert(ParallelExecutor::CODENAME, |env| {
        Executor::Parallel(ParallelExecutor::new(env))
    });
    registry.insert("multiprocessing", |env| Executor::Parallel(ParallelExecutor::new(env)));
    registry
});

/// Resolves executor codenames.
pub struct ExecutorSelector;

impl ExecutorSelector {
    /// Returns the factory registered under `codename`.
    ///
    /// Lookup is case-insensitive and ignores surrounding whitespace.
    pub fn select(codename: &str) -> TenantResult<ExecutorFactory> {
        let key = codename.trim().to_ascii_lowercase();
        REGISTRY.get(key.as_str()).copied().ok_or_else(|| {
            tracing::error!(codename, "unknown executor");
            TenantError::UnknownExecutor {
                codename: codename.to_string(),
                available: Self::codenames().join(", "),
            }
        })
    }

    /// Every registered codename, aliases included, sorted.
    pub fn codenames() -> Vec<&'static str> {
        REGISTRY.keys().copied().collect()
    }

    /// Selects and builds an executor in one step.
    pub fn build(codename: &str, env: ExecutionEnv) -> TenantResult<Executor> {
        Self::select(codename).map(|factory| factory(env))
    }
}

/// A concrete execution strategy.
pub enum Executor {
    /// One target at a time.
    Sequential(SequentialExecutor),
    /// Bounded concurrency across lanes.
    Parallel(ParallelExecutor),
}

impl Executor {
    /// The canonical codename of this strategy.
    pub fn codename(&self) -> &'static str {
        match self {
            Self::Sequential(_) => SequentialExecutor::CODENAME,
            Self::Parallel(_) => ParallelExecutor::CODENAME,
        }
    }

    /// Migrates every target and returns one outcome per target, in order.
    ///
    /// Only configuration problems are returned as errors, and only before
    /// any schema has been touched. Per-target failures live in the report.
    pub async fn run_migrations(
        &self,
        targets: &TargetList,
        config: &Arc<ExecutorConfig>,
    ) -> TenantResult<ExecutionReport> {
        config.validate()?;
        match self {
            Self::Sequential(executor) => executor.run_migrations(targets, config).await,
            Self::Parallel(executor) => executor.run_migrations(targets, config).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::GraphMigrationFramework;
    use tenant_schemas_core::ErrorKind;
    use tenant_schemas_db::InMemoryPool;

    fn env() -> ExecutionEnv {
        ExecutionEnv::new(
            Arc::new(InMemoryPool::new()),
            Arc::new(GraphMigrationFramework::new(Vec::new()).unwrap()),
        )
    }

    #[test]
    fn test_registered_codenames() {
        assert_eq!(
            ExecutorSelector::codenames(),
            vec!["multiprocessing", "parallel", "sequential", "standard"]
        );
    }

    #[test]
    fn test_aliases_resolve_to_canonical_executor() {
        assert_eq!(ExecutorSelector::build("standard", env()).unwrap().codename(), "sequential");
        assert_eq!(
            ExecutorSelector::build(" Multiprocessing ", env()).unwrap().codename(),
            "parallel"
        );
    }

    #[test]
    fn test_unknown_codename() {
        let err = ExecutorSelector::select("celery").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let message = err.to_string();
        assert!(message.contains("celery"));
        assert!(message.contains("parallel, sequential"));
    }
}
