//! Running one migration target on one schema context.

use std::sync::Arc;

use tenant_schemas_core::TenantError;
use tenant_schemas_db::{ActivationHandle, SchemaContext};
use tokio::sync::Mutex;

use crate::config::ExecutorConfig;
use crate::framework::MigrationFramework;
use crate::outcome::{ExecutionOutcome, PlannedMigrations, SkipReason};
use crate::target::MigrationTarget;

/// Applies one [`MigrationTarget`] to an already-connected [`SchemaContext`].
///
/// The runner never returns an error: whatever goes wrong is captured in the
/// returned [`ExecutionOutcome`]. Clones share the framework and the gate.
#[derive(Clone)]
pub struct MigrationPlanRunner {
    framework: Arc<dyn MigrationFramework>,
    gate: Arc<Mutex<()>>,
    config: Arc<ExecutorConfig>,
}

impl MigrationPlanRunner {
    /// Creates a runner.
    ///
    /// `gate` serializes plan building across every runner that shares it.
    pub fn new(framework: Arc<dyn MigrationFramework>, gate: Arc<Mutex<()>>, config: Arc<ExecutorConfig>) -> Self {
        Self {
            framework,
            gate,
            config,
        }
    }

    /// The run configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Migrates `target` on `context`.
    ///
    /// The activation is released on every path. If the release itself fails
    /// the outcome is an infrastructure failure, since the connection is left
    /// in an unknown schema.
    pub async fn run(&self, context: &mut SchemaContext, target: &MigrationTarget) -> ExecutionOutcome {
        let mut handle = match context.activate(&target.schema).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "schema activation failed");
                return ExecutionOutcome::failure(&e);
            }
        };

        let result = self.run_activated(&mut handle, target).await;

        match (handle.release().await, result) {
            (Ok(()), Ok(outcome)) => outcome,
            (Ok(()), Err(e)) => {
                tracing::error!(error = %e, kind = %e.kind(), "migration failed");
                ExecutionOutcome::failure(&e)
            }
            (Err(release), result) => {
                let message = match result {
                    Ok(_) => format!("failed to restore schema after migrating: {release}"),
                    Err(e) => format!("failed to restore schema after error ({e}): {release}"),
                };
                tracing::error!(%message, "schema release failed");
                ExecutionOutcome::infrastructure(message)
            }
        }
    }

    async fn run_activated(
        &self,
        handle: &mut ActivationHandle<'_>,
        target: &MigrationTarget,
    ) -> Result<ExecutionOutcome, TenantError> {
        if !handle.connection().schema_exists(&target.schema).await? {
            return Err(TenantError::SchemaNotFound(target.schema.to_string()));
        }

        let plan = {
            let _gate = self.gate.lock().await;
            self.framework.build_plan(handle.connection(), target).await?
        };

        if self.config.plan {
            let description = plan.describe();
            tracing::info!(pending = plan.len(), "{description}");
            return Ok(ExecutionOutcome::Skipped(SkipReason::Plan(PlannedMigrations {
                description,
                pending: plan.len(),
            })));
        }

        if plan.is_empty() && !self.config.run_syncdb {
            tracing::info!("no migrations to apply");
        }
        let summary = self
            .framework
            .apply_plan(handle.connection(), &plan, &self.config)
            .await?;
        tracing::info!(
            applied = summary.applied.len(),
            faked = summary.faked.len(),
            unapplied = summary.unapplied.len(),
            "schema migrated"
        );
        Ok(ExecutionOutcome::Success(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::GraphMigrationFramework;
    use crate::migration::Migration;
    use crate::outcome::OutcomeKind;
    use tenant_schemas_core::{ErrorKind, SchemaName};
    use tenant_schemas_db::{ConnectionPool, InMemoryPool};

    fn framework() -> Arc<dyn MigrationFramework> {
        Arc::new(
            GraphMigrationFramework::new(vec![Migration::new("shop", "0001_initial")
                .initial()
                .forwards("CREATE TABLE shop_order (id int)")
                .creates_table("shop_order")])
            .unwrap(),
        )
    }

    fn runner(config: ExecutorConfig) -> MigrationPlanRunner {
        MigrationPlanRunner::new(framework(), Arc::new(Mutex::new(())), Arc::new(config))
    }

    fn target(schema: &str) -> MigrationTarget {
        MigrationTarget::new(SchemaName::parse(schema).unwrap())
    }

    async fn context(pool: &InMemoryPool) -> SchemaContext {
        SchemaContext::new(pool.acquire().await.unwrap(), SchemaName::parse("public").unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_releases_to_public() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let mut ctx = context(&pool).await;

        let outcome = runner(ExecutorConfig::default()).run(&mut ctx, &target("t1")).await;
        assert_eq!(outcome.kind(), OutcomeKind::Success);
        assert_eq!(ctx.active_schema().as_str(), "public");
        assert_eq!(pool.applied_in("t1").len(), 1);
    }

    #[tokio::test]
    async fn test_apply_failure_still_releases() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        pool.fail_statements_containing("shop_order");
        let mut ctx = context(&pool).await;

        let outcome = runner(ExecutorConfig::default()).run(&mut ctx, &target("t1")).await;
        match &outcome {
            ExecutionOutcome::Failure(detail) => {
                assert_eq!(detail.kind, ErrorKind::MigrationApply);
                assert!(detail.message.contains("shop.0001_initial"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(ctx.active_schema().as_str(), "public");
        assert!(!ctx.is_dirty());
        assert_eq!(pool.activations().last().unwrap().schema, "public");
    }

    #[tokio::test]
    async fn test_plan_mode_writes_nothing() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let mut ctx = context(&pool).await;
        let config = ExecutorConfig::builder().plan(true).build().unwrap();

        let outcome = runner(config).run(&mut ctx, &target("t1")).await;
        match outcome {
            ExecutionOutcome::Skipped(SkipReason::Plan(plan)) => {
                assert_eq!(plan.pending, 1);
                assert!(plan.description.contains("Apply shop.0001_initial"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(pool.statements().is_empty());
        assert!(pool.tables_in("t1").is_empty());
    }

    #[tokio::test]
    async fn test_activation_failure() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        pool.fail_activation_for("t1");
        let mut ctx = context(&pool).await;

        let outcome = runner(ExecutorConfig::default()).run(&mut ctx, &target("t1")).await;
        match outcome {
            ExecutionOutcome::Failure(detail) => assert_eq!(detail.kind, ErrorKind::SchemaActivation),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_schema_dropped_before_run() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let mut ctx = context(&pool).await;
        pool.drop_schema("t1");

        let outcome = runner(ExecutorConfig::default()).run(&mut ctx, &target("t1")).await;
        assert!(outcome.is_failure());
        assert!(!outcome.is_infrastructure_failure());
    }
}
