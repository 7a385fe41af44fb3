//! The migration framework interface and its graph-based implementation.
//!
//! The executors only talk to a [`MigrationFramework`]: it builds a plan for
//! the schema active on a connection and applies that plan. Plan building
//! reads framework-wide loader state that is not safe for concurrent use, so
//! callers must serialize [`MigrationFramework::build_plan`] themselves; the
//! executors do this with their global-state gate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tenant_schemas_core::TenantError;
use tenant_schemas_db::DatabaseConnection;

use crate::config::ExecutorConfig;
use crate::migration::{display_key, Migration, MigrationGraph, MigrationKey};
use crate::outcome::AppliedSummary;
use crate::plan::{make_plan, MigrationPlan};
use crate::recorder::MigrationRecorder;
use crate::target::MigrationTarget;

/// Plans and applies migrations on the connection's active schema.
#[async_trait::async_trait]
pub trait MigrationFramework: Send + Sync {
    /// Builds the plan for `target` against the active schema.
    ///
    /// Must not write anything. Not safe to call concurrently.
    async fn build_plan(
        &self,
        connection: &mut dyn DatabaseConnection,
        target: &MigrationTarget,
    ) -> Result<MigrationPlan, TenantError>;

    /// Applies a plan built by [`build_plan`](Self::build_plan) to the active schema.
    async fn apply_plan(
        &self,
        connection: &mut dyn DatabaseConnection,
        plan: &MigrationPlan,
        config: &ExecutorConfig,
    ) -> Result<AppliedSummary, TenantError>;
}

/// Loader state shared by every plan build.
#[derive(Debug, Default)]
struct LoaderState {
    schema: Option<String>,
    recorder: MigrationRecorder,
}

/// A [`MigrationFramework`] backed by migrations registered in code.
///
/// # Examples
///
/// ```
/// use tenant_schemas_migrations::{GraphMigrationFramework, Migration};
///
/// let framework = GraphMigrationFramework::new(vec![
///     Migration::new("shop", "0001_initial")
///         .initial()
///         .forwards("CREATE TABLE shop_order (id BIGSERIAL PRIMARY KEY)")
///         .backwards("DROP TABLE shop_order")
///         .creates_table("shop_order"),
/// ])
/// .unwrap();
/// assert_eq!(framework.graph().len(), 1);
/// ```
pub struct GraphMigrationFramework {
    migrations: HashMap<MigrationKey, Migration>,
    graph: MigrationGraph,
    syncdb: Vec<String>,
    loader: Mutex<LoaderState>,
    builds_in_flight: AtomicUsize,
    peak_builds: AtomicUsize,
}

/// Tracks one plan build; concurrent builds are rejected.
struct BuildGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> BuildGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, peak: &AtomicUsize) -> Result<Self, TenantError> {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        let guard = Self { in_flight };
        if now > 1 {
            return Err(TenantError::MigrationApply(
                "migration loader state accessed concurrently".to_string(),
            ));
        }
        Ok(guard)
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GraphMigrationFramework {
    /// Registers `migrations` and builds their graph.
    pub fn new(migrations: Vec<Migration>) -> Result<Self, TenantError> {
        let graph = MigrationGraph::from_migrations(&migrations)?;
        let mut registry = HashMap::with_capacity(migrations.len());
        for migration in migrations {
            let key = migration.key();
            if registry.insert(key.clone(), migration).is_some() {
                return Err(TenantError::MigrationApply(format!(
                    "migration {} is registered twice",
                    display_key(&key)
                )));
            }
        }
        Ok(Self {
            migrations: registry,
            graph,
            syncdb: Vec::new(),
            loader: Mutex::new(LoaderState::default()),
            builds_in_flight: AtomicUsize::new(0),
            peak_builds: AtomicUsize::new(0),
        })
    }

    /// Registers statements creating tables of apps without migrations.
    ///
    /// They run before the plan when `run_syncdb` is set.
    #[must_use]
    pub fn with_syncdb<I, S>(mut self, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.syncdb.extend(statements.into_iter().map(Into::into));
        self
    }

    /// The migration graph.
    pub fn graph(&self) -> &MigrationGraph {
        &self.graph
    }

    /// Highest number of plan builds that overlapped.
    pub fn peak_concurrent_builds(&self) -> usize {
        self.peak_builds.load(Ordering::SeqCst)
    }

    fn migration(&self, key: &MigrationKey) -> Result<&Migration, TenantError> {
        self.migrations.get(key).ok_or_else(|| {
            TenantError::MigrationApply(format!("migration {} is not registered", display_key(key)))
        })
    }

    async fn should_fake_initial(
        &self,
        connection: &mut dyn DatabaseConnection,
        migration: &Migration,
    ) -> Result<bool, TenantError> {
        if !migration.initial || migration.creates_tables.is_empty() {
            return Ok(false);
        }
        for table in &migration.creates_tables {
            if !connection.table_exists(table).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn run_statements(
        connection: &mut dyn DatabaseConnection,
        migration: &Migration,
        statements: &[String],
    ) -> Result<(), TenantError> {
        for sql in statements {
            connection.execute(sql).await.map_err(|e| {
                if e.is_infrastructure() {
                    e
                } else {
                    TenantError::MigrationApply(format!("{migration}: {e}"))
                }
            })?;
        }
        Ok(())
    }

    /// Runs one step, inside a transaction when the migration is atomic.
    async fn run_step(
        &self,
        connection: &mut dyn DatabaseConnection,
        recorder: &mut MigrationRecorder,
        migration: &Migration,
        backwards: bool,
    ) -> Result<(), TenantError> {
        if migration.atomic {
            connection.begin().await?;
        }

        let key = migration.key();
        let result = if backwards {
            match Self::run_statements(connection, migration, &migration.backwards).await {
                Ok(()) => recorder.record_unapplied(connection, &key).await,
                Err(e) => Err(e),
            }
        } else {
            match Self::run_statements(connection, migration, &migration.forwards).await {
                Ok(()) => recorder.record_applied(connection, &key).await,
                Err(e) => Err(e),
            }
        };

        if !migration.atomic {
            return result;
        }
        match result {
            Ok(()) => connection.commit().await,
            Err(e) => {
                if let Err(rollback) = connection.rollback().await {
                    tracing::warn!(migration = %migration, error = %rollback, "rollback failed");
                }
                if backwards {
                    recorder.apply(key);
                } else {
                    recorder.unapply(&key);
                }
                Err(e)
            }
        }
    }
}

#[async_trait::async_trait]
impl MigrationFramework for GraphMigrationFramework {
    async fn build_plan(
        &self,
        connection: &mut dyn DatabaseConnection,
        target: &MigrationTarget,
    ) -> Result<MigrationPlan, TenantError> {
        let _guard = BuildGuard::enter(&self.builds_in_flight, &self.peak_builds)?;
        let plan_target = target.plan_target()?;

        let recorder = MigrationRecorder::load(connection).await?;
        let mut loader = self.loader.lock().unwrap_or_else(PoisonError::into_inner);
        loader.schema = Some(target.schema.to_string());
        loader.recorder = recorder;

        let plan = make_plan(&self.graph, loader.recorder.applied(), &plan_target)?;
        tracing::debug!(
            schema = loader.schema.as_deref().unwrap_or_default(),
            steps = plan.len(),
            "built migration plan"
        );
        Ok(plan)
    }

    async fn apply_plan(
        &self,
        connection: &mut dyn DatabaseConnection,
        plan: &MigrationPlan,
        config: &ExecutorConfig,
    ) -> Result<AppliedSummary, TenantError> {
        let mut recorder = MigrationRecorder::load(connection).await?;
        recorder.ensure_table(connection).await?;
        let mut summary = AppliedSummary::default();

        if config.run_syncdb && !self.syncdb.is_empty() {
            tracing::info!(statements = self.syncdb.len(), "synchronizing unmigrated apps");
            for sql in &self.syncdb {
                connection.execute(sql).await?;
            }
            summary.synced = true;
        }

        for step in &plan.steps {
            let migration = self.migration(&step.migration)?;
            let label = migration.to_string();

            if step.backwards {
                if config.fake {
                    recorder.record_unapplied(connection, &step.migration).await?;
                    tracing::info!(migration = %label, "unapplying (faked)");
                    summary.faked.push(label);
                } else {
                    tracing::info!(migration = %label, "unapplying");
                    self.run_step(connection, &mut recorder, migration, true).await?;
                    summary.unapplied.push(label);
                }
                continue;
            }

            let fake = config.fake
                || (config.fake_initial && self.should_fake_initial(connection, migration).await?);
            if fake {
                recorder.record_applied(connection, &step.migration).await?;
                tracing::info!(migration = %label, "applying (faked)");
                summary.faked.push(label);
            } else {
                tracing::info!(migration = %label, "applying");
                self.run_step(connection, &mut recorder, migration, false).await?;
                summary.applied.push(label);
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenant_schemas_core::SchemaName;
    use tenant_schemas_db::{ConnectionPool, InMemoryPool};

    fn migrations() -> Vec<Migration> {
        vec![
            Migration::new("shop", "0001_initial")
                .initial()
                .forwards("CREATE TABLE shop_order (id int)")
                .backwards("DROP TABLE shop_order")
                .creates_table("shop_order"),
            Migration::new("shop", "0002_invoice")
                .depends_on("shop", "0001_initial")
                .forwards("CREATE TABLE shop_invoice (id int)")
                .backwards("DROP TABLE shop_invoice"),
        ]
    }

    async fn connection(pool: &InMemoryPool, schema: &str) -> Box<dyn DatabaseConnection> {
        let mut conn = pool.acquire().await.unwrap();
        conn.set_search_path(
            &SchemaName::parse(schema).unwrap(),
            &SchemaName::parse("public").unwrap(),
            true,
        )
        .await
        .unwrap();
        conn
    }

    fn target(schema: &str) -> MigrationTarget {
        MigrationTarget::new(SchemaName::parse(schema).unwrap())
    }

    #[tokio::test]
    async fn test_build_plan_writes_nothing() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let framework = GraphMigrationFramework::new(migrations()).unwrap();
        let mut conn = connection(&pool, "t1").await;

        let plan = framework.build_plan(conn.as_mut(), &target("t1")).await.unwrap();
        assert_eq!(plan.len(), 2);
        assert!(pool.statements().is_empty());
        assert_eq!(framework.peak_concurrent_builds(), 1);
    }

    #[tokio::test]
    async fn test_apply_plan_runs_and_records() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let framework = GraphMigrationFramework::new(migrations()).unwrap();
        let mut conn = connection(&pool, "t1").await;

        let plan = framework.build_plan(conn.as_mut(), &target("t1")).await.unwrap();
        let summary = framework
            .apply_plan(conn.as_mut(), &plan, &ExecutorConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.applied, vec!["shop.0001_initial", "shop.0002_invoice"]);
        assert_eq!(pool.applied_in("t1").len(), 2);
        assert!(pool.tables_in("t1").contains(&"shop_invoice".to_string()));

        let again = framework.build_plan(conn.as_mut(), &target("t1")).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_failed_atomic_step_rolls_back() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        pool.fail_statements_containing("shop_invoice");
        let framework = GraphMigrationFramework::new(migrations()).unwrap();
        let mut conn = connection(&pool, "t1").await;

        let plan = framework.build_plan(conn.as_mut(), &target("t1")).await.unwrap();
        let err = framework
            .apply_plan(conn.as_mut(), &plan, &ExecutorConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, TenantError::MigrationApply(_)));
        assert!(err.to_string().contains("shop.0002_invoice"));
        assert_eq!(pool.applied_in("t1"), vec![("shop".into(), "0001_initial".into())]);
        assert!(pool.statements_in("t1").iter().any(|sql| sql == "ROLLBACK"));
    }

    #[tokio::test]
    async fn test_fake_records_without_running() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let framework = GraphMigrationFramework::new(migrations()).unwrap();
        let mut conn = connection(&pool, "t1").await;
        let config = ExecutorConfig::builder().fake(true).build().unwrap();

        let plan = framework.build_plan(conn.as_mut(), &target("t1")).await.unwrap();
        let summary = framework.apply_plan(conn.as_mut(), &plan, &config).await.unwrap();

        assert_eq!(summary.faked.len(), 2);
        assert!(summary.applied.is_empty());
        assert_eq!(pool.tables_in("t1"), vec!["tenant_migrations"]);
        assert_eq!(pool.applied_in("t1").len(), 2);
    }

    #[tokio::test]
    async fn test_fake_initial_when_tables_exist() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let framework = GraphMigrationFramework::new(migrations()).unwrap();
        let mut conn = connection(&pool, "t1").await;
        conn.execute("CREATE TABLE shop_order (id int)").await.unwrap();
        let config = ExecutorConfig::builder().fake_initial(true).build().unwrap();

        let plan = framework.build_plan(conn.as_mut(), &target("t1")).await.unwrap();
        let summary = framework.apply_plan(conn.as_mut(), &plan, &config).await.unwrap();

        assert_eq!(summary.faked, vec!["shop.0001_initial"]);
        assert_eq!(summary.applied, vec!["shop.0002_invoice"]);
    }

    #[tokio::test]
    async fn test_run_syncdb_runs_first() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let framework = GraphMigrationFramework::new(migrations())
            .unwrap()
            .with_syncdb(["CREATE TABLE IF NOT EXISTS audit_log (id int)"]);
        let mut conn = connection(&pool, "t1").await;
        let config = ExecutorConfig::builder().run_syncdb(true).build().unwrap();

        let plan = framework.build_plan(conn.as_mut(), &target("t1")).await.unwrap();
        let summary = framework.apply_plan(conn.as_mut(), &plan, &config).await.unwrap();
        assert!(summary.synced);
        assert!(pool.tables_in("t1").contains(&"audit_log".to_string()));
    }

    #[tokio::test]
    async fn test_zero_unapplies() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let framework = GraphMigrationFramework::new(migrations()).unwrap();
        let mut conn = connection(&pool, "t1").await;
        let config = ExecutorConfig::default();

        let plan = framework.build_plan(conn.as_mut(), &target("t1")).await.unwrap();
        framework.apply_plan(conn.as_mut(), &plan, &config).await.unwrap();

        let zero = target("t1").with_selection(Some("shop".into()), Some("zero".into()));
        let plan = framework.build_plan(conn.as_mut(), &zero).await.unwrap();
        let summary = framework.apply_plan(conn.as_mut(), &plan, &config).await.unwrap();

        assert_eq!(summary.unapplied, vec!["shop.0002_invoice", "shop.0001_initial"]);
        assert!(pool.applied_in("t1").is_empty());
        assert_eq!(pool.tables_in("t1"), vec!["tenant_migrations"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut dup = migrations();
        dup.push(Migration::new("shop", "0001_initial"));
        assert!(GraphMigrationFramework::new(dup).is_err());
    }
}
