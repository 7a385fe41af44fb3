//! The sequential executor.

use std::sync::Arc;

use tenant_schemas_core::logging::run_span;
use tenant_schemas_core::TenantResult;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::lane::{Lane, LaneShared};
use super::ExecutionEnv;
use crate::config::ExecutorConfig;
use crate::report::{ExecutionReport, ReportBuilder};
use crate::runner::MigrationPlanRunner;
use crate::target::TargetList;

/// Migrates targets one at a time, in caller order, on a single connection.
pub struct SequentialExecutor {
    env: ExecutionEnv,
    gate: Arc<Mutex<()>>,
}

impl SequentialExecutor {
    /// Registered codename.
    pub const CODENAME: &'static str = "sequential";

    /// Creates the executor.
    pub fn new(env: ExecutionEnv) -> Self {
        Self {
            env,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) async fn run_migrations(
        &self,
        targets: &TargetList,
        config: &Arc<ExecutorConfig>,
    ) -> TenantResult<ExecutionReport> {
        let mut builder = ReportBuilder::new(Self::CODENAME, targets);
        if targets.is_empty() {
            tracing::info!("no targets to migrate");
            return Ok(builder.finish());
        }
        let span = run_span(&builder.run_id().to_string(), Self::CODENAME, targets.len());

        async {
            tracing::info!(fail_fast = config.fail_fast, plan = config.plan, "starting sequential run");
            let shared = LaneShared {
                pool: Arc::clone(&self.env.pool),
                public_schema: self.env.public_schema.clone(),
                runner: MigrationPlanRunner::new(
                    Arc::clone(&self.env.framework),
                    Arc::clone(&self.gate),
                    Arc::clone(config),
                ),
                cancel: CancellationToken::new(),
                executor: Self::CODENAME,
                total: targets.len(),
                sink: None,
            };
            let assigned = targets.iter().cloned().enumerate().collect();
            let report = Lane::new(0, assigned).run(shared).await;
            for (index, outcome) in report.outcomes {
                builder.record(index, outcome);
            }
            let report = builder.finish();
            let counts = report.counts();
            tracing::info!(
                success = counts.success,
                failure = counts.failure,
                skipped = counts.skipped,
                "sequential run finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }
}
