//! The parallel executor.
//!
//! Targets are dealt round-robin onto `width` lanes. Each lane runs on its own
//! tokio task with its own pooled connection, so lanes never share schema
//! state. Plan building is serialized through a gate owned by the executor;
//! applying plans is not.
//!
//! Lanes stream each outcome to the executor as it is produced. If a lane task
//! dies, only its targets without an outcome are reported as failures.

use std::sync::Arc;

use tenant_schemas_core::logging::run_span;
use tenant_schemas_core::{TenantError, TenantResult};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::lane::{assign_round_robin, Lane, LaneReport, LaneShared, LaneState};
use super::ExecutionEnv;
use crate::config::ExecutorConfig;
use crate::outcome::ExecutionOutcome;
use crate::report::{ExecutionReport, ReportBuilder};
use crate::runner::MigrationPlanRunner;
use crate::target::TargetList;

/// Migrates targets concurrently across a bounded number of lanes.
pub struct ParallelExecutor {
    env: ExecutionEnv,
    gate: Arc<Mutex<()>>,
}

struct SpawnedLane {
    id: usize,
    indices: Vec<usize>,
    handle: JoinHandle<LaneReport>,
}

impl ParallelExecutor {
    /// Registered codename.
    pub const CODENAME: &'static str = "parallel";

    /// Creates the executor.
    pub fn new(env: ExecutionEnv) -> Self {
        Self {
            env,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Number of lanes a run over `targets` targets would use.
    pub fn width_for(&self, config: &ExecutorConfig, targets: usize) -> TenantResult<usize> {
        let pool_size = self.env.pool.max_size();
        if pool_size == 0 {
            return Err(TenantError::ConfigurationError(
                "connection pool has no capacity".to_string(),
            ));
        }
        let width = config.resolve_width(pool_size, targets);
        if width > pool_size {
            tracing::warn!(
                width,
                pool_size,
                "concurrency width exceeds pool size; lanes that cannot get a connection will abort"
            );
        }
        Ok(width)
    }

    pub(crate) async fn run_migrations(
        &self,
        targets: &TargetList,
        config: &Arc<ExecutorConfig>,
    ) -> TenantResult<ExecutionReport> {
        let width = self.width_for(config, targets.len())?;
        let mut builder = ReportBuilder::new(Self::CODENAME, targets);
        if targets.is_empty() {
            tracing::info!("no targets to migrate");
            return Ok(builder.finish());
        }
        let span = run_span(&builder.run_id().to_string(), Self::CODENAME, targets.len());

        async {
            tracing::info!(width, fail_fast = config.fail_fast, plan = config.plan, "starting parallel run");
            let (sink, mut received) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            let shared = LaneShared {
                pool: Arc::clone(&self.env.pool),
                public_schema: self.env.public_schema.clone(),
                runner: MigrationPlanRunner::new(
                    Arc::clone(&self.env.framework),
                    Arc::clone(&self.gate),
                    Arc::clone(config),
                ),
                cancel: cancel.clone(),
                executor: Self::CODENAME,
                total: targets.len(),
                sink: Some(sink),
            };

            let lanes: Vec<SpawnedLane> = assign_round_robin(targets.as_slice(), width)
                .into_iter()
                .enumerate()
                .map(|(id, assigned)| {
                    let indices = assigned.iter().map(|(index, _)| *index).collect();
                    let lane = Lane::new(id, assigned);
                    let handle = tokio::spawn(lane.run(shared.clone()).in_current_span());
                    SpawnedLane { id, indices, handle }
                })
                .collect();
            drop(shared);

            let mut dead = Vec::new();
            for SpawnedLane { id, indices, handle } in lanes {
                match handle.await {
                    Ok(report) => {
                        if report.state == LaneState::Aborted {
                            tracing::warn!(lane = report.lane, "lane aborted");
                        }
                    }
                    Err(e) => {
                        tracing::error!(lane = id, error = %e, "lane task failed");
                        if config.fail_fast {
                            cancel.cancel();
                        }
                        let message = if e.is_panic() {
                            format!("lane {id} panicked")
                        } else {
                            format!("lane {id} was cancelled")
                        };
                        dead.push((indices, message));
                    }
                }
            }

            while let Ok((index, outcome)) = received.try_recv() {
                builder.record(index, outcome);
            }
            for (indices, message) in dead {
                for index in indices {
                    if !builder.is_recorded(index) {
                        builder.record(index, ExecutionOutcome::infrastructure(message.clone()));
                    }
                }
            }

            let report = builder.finish();
            let counts = report.counts();
            tracing::info!(
                success = counts.success,
                failure = counts.failure,
                skipped = counts.skipped,
                "parallel run finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }
}
