//! Worker lanes.
//!
//! A lane owns one pooled connection and processes its assigned targets one
//! after another. Both executors are built on lanes: the sequential executor
//! runs a single lane on the calling task; the parallel executor spawns one
//! task per lane.

use std::fmt;
use std::sync::Arc;

use tenant_schemas_core::logging::schema_span;
use tenant_schemas_core::{SchemaName, TenantError};
use tenant_schemas_db::{ConnectionPool, SchemaContext};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::outcome::{ExecutionOutcome, SkipReason};
use crate::runner::MigrationPlanRunner;
use crate::target::MigrationTarget;

/// Lifecycle of a lane.
///
/// `Idle -> Running -> (Idle | Stopping)`, `Stopping -> Drained`. `Drained`
/// and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneState {
    /// Waiting for its next target.
    Idle,
    /// Migrating the target with this caller index.
    Running(usize),
    /// Cancelled; remaining targets are being skipped.
    Stopping,
    /// Finished normally.
    Drained,
    /// Stopped by an infrastructure error.
    Aborted,
}

impl LaneState {
    /// Whether the lane has finished.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Drained | Self::Aborted)
    }

    fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::Running(_) | Self::Stopping | Self::Drained | Self::Aborted)
            | (Self::Running(_), Self::Idle | Self::Stopping | Self::Aborted)
            | (Self::Stopping, Self::Drained) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LaneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running(index) => write!(f, "running #{index}"),
            Self::Stopping => f.write_str("stopping"),
            Self::Drained => f.write_str("drained"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// What one lane produced.
#[derive(Debug)]
pub struct LaneReport {
    /// The lane number.
    pub lane: usize,
    /// The terminal state.
    pub state: LaneState,
    /// `(caller index, outcome)` pairs in processing order.
    pub outcomes: Vec<(usize, ExecutionOutcome)>,
}

/// Everything a lane needs that is shared across lanes.
#[derive(Clone)]
pub(crate) struct LaneShared {
    pub pool: Arc<dyn ConnectionPool>,
    pub public_schema: SchemaName,
    pub runner: MigrationPlanRunner,
    pub cancel: CancellationToken,
    pub executor: &'static str,
    pub total: usize,
    /// Receives every outcome as soon as it is produced, so outcomes survive
    /// a lane task that dies before returning its report.
    pub sink: Option<UnboundedSender<(usize, ExecutionOutcome)>>,
}

impl LaneShared {
    fn cancel_if_fail_fast(&self) {
        if self.runner.config().fail_fast && !self.cancel.is_cancelled() {
            self.cancel.cancel();
        }
    }
}

/// Outcomes of one lane, mirrored into the shared sink.
struct Outcomes<'a> {
    list: Vec<(usize, ExecutionOutcome)>,
    sink: Option<&'a UnboundedSender<(usize, ExecutionOutcome)>>,
}

impl Outcomes<'_> {
    fn push(&mut self, index: usize, outcome: ExecutionOutcome) {
        if let Some(sink) = self.sink {
            // A closed receiver means the executor stopped listening; the list still has it.
            let _ = sink.send((index, outcome.clone()));
        }
        self.list.push((index, outcome));
    }
}

/// Cancels the run under fail-fast if the lane unwinds from a panic.
struct CancelOnPanic<'a> {
    shared: &'a LaneShared,
    lane: usize,
}

impl Drop for CancelOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(lane = self.lane, "lane panicked");
            self.shared.cancel_if_fail_fast();
        }
    }
}

/// A single worker lane.
pub(crate) struct Lane {
    id: usize,
    state: LaneState,
    assigned: Vec<(usize, MigrationTarget)>,
}

impl Lane {
    pub(crate) fn new(id: usize, assigned: Vec<(usize, MigrationTarget)>) -> Self {
        Self {
            id,
            state: LaneState::Idle,
            assigned,
        }
    }

    fn transition(&mut self, next: LaneState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid lane transition {} -> {next}",
            self.state
        );
        tracing::trace!(lane = self.id, from = %self.state, to = %next, "lane state");
        self.state = next;
    }

    async fn connect(&self, shared: &LaneShared) -> Result<SchemaContext, TenantError> {
        let connection = shared.pool.acquire().await?;
        let context = SchemaContext::new(connection, shared.public_schema.clone())
            .await
            .map_err(|e| TenantError::Infrastructure(format!("failed to prepare connection: {e}")))?;
        Ok(context.include_public(shared.runner.config().include_public))
    }

    /// Processes every assigned target and returns their outcomes.
    pub(crate) async fn run(mut self, shared: LaneShared) -> LaneReport {
        let _guard = CancelOnPanic {
            shared: &shared,
            lane: self.id,
        };
        let assigned = std::mem::take(&mut self.assigned);
        let mut outcomes = Outcomes {
            list: Vec::with_capacity(assigned.len()),
            sink: shared.sink.as_ref(),
        };
        let mut pending = assigned.into_iter();

        let mut context = match self.connect(&shared).await {
            Ok(context) => context,
            Err(e) => {
                tracing::error!(lane = self.id, error = %e, "lane could not acquire a connection");
                shared.cancel_if_fail_fast();
                let message = format!("lane {} aborted: {e}", self.id);
                for (index, _) in pending {
                    outcomes.push(index, ExecutionOutcome::infrastructure(message.clone()));
                }
                self.transition(LaneState::Aborted);
                return self.finish(outcomes.list);
            }
        };

        while let Some((index, target)) = pending.next() {
            if shared.cancel.is_cancelled() {
                self.transition(LaneState::Stopping);
                outcomes.push(index, ExecutionOutcome::Skipped(SkipReason::UpstreamFailure));
                for (index, _) in pending.by_ref() {
                    outcomes.push(index, ExecutionOutcome::Skipped(SkipReason::UpstreamFailure));
                }
                break;
            }

            self.transition(LaneState::Running(index));
            let span = schema_span(target.schema.as_str(), shared.executor, index + 1, shared.total);
            let outcome = shared.runner.run(&mut context, &target).instrument(span).await;

            let failed = outcome.is_failure();
            let fatal_message = match &outcome {
                ExecutionOutcome::Failure(detail) if outcome.is_infrastructure_failure() => {
                    Some(detail.message.clone())
                }
                _ => None,
            };
            outcomes.push(index, outcome);

            if failed && shared.runner.config().fail_fast && !shared.cancel.is_cancelled() {
                tracing::warn!(lane = self.id, schema = %target.schema, "fail-fast: cancelling remaining targets");
                shared.cancel.cancel();
            }

            if let Some(cause) = fatal_message {
                tracing::error!(lane = self.id, schema = %target.schema, %cause, "lane aborted");
                let message = format!("lane {} aborted after {}: {cause}", self.id, target.schema);
                for (index, _) in pending {
                    outcomes.push(index, ExecutionOutcome::infrastructure(message.clone()));
                }
                self.transition(LaneState::Aborted);
                return self.finish(outcomes.list);
            }

            self.transition(LaneState::Idle);
        }

        self.transition(LaneState::Drained);
        self.finish(outcomes.list)
    }

    fn finish(self, outcomes: Vec<(usize, ExecutionOutcome)>) -> LaneReport {
        debug_assert!(self.state.is_terminal());
        tracing::debug!(lane = self.id, state = %self.state, targets = outcomes.len(), "lane finished");
        LaneReport {
            lane: self.id,
            state: self.state,
            outcomes,
        }
    }
}

/// Deals `targets` round-robin onto `width` lanes: target `i` goes to lane `i % width`.
pub(crate) fn assign_round_robin(targets: &[MigrationTarget], width: usize) -> Vec<Vec<(usize, MigrationTarget)>> {
    let width = width.max(1);
    let mut lanes: Vec<Vec<(usize, MigrationTarget)>> = (0..width)
        .map(|_| Vec::with_capacity(targets.len() / width + 1))
        .collect();
    for (index, target) in targets.iter().enumerate() {
        lanes[index % width].push((index, target.clone()));
    }
    lanes
}
