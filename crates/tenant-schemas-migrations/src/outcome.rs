//! Per-target execution outcomes.

use std::fmt;

use serde::Serialize;
use tenant_schemas_core::{ErrorKind, TenantError};

/// What an applied run did to one schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppliedSummary {
    /// Migrations applied by running their statements, as `app.name`.
    pub applied: Vec<String>,
    /// Migrations recorded without running statements.
    pub faked: Vec<String>,
    /// Migrations reverted.
    pub unapplied: Vec<String>,
    /// Whether syncdb statements were executed first.
    pub synced: bool,
}

impl AppliedSummary {
    /// Total number of migration steps taken.
    pub fn total(&self) -> usize {
        self.applied.len() + self.faked.len() + self.unapplied.len()
    }
}

/// The captured error of a failed target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDetail {
    /// Which category of error occurred.
    pub kind: ErrorKind,
    /// The error message, preserved for diagnostics.
    pub message: String,
}

/// A dry-run result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMigrations {
    /// The rendered plan.
    pub description: String,
    /// Number of planned steps.
    pub pending: usize,
}

/// Why a target was not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Plan-only mode; nothing was applied.
    Plan(PlannedMigrations),
    /// Fail-fast stopped the run before this target started.
    UpstreamFailure,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan(plan) => write!(f, "plan: {} pending", plan.pending),
            Self::UpstreamFailure => f.write_str("upstream failure"),
        }
    }
}

/// The outcome category, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The target was migrated.
    Success,
    /// The target failed.
    Failure,
    /// The target was not run.
    Skipped,
}

/// The result for exactly one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The target was migrated.
    Success(AppliedSummary),
    /// The target failed.
    Failure(FailureDetail),
    /// The target was not run.
    Skipped(SkipReason),
}

impl ExecutionOutcome {
    /// Captures an error as a failure outcome.
    pub fn failure(error: &TenantError) -> Self {
        Self::Failure(FailureDetail {
            kind: error.kind(),
            message: error.to_string(),
        })
    }

    /// An infrastructure failure with the given message.
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::Failure(FailureDetail {
            kind: ErrorKind::Infrastructure,
            message: message.into(),
        })
    }

    /// Returns the outcome category.
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::Failure(_) => OutcomeKind::Failure,
            Self::Skipped(_) => OutcomeKind::Skipped,
        }
    }

    /// Returns `true` for [`ExecutionOutcome::Success`].
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` for [`ExecutionOutcome::Failure`].
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns `true` for a failure that leaves the lane's connection unusable.
    pub fn is_infrastructure_failure(&self) -> bool {
        matches!(self, Self::Failure(detail) if detail.kind == ErrorKind::Infrastructure)
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(summary) => write!(f, "OK ({} applied)", summary.total()),
            Self::Failure(detail) => write!(f, "FAILED [{}] {}", detail.kind, detail.message),
            Self::Skipped(reason) => write!(f, "SKIPPED ({reason})"),
        }
    }
}
