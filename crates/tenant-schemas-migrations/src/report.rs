//! The aggregate result of a run.
//!
//! Executors fill a [`ReportBuilder`] slot by slot, in whatever order lanes
//! finish, and freeze it with [`ReportBuilder::finish`]. The resulting
//! [`ExecutionReport`] is always in caller order.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::outcome::{ExecutionOutcome, FailureDetail, OutcomeKind, SkipReason};
use crate::target::{MigrationTarget, TargetList};

/// One target and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    /// The target.
    pub target: MigrationTarget,
    /// What happened to it.
    pub outcome: ExecutionOutcome,
}

/// Number of outcomes per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    /// Targets migrated.
    pub success: usize,
    /// Targets failed.
    pub failure: usize,
    /// Targets not run.
    pub skipped: usize,
}

/// The ordered `(target, outcome)` list of one run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Identifies the run in logs.
    pub run_id: Uuid,
    /// Codename of the executor that produced the report.
    pub executor: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the report was frozen.
    pub finished_at: DateTime<Utc>,
    entries: Vec<ReportEntry>,
}

impl ExecutionReport {
    /// The entries, in caller order.
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the report has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` iff every outcome is a success.
    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.is_success())
    }

    /// `true` if any outcome is a failure. This is what decides the exit code.
    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| e.outcome.is_failure())
    }

    /// Counts outcomes per kind.
    pub fn counts(&self) -> OutcomeCounts {
        self.entries
            .iter()
            .fold(OutcomeCounts::default(), |mut counts, entry| {
                match entry.outcome.kind() {
                    OutcomeKind::Success => counts.success += 1,
                    OutcomeKind::Failure => counts.failure += 1,
                    OutcomeKind::Skipped => counts.skipped += 1,
                }
                counts
            })
    }

    /// The failed targets with their captured errors.
    pub fn failures(&self) -> impl Iterator<Item = (&MigrationTarget, &FailureDetail)> {
        self.entries.iter().filter_map(|entry| match &entry.outcome {
            ExecutionOutcome::Failure(detail) => Some((&entry.target, detail)),
            _ => None,
        })
    }

    /// Total planned steps across plan-only outcomes.
    pub fn pending_migrations(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| match &entry.outcome {
                ExecutionOutcome::Skipped(SkipReason::Plan(plan)) => plan.pending,
                _ => 0,
            })
            .sum()
    }

    /// `(schema, outcome kind)` pairs in report order.
    pub fn kinds(&self) -> Vec<(String, OutcomeKind)> {
        self.entries
            .iter()
            .map(|entry| (entry.target.schema.to_string(), entry.outcome.kind()))
            .collect()
    }

    /// The outcome recorded for `schema`, if it was part of the run.
    pub fn outcome_for(&self, schema: &str) -> Option<&ExecutionOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.target.schema.as_str() == schema)
            .map(|entry| &entry.outcome)
    }

    /// Appends another phase's report, keeping this report's run id.
    #[must_use]
    pub fn concat(mut self, other: Self) -> Self {
        self.finished_at = self.finished_at.max(other.finished_at);
        self.entries.extend(other.entries);
        self
    }

    /// Renders the operator summary, one line per target.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(out, "{}: {}", entry.target, entry.outcome);
            if let ExecutionOutcome::Skipped(SkipReason::Plan(plan)) = &entry.outcome {
                for line in plan.description.lines() {
                    let _ = writeln!(out, "    {line}");
                }
            }
        }
        let counts = self.counts();
        let _ = write!(
            out,
            "{} succeeded, {} failed, {} skipped",
            counts.success, counts.failure, counts.skipped
        );
        out
    }

    /// Serializes the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Collects outcomes for a fixed target list.
pub struct ReportBuilder {
    run_id: Uuid,
    executor: String,
    started_at: DateTime<Utc>,
    targets: Vec<MigrationTarget>,
    outcomes: Vec<Option<ExecutionOutcome>>,
}

impl ReportBuilder {
    /// Opens a report with one empty slot per target.
    pub fn new(executor: impl Into<String>, targets: &TargetList) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            executor: executor.into(),
            started_at: Utc::now(),
            targets: targets.as_slice().to_vec(),
            outcomes: vec![None; targets.len()],
        }
    }

    /// The run id stamped on the report.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Whether the target at `index` already has an outcome.
    pub fn is_recorded(&self, index: usize) -> bool {
        self.outcomes.get(index).is_some_and(Option::is_some)
    }

    /// Records the outcome of the target at `index`.
    ///
    /// The first outcome for a slot wins; later ones are logged and dropped.
    pub fn record(&mut self, index: usize, outcome: ExecutionOutcome) {
        let Some(slot) = self.outcomes.get_mut(index) else {
            tracing::warn!(index, "outcome for unknown target index");
            return;
        };
        if let Some(existing) = slot.as_ref() {
            tracing::warn!(
                index,
                existing = %existing,
                dropped = %outcome,
                "outcome already recorded"
            );
            return;
        }
        *slot = Some(outcome);
    }

    /// Freezes the report.
    ///
    /// A slot that never received an outcome is reported as an
    /// infrastructure failure.
    pub fn finish(self) -> ExecutionReport {
        let entries = self
            .targets
            .into_iter()
            .zip(self.outcomes)
            .map(|(target, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    tracing::error!(schema = %target.schema, "no outcome recorded");
                    ExecutionOutcome::infrastructure("no outcome was recorded for this target")
                });
                ReportEntry { target, outcome }
            })
            .collect();
        ExecutionReport {
            run_id: self.run_id,
            executor: self.executor,
            started_at: self.started_at,
            finished_at: Utc::now(),
            entries,
        }
    }
}
