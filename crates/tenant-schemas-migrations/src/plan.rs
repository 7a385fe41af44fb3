//! Migration plans.
//!
//! [`make_plan`] compares the migration graph with the applied set of one
//! schema and produces the ordered [`MigrationPlan`] that brings the schema to
//! the requested [`PlanTarget`].

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::Serialize;
use tenant_schemas_core::TenantError;

use crate::migration::{display_key, MigrationGraph, MigrationKey};

/// The migration name that unapplies every migration of an app.
pub const ZERO: &str = "zero";

/// A single step in a migration plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStep {
    /// The migration key: `(app_label, migration_name)`.
    pub migration: MigrationKey,
    /// If `true`, this step reverses the migration.
    pub backwards: bool,
}

impl MigrationStep {
    /// Creates a forward migration step.
    pub fn forward(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            migration: (app_label.into(), name.into()),
            backwards: false,
        }
    }

    /// Creates a backward (reverse) migration step.
    pub fn backward(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            migration: (app_label.into(), name.into()),
            backwards: true,
        }
    }
}

/// What a plan should bring a schema to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanTarget {
    /// Every unapplied migration of every app.
    All,
    /// Every unapplied migration of one app, up to its leaf.
    App(String),
    /// One app forwards or backwards to a specific migration.
    Migration(String, String),
    /// Unapply every migration of one app.
    Zero(String),
}

impl PlanTarget {
    /// Interprets the optional `app_label` / `migration_name` pair of a command line.
    pub fn from_selection(app_label: Option<&str>, migration_name: Option<&str>) -> Result<Self, TenantError> {
        match (app_label, migration_name) {
            (None, None) => Ok(Self::All),
            (Some(app), None) => Ok(Self::App(app.to_string())),
            (Some(app), Some(ZERO)) => Ok(Self::Zero(app.to_string())),
            (Some(app), Some(name)) => Ok(Self::Migration(app.to_string(), name.to_string())),
            (None, Some(name)) => Err(TenantError::ConfigurationError(format!(
                "migration name '{name}' given without an app label"
            ))),
        }
    }
}

/// An ordered list of steps for one schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    /// The ordered steps to execute.
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Creates a new empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step to the plan.
    pub fn add_step(&mut self, step: MigrationStep) {
        self.steps.push(step);
    }

    /// Returns whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Renders the plan for operators.
    ///
    /// ```
    /// use tenant_schemas_migrations::plan::{MigrationPlan, MigrationStep};
    ///
    /// let mut plan = MigrationPlan::new();
    /// plan.add_step(MigrationStep::forward("shop", "0002_invoice"));
    /// assert_eq!(plan.describe(), "Planned operations:\n  Apply shop.0002_invoice");
    /// assert_eq!(MigrationPlan::new().describe(), "No planned migration operations.");
    /// ```
    pub fn describe(&self) -> String {
        if self.steps.is_empty() {
            return "No planned migration operations.".to_string();
        }
        let mut out = String::from("Planned operations:");
        for step in &self.steps {
            let verb = if step.backwards { "Unapply" } else { "Apply" };
            let _ = write!(out, "\n  {verb} {}", display_key(&step.migration));
        }
        out
    }
}

/// Builds the plan that moves a schema with `applied` migrations to `target`.
///
/// Forward steps follow the graph's topological order. Backward steps run in
/// reverse order, latest first.
pub fn make_plan(
    graph: &MigrationGraph,
    applied: &HashSet<MigrationKey>,
    target: &PlanTarget,
) -> Result<MigrationPlan, TenantError> {
    let order = graph.topological_order()?;
    let mut plan = MigrationPlan::new();

    match target {
        PlanTarget::All => {
            for key in order.iter().filter(|key| !applied.contains(*key)) {
                plan.add_step(MigrationStep::forward(key.0.clone(), key.1.clone()));
            }
        }
        PlanTarget::App(app_label) => {
            let app_keys = app_keys(&order, app_label)?;
            // The app's leaf plus everything it needs, from any app.
            let needed = ancestors(graph, app_keys.iter());
            for key in order
                .iter()
                .filter(|key| needed.contains(*key) && !applied.contains(*key))
            {
                plan.add_step(MigrationStep::forward(key.0.clone(), key.1.clone()));
            }
        }
        PlanTarget::Migration(app_label, name) => {
            let target_key = (app_label.clone(), name.clone());
            if !graph.contains(&target_key) {
                return Err(TenantError::MigrationApply(format!(
                    "cannot find a migration matching '{name}' from app '{app_label}'"
                )));
            }
            let app_keys = app_keys(&order, app_label)?;
            let target_pos = app_keys
                .iter()
                .position(|key| *key == target_key)
                .unwrap_or_default();

            let needed = ancestors(graph, std::iter::once(&target_key));
            for key in order
                .iter()
                .filter(|key| needed.contains(*key) && !applied.contains(*key))
            {
                plan.add_step(MigrationStep::forward(key.0.clone(), key.1.clone()));
            }
            for key in app_keys[target_pos + 1..].iter().rev() {
                if applied.contains(key) {
                    plan.add_step(MigrationStep::backward(key.0.clone(), key.1.clone()));
                }
            }
        }
        PlanTarget::Zero(app_label) => {
            for key in app_keys(&order, app_label)?.iter().rev() {
                if applied.contains(key) {
                    plan.add_step(MigrationStep::backward(key.0.clone(), key.1.clone()));
                }
            }
        }
    }

    Ok(plan)
}

fn app_keys(order: &[MigrationKey], app_label: &str) -> Result<Vec<MigrationKey>, TenantError> {
    let keys: Vec<MigrationKey> = order
        .iter()
        .filter(|key| key.0 == app_label)
        .cloned()
        .collect();
    if keys.is_empty() {
        return Err(TenantError::MigrationApply(format!(
            "app '{app_label}' does not have migrations"
        )));
    }
    Ok(keys)
}

/// Returns `roots` plus every migration they transitively depend on.
fn ancestors<'a>(graph: &MigrationGraph, roots: impl Iterator<Item = &'a MigrationKey>) -> HashSet<MigrationKey> {
    let mut seen = HashSet::new();
    let mut stack: Vec<MigrationKey> = roots.cloned().collect();
    while let Some(key) = stack.pop() {
        if seen.insert(key.clone()) {
            stack.extend(graph.dependencies_of(&key).iter().cloned());
        }
    }
    seen
}
