//! Migration targets.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use tenant_schemas_core::{SchemaName, TenantError};

use crate::plan::PlanTarget;

/// A schema paired with the migration selection to apply to it.
///
/// Both `app_label` and `migration_name` unset means "apply all pending".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationTarget {
    /// The schema to migrate.
    pub schema: SchemaName,
    /// Restricts the run to one app.
    pub app_label: Option<String>,
    /// Migrates the app to this migration (`zero` unapplies the app).
    pub migration_name: Option<String>,
}

impl MigrationTarget {
    /// Targets every pending migration in `schema`.
    pub fn new(schema: SchemaName) -> Self {
        Self {
            schema,
            app_label: None,
            migration_name: None,
        }
    }

    /// Scopes the target to an app and, optionally, one of its migrations.
    #[must_use]
    pub fn with_selection(mut self, app_label: Option<String>, migration_name: Option<String>) -> Self {
        self.app_label = app_label;
        self.migration_name = migration_name;
        self
    }

    /// The plan target this selection stands for.
    pub fn plan_target(&self) -> Result<PlanTarget, TenantError> {
        PlanTarget::from_selection(self.app_label.as_deref(), self.migration_name.as_deref())
    }
}

impl fmt::Display for MigrationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.app_label, &self.migration_name) {
            (None, _) => write!(f, "{}", self.schema),
            (Some(app), None) => write!(f, "{} ({app})", self.schema),
            (Some(app), Some(name)) => write!(f, "{} ({app}.{name})", self.schema),
        }
    }
}

/// The fixed, duplicate-free list of targets of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TargetList(Vec<MigrationTarget>);

impl TargetList {
    /// Validates and freezes a target list.
    ///
    /// Rejects duplicate schemas and a migration name without an app label.
    pub fn new(targets: Vec<MigrationTarget>) -> Result<Self, TenantError> {
        let mut seen = HashSet::with_capacity(targets.len());
        for target in &targets {
            if !seen.insert(target.schema.as_str()) {
                return Err(TenantError::ConfigurationError(format!(
                    "schema '{}' is listed more than once",
                    target.schema
                )));
            }
            target.plan_target()?;
        }
        Ok(Self(targets))
    }

    /// Builds one target per schema with the same migration selection.
    pub fn for_schemas<I>(
        schemas: I,
        app_label: Option<&str>,
        migration_name: Option<&str>,
    ) -> Result<Self, TenantError>
    where
        I: IntoIterator<Item = SchemaName>,
    {
        Self::new(
            schemas
                .into_iter()
                .map(|schema| {
                    MigrationTarget::new(schema).with_selection(
                        app_label.map(str::to_string),
                        migration_name.map(str::to_string),
                    )
                })
                .collect(),
        )
    }

    /// Returns the number of targets.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether there are no targets.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the targets in caller order.
    pub fn iter(&self) -> std::slice::Iter<'_, MigrationTarget> {
        self.0.iter()
    }

    /// Returns the targets as a slice.
    pub fn as_slice(&self) -> &[MigrationTarget] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a TargetList {
    type Item = &'a MigrationTarget;
    type IntoIter = std::slice::Iter<'a, MigrationTarget>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
