//! Migration definitions and the dependency graph.
//!
//! A [`Migration`] is a named unit of schema change registered in code as
//! ordered SQL statements. The [`MigrationGraph`] holds the dependency DAG
//! across all apps and yields a deterministic topological order.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tenant_schemas_core::TenantError;

/// A migration identifier: `(app_label, name)`.
pub type MigrationKey = (String, String);

/// Formats a key as `app.name`.
pub fn display_key(key: &MigrationKey) -> String {
    format!("{}.{}", key.0, key.1)
}

/// A single migration.
///
/// Statements in `forwards` run in order when the migration is applied;
/// `backwards` runs in order when it is unapplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// The application label this migration belongs to.
    pub app_label: String,
    /// The migration name (e.g., "0001_initial").
    pub name: String,
    /// Migrations that must be applied first.
    pub dependencies: Vec<MigrationKey>,
    /// SQL statements applied going forwards.
    pub forwards: Vec<String>,
    /// SQL statements applied going backwards.
    pub backwards: Vec<String>,
    /// Whether this is the app's initial migration.
    pub initial: bool,
    /// Whether the statements run inside a single transaction.
    pub atomic: bool,
    /// Tables created by this migration, consulted by `--fake-initial`.
    pub creates_tables: Vec<String>,
}

impl Migration {
    /// Creates an empty, atomic migration.
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
            dependencies: Vec::new(),
            forwards: Vec::new(),
            backwards: Vec::new(),
            initial: false,
            atomic: true,
            creates_tables: Vec::new(),
        }
    }

    /// Marks this migration as the app's initial migration.
    #[must_use]
    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    /// Runs the statements outside a transaction.
    #[must_use]
    pub fn non_atomic(mut self) -> Self {
        self.atomic = false;
        self
    }

    /// Adds a dependency on another migration.
    #[must_use]
    pub fn depends_on(mut self, app_label: impl Into<String>, name: impl Into<String>) -> Self {
        self.dependencies.push((app_label.into(), name.into()));
        self
    }

    /// Appends a forwards statement.
    #[must_use]
    pub fn forwards(mut self, sql: impl Into<String>) -> Self {
        self.forwards.push(sql.into());
        self
    }

    /// Appends a backwards statement.
    #[must_use]
    pub fn backwards(mut self, sql: impl Into<String>) -> Self {
        self.backwards.push(sql.into());
        self
    }

    /// Declares a table this migration creates.
    #[must_use]
    pub fn creates_table(mut self, table: impl Into<String>) -> Self {
        self.creates_tables.push(table.into());
        self
    }

    /// Returns the `(app_label, name)` key for this migration.
    pub fn key(&self) -> MigrationKey {
        (self.app_label.clone(), self.name.clone())
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.name)
    }
}

/// A directed acyclic graph of migrations.
#[derive(Debug, Clone, Default)]
pub struct MigrationGraph {
    /// All migration keys with their `initial` flag.
    nodes: HashMap<MigrationKey, bool>,
    /// Forward edges: from dependency to dependent.
    forward_edges: HashMap<MigrationKey, Vec<MigrationKey>>,
    /// Backward edges: from dependent to dependency.
    backward_edges: HashMap<MigrationKey, Vec<MigrationKey>>,
}

fn not_found(key: &MigrationKey) -> TenantError {
    TenantError::MigrationApply(format!(
        "migration {} not found in graph",
        display_key(key)
    ))
}

impl MigrationGraph {
    /// Creates a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from migrations, wiring up their declared dependencies.
    ///
    /// Fails on dependencies that point outside the set or on cycles.
    pub fn from_migrations<'a, I>(migrations: I) -> Result<Self, TenantError>
    where
        I: IntoIterator<Item = &'a Migration>,
    {
        let migrations: Vec<&Migration> = migrations.into_iter().collect();
        let mut graph = Self::new();
        for migration in &migrations {
            graph.add_node(&migration.app_label, &migration.name, migration.initial);
        }
        for migration in &migrations {
            for dependency in &migration.dependencies {
                graph.add_dependency(migration.key(), dependency.clone())?;
            }
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Adds a migration node.
    pub fn add_node(&mut self, app_label: impl Into<String>, name: impl Into<String>, initial: bool) {
        let key = (app_label.into(), name.into());
        self.nodes.insert(key.clone(), initial);
        self.forward_edges.entry(key.clone()).or_default();
        self.backward_edges.entry(key).or_default();
    }

    /// Adds a dependency edge: `child` depends on `parent`.
    pub fn add_dependency(&mut self, child: MigrationKey, parent: MigrationKey) -> Result<(), TenantError> {
        if !self.nodes.contains_key(&child) {
            return Err(not_found(&child));
        }
        if !self.nodes.contains_key(&parent) {
            return Err(TenantError::MigrationApply(format!(
                "migration {} depends on unknown migration {}",
                display_key(&child),
                display_key(&parent)
            )));
        }
        self.forward_edges
            .entry(parent.clone())
            .or_default()
            .push(child.clone());
        self.backward_edges.entry(child).or_default().push(parent);
        Ok(())
    }

    /// Returns all migrations in dependency order.
    ///
    /// Among migrations whose dependencies are satisfied, the smallest key
    /// comes first, so the order is stable across runs.
    pub fn topological_order(&self) -> Result<Vec<MigrationKey>, TenantError> {
        let mut in_degree: HashMap<&MigrationKey, usize> = self
            .nodes
            .keys()
            .map(|key| (key, self.dependencies_of(key).len()))
            .collect();

        let mut ready: BTreeSet<&MigrationKey> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(key, _)| *key)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = ready.pop_first() {
            order.push(node.clone());
            for child in self.forward_edges.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(child);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(TenantError::MigrationApply(
                "circular dependency detected in migration graph".to_string(),
            ));
        }
        Ok(order)
    }

    /// Returns the app's migrations in dependency order.
    pub fn app_order(&self, app_label: &str) -> Result<Vec<MigrationKey>, TenantError> {
        Ok(self
            .topological_order()?
            .into_iter()
            .filter(|key| key.0 == app_label)
            .collect())
    }

    /// Returns the app's migrations that no other migration of the same app depends on.
    pub fn leaf_nodes(&self, app_label: &str) -> Vec<MigrationKey> {
        let mut leaves: Vec<MigrationKey> = self
            .forward_edges
            .iter()
            .filter(|(key, children)| {
                key.0 == app_label && children.iter().all(|child| child.0 != app_label)
            })
            .map(|(key, _)| key.clone())
            .collect();
        leaves.sort();
        leaves
    }

    /// Returns the sorted, de-duplicated app labels in the graph.
    pub fn app_labels(&self) -> Vec<String> {
        self.nodes
            .keys()
            .map(|key| key.0.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Returns whether `key` is marked as an initial migration.
    pub fn is_initial(&self, key: &MigrationKey) -> bool {
        self.nodes.get(key).copied().unwrap_or(false)
    }

    /// Returns the direct dependencies of a node.
    pub fn dependencies_of(&self, key: &MigrationKey) -> &[MigrationKey] {
        self.backward_edges.get(key).map_or(&[][..], Vec::as_slice)
    }

    /// Returns the number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns whether the graph contains a given node.
    pub fn contains(&self, key: &MigrationKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Validates that the graph has no cycles.
    pub fn validate(&self) -> Result<(), TenantError> {
        self.topological_order().map(|_| ())
    }
}
