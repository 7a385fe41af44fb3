//! Discovering migrations on the filesystem.
//!
//! The [`MigrationLoader`] expects one directory per app, holding one JSON file
//! per migration:
//!
//! ```text
//! migrations_dir/
//!   shop/
//!     0001_initial.json
//!     0002_invoice.json
//! ```
//!
//! A file lists the SQL to run and, optionally, its dependencies:
//!
//! ```json
//! {
//!   "initial": true,
//!   "forwards": ["CREATE TABLE shop_order (id BIGSERIAL PRIMARY KEY)"],
//!   "backwards": ["DROP TABLE shop_order"],
//!   "creates_tables": ["shop_order"]
//! }
//! ```
//!
//! Without explicit `dependencies`, a migration depends on the one before it
//! in the same app (by file name order).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tenant_schemas_core::TenantError;

use crate::migration::Migration;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MigrationFile {
    #[serde(default)]
    dependencies: Option<Vec<(String, String)>>,
    #[serde(default)]
    initial: bool,
    #[serde(default = "default_atomic")]
    atomic: bool,
    #[serde(default)]
    forwards: Vec<String>,
    #[serde(default)]
    backwards: Vec<String>,
    #[serde(default)]
    creates_tables: Vec<String>,
}

const fn default_atomic() -> bool {
    true
}

/// Loads migrations from a directory tree.
pub struct MigrationLoader {
    migrations_dir: PathBuf,
}

impl MigrationLoader {
    /// Creates a loader for `migrations_dir`.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// The directory this loader reads.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Reads every migration, apps sorted by label and migrations by name.
    ///
    /// A missing directory yields no migrations.
    pub fn load(&self) -> Result<Vec<Migration>, TenantError> {
        if !self.migrations_dir.exists() {
            tracing::warn!(dir = %self.migrations_dir.display(), "migrations directory does not exist");
            return Ok(Vec::new());
        }

        let mut migrations = Vec::new();
        for app_dir in sorted_entries(&self.migrations_dir)? {
            if !app_dir.is_dir() {
                continue;
            }
            let Some(app_label) = file_name(&app_dir) else {
                continue;
            };
            let mut previous: Option<String> = None;
            for path in sorted_entries(&app_dir)? {
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|n| n.to_str()).map(str::to_string) else {
                    continue;
                };
                let migration = Self::parse(&app_label, &name, &path, previous.as_deref())?;
                previous = Some(name);
                migrations.push(migration);
            }
        }

        tracing::debug!(
            dir = %self.migrations_dir.display(),
            count = migrations.len(),
            "loaded migrations"
        );
        Ok(migrations)
    }

    fn parse(app_label: &str, name: &str, path: &Path, previous: Option<&str>) -> Result<Migration, TenantError> {
        let content = std::fs::read_to_string(path)?;
        let file: MigrationFile = serde_json::from_str(&content).map_err(|e| {
            TenantError::ConfigurationError(format!("invalid migration file {}: {e}", path.display()))
        })?;

        let mut migration = Migration::new(app_label, name);
        migration.initial = file.initial;
        migration.atomic = file.atomic;
        migration.forwards = file.forwards;
        migration.backwards = file.backwards;
        migration.creates_tables = file.creates_tables;
        migration.dependencies = match file.dependencies {
            Some(dependencies) => dependencies,
            None => previous
                .map(|prev| vec![(app_label.to_string(), prev.to_string())])
                .unwrap_or_default(),
        };
        Ok(migration)
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, TenantError> {
    let mut paths = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.starts_with('.'))
        .map(str::to_string)
}
