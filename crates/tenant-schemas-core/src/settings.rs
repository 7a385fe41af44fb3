//! Settings system for tenant-schemas.
//!
//! This module provides the [`Settings`] struct, which holds the connection
//! and tenancy configuration, and [`LazySettings`], a globally-accessible,
//! lazily-initialized settings instance.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::TenantError;

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// The database engine (`postgresql` or `memory`).
    pub engine: String,
    /// The database name.
    pub name: String,
    /// The database user.
    pub user: String,
    /// The database password.
    pub password: String,
    /// The database host.
    pub host: String,
    /// The database port.
    pub port: u16,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
    /// Additional engine-specific options.
    pub options: HashMap<String, String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: "postgresql".to_string(),
            name: "tenants".to_string(),
            user: String::new(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 5432,
            pool_size: 16,
            options: HashMap::new(),
        }
    }
}

/// The complete set of settings.
///
/// # Examples
///
/// ```
/// use tenant_schemas_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert_eq!(settings.public_schema_name, "public");
/// assert_eq!(settings.migration_executor, "sequential");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // ── Core ─────────────────────────────────────────────────────────

    /// Whether debug mode is enabled.
    pub debug: bool,

    // ── Database ─────────────────────────────────────────────────────

    /// Database configurations, keyed by alias (e.g. "default").
    pub databases: HashMap<String, DatabaseSettings>,

    // ── Tenancy ──────────────────────────────────────────────────────

    /// Name of the schema holding shared, cross-tenant tables.
    pub public_schema_name: String,
    /// The tenant model as `app_label.ModelName`.
    pub tenant_model: String,
    /// Column of the tenant table holding the schema name.
    pub tenant_schema_column: String,

    // ── Migrations ───────────────────────────────────────────────────

    /// Codename of the executor used by `migrate_schemas`.
    pub migration_executor: String,
    /// Number of parallel lanes; `None` derives it from the machine.
    pub migration_parallelism: Option<usize>,
    /// Stop at the first failed schema instead of continuing.
    pub migration_fail_fast: bool,

    // ── Logging ──────────────────────────────────────────────────────

    /// The log level (e.g. "info", "debug", "warn").
    pub log_level: String,

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Custom settings that don't fit into the above categories.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut databases = HashMap::new();
        databases.insert("default".to_string(), DatabaseSettings::default());

        Self {
            debug: true,
            databases,
            public_schema_name: "public".to_string(),
            tenant_model: "customers.Client".to_string(),
            tenant_schema_column: "schema_name".to_string(),
            migration_executor: "sequential".to_string(),
            migration_parallelism: None,
            migration_fail_fast: false,
            log_level: "info".to_string(),
            extra: HashMap::new(),
        }
    }
}

impl Settings {
    /// Returns the database settings for `alias`.
    pub fn database(&self, alias: &str) -> Result<&DatabaseSettings, TenantError> {
        self.databases.get(alias).ok_or_else(|| {
            TenantError::ConfigurationError(format!("Database alias '{alias}' is not configured"))
        })
    }

    /// Returns the table backing the tenant model.
    ///
    /// `customers.Client` maps to `customers_client`.
    pub fn tenant_table(&self) -> Result<String, TenantError> {
        match self.tenant_model.split_once('.') {
            Some((app, model)) if !app.is_empty() && !model.is_empty() && !model.contains('.') => {
                Ok(format!("{}_{}", app.to_lowercase(), model.to_lowercase()))
            }
            _ => Err(TenantError::ConfigurationError(format!(
                "tenant_model must look like 'app_label.ModelName', got '{}'",
                self.tenant_model
            ))),
        }
    }
}

/// A lazily-initialized, globally-accessible settings container.
///
/// Call [`configure`](LazySettings::configure) once at startup to set the
/// settings, then use [`get`](LazySettings::get) to access them.
pub struct LazySettings {
    inner: OnceLock<Settings>,
}

impl Default for LazySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl LazySettings {
    /// Creates a new, unconfigured `LazySettings`.
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Configures the global settings. Must be called exactly once.
    ///
    /// # Panics
    ///
    /// Panics if settings have already been configured.
    pub fn configure(&self, settings: Settings) {
        self.inner
            .set(settings)
            .expect("Settings have already been configured");
    }

    /// Returns a reference to the configured settings.
    ///
    /// # Panics
    ///
    /// Panics if settings have not been configured.
    pub fn get(&self) -> &Settings {
        self.inner
            .get()
            .expect("Settings have not been configured. Call SETTINGS.configure() first.")
    }

    /// Returns `true` if settings have been configured.
    pub fn is_configured(&self) -> bool {
        self.inner.get().is_some()
    }
}

/// The global settings instance.
pub static SETTINGS: LazySettings = LazySettings::new();
