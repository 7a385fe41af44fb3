//! Base connection traits and common types.
//!
//! This module defines the [`ConnectionPool`] and [`DatabaseConnection`]
//! traits that all backend implementations must satisfy, along with
//! [`DatabaseConfig`] for building pools from settings.
//!
//! Unlike a query-per-call pool, a [`DatabaseConnection`] is a single checked
//! out connection: the active schema is connection-scoped state, so whoever
//! switches the schema must keep issuing statements on the same connection.

use std::collections::HashMap;

use tenant_schemas_core::{DatabaseSettings, SchemaName, TenantError};

/// Name of the table holding the applied-migrations ledger in every schema.
pub const MIGRATIONS_TABLE: &str = "tenant_migrations";

/// A pool handing out dedicated connections.
///
/// Pools are shared across worker lanes (`Send + Sync`); the connections they
/// hand out are owned by exactly one lane at a time.
#[async_trait::async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Returns the vendor name (e.g., "postgresql", "memory").
    fn vendor(&self) -> &str;

    /// Maximum number of connections the pool will hand out at once.
    fn max_size(&self) -> usize;

    /// Checks out a dedicated connection.
    ///
    /// Fails with [`TenantError::Infrastructure`] when the pool is exhausted or
    /// the database is unreachable.
    async fn acquire(&self) -> Result<Box<dyn DatabaseConnection>, TenantError>;
}

/// A single checked-out database connection.
///
/// All methods take `&mut self`: a connection is never used by two tasks at
/// the same time. Bookkeeping methods operate on the ledger table inside the
/// currently active schema.
#[async_trait::async_trait]
pub trait DatabaseConnection: Send {
    /// Returns the vendor name (e.g., "postgresql", "memory").
    fn vendor(&self) -> &str;

    /// Switches the connection's active schema.
    ///
    /// When `include_public` is set, the public schema stays resolvable after
    /// the tenant schema.
    async fn set_search_path(
        &mut self,
        schema: &SchemaName,
        public: &SchemaName,
        include_public: bool,
    ) -> Result<(), TenantError>;

    /// Returns the first schema on the connection's search path.
    async fn current_schema(&mut self) -> Result<String, TenantError>;

    /// Returns `true` if `schema` exists in the database.
    async fn schema_exists(&mut self, schema: &SchemaName) -> Result<bool, TenantError>;

    /// Returns `true` if `table` exists in the active schema.
    async fn table_exists(&mut self, table: &str) -> Result<bool, TenantError>;

    /// Executes a SQL statement that does not return rows.
    ///
    /// Returns the number of rows affected.
    async fn execute(&mut self, sql: &str) -> Result<u64, TenantError>;

    /// Runs a query and returns its first column as text.
    ///
    /// `params` bind to `$1`, `$2`, ... in order.
    async fn query_column(&mut self, sql: &str, params: &[&str]) -> Result<Vec<String>, TenantError>;

    // ── Applied-migration ledger ─────────────────────────────────────

    /// Creates the ledger table in the active schema if it is missing.
    async fn ensure_migrations_table(&mut self) -> Result<(), TenantError>;

    /// Lists `(app_label, name)` pairs recorded in the active schema.
    ///
    /// Returns an empty list, without creating anything, when the ledger table
    /// does not exist yet.
    async fn applied_migrations(&mut self) -> Result<Vec<(String, String)>, TenantError>;

    /// Records a migration as applied in the active schema.
    async fn record_migration(&mut self, app_label: &str, name: &str) -> Result<(), TenantError>;

    /// Removes a migration record from the active schema.
    async fn unrecord_migration(&mut self, app_label: &str, name: &str) -> Result<(), TenantError>;

    // ── Transactions ─────────────────────────────────────────────────

    /// Begins a new transaction.
    async fn begin(&mut self) -> Result<(), TenantError> {
        self.execute("BEGIN").await.map(|_| ())
    }

    /// Commits the current transaction.
    async fn commit(&mut self) -> Result<(), TenantError> {
        self.execute("COMMIT").await.map(|_| ())
    }

    /// Rolls back the current transaction.
    async fn rollback(&mut self) -> Result<(), TenantError> {
        self.execute("ROLLBACK").await.map(|_| ())
    }
}

/// Configuration for connecting to a database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// The engine name (`postgresql` or `memory`).
    pub engine: String,
    /// The database name.
    pub name: String,
    /// The database host.
    pub host: Option<String>,
    /// The database port.
    pub port: Option<u16>,
    /// The database user.
    pub user: Option<String>,
    /// The database password.
    pub password: Option<String>,
    /// Maximum pooled connections.
    pub pool_size: usize,
    /// Additional connection options.
    pub options: HashMap<String, String>,
}

impl DatabaseConfig {
    /// Creates a configuration for a PostgreSQL database.
    pub fn postgres(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            engine: "postgresql".to_string(),
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            pool_size: DatabaseSettings::default().pool_size,
            options: HashMap::new(),
        }
    }

    /// Creates a configuration for the in-memory backend.
    pub fn memory(pool_size: usize) -> Self {
        Self {
            engine: "memory".to_string(),
            name: ":memory:".to_string(),
            host: None,
            port: None,
            user: None,
            password: None,
            pool_size,
            options: HashMap::new(),
        }
    }

    /// Builds a configuration from a settings entry.
    ///
    /// Empty strings in the settings are treated as "not set".
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            engine: settings.engine.clone(),
            name: settings.name.clone(),
            host: non_empty(&settings.host),
            port: (settings.port != 0).then_some(settings.port),
            user: non_empty(&settings.user),
            password: non_empty(&settings.password),
            pool_size: settings.pool_size,
            options: settings.options.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_postgres() {
        let cfg = DatabaseConfig::postgres("saas", "localhost", 5432, "user", "pass");
        assert_eq!(cfg.engine, "postgresql");
        assert_eq!(cfg.name, "saas");
        assert_eq!(cfg.host.as_deref(), Some("localhost"));
        assert_eq!(cfg.port, Some(5432));
        assert_eq!(cfg.pool_size, 16);
    }

    #[test]
    fn test_database_config_memory() {
        let cfg = DatabaseConfig::memory(3);
        assert_eq!(cfg.engine, "memory");
        assert_eq!(cfg.pool_size, 3);
        assert!(cfg.host.is_none());
    }

    #[test]
    fn test_database_config_from_settings() {
        let settings = DatabaseSettings {
            user: "migrator".to_string(),
            password: String::new(),
            pool_size: 5,
            ..DatabaseSettings::default()
        };
        let cfg = DatabaseConfig::from_settings(&settings);
        assert_eq!(cfg.user.as_deref(), Some("migrator"));
        assert!(cfg.password.is_none());
        assert_eq!(cfg.port, Some(5432));
        assert_eq!(cfg.pool_size, 5);
    }
}
