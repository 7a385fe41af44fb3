//! PostgreSQL backend using `tokio-postgres` and `deadpool-postgres`.
//!
//! [`PostgresPool`] hands out [`PostgresConnection`]s that hold their pooled
//! client for as long as they live, so a `SET search_path` issued on one
//! stays in effect for every following statement on the same connection.

use tenant_schemas_core::{SchemaName, TenantError};
use tokio_postgres::types::ToSql;

use crate::base::{ConnectionPool, DatabaseConfig, DatabaseConnection, MIGRATIONS_TABLE};

/// A PostgreSQL connection pool.
pub struct PostgresPool {
    pool: deadpool_postgres::Pool,
}

impl PostgresPool {
    /// Wraps an existing `deadpool-postgres` pool.
    pub const fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }

    /// Creates a pool from a [`DatabaseConfig`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the pool cannot be created.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, TenantError> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.dbname = Some(config.name.clone());
        pg_config.host = config.host.clone();
        pg_config.port = config.port;
        pg_config.user = config.user.clone();
        pg_config.password = config.password.clone();
        pg_config.application_name = config.options.get("application_name").cloned();
        pg_config.pool = Some(deadpool_postgres::PoolConfig::new(config.pool_size.max(1)));

        let pool = pg_config
            .create_pool(
                Some(deadpool_postgres::Runtime::Tokio1),
                tokio_postgres::NoTls,
            )
            .map_err(|e| TenantError::ConfigurationError(format!("failed to create pool: {e}")))?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl ConnectionPool for PostgresPool {
    fn vendor(&self) -> &str {
        "postgresql"
    }

    fn max_size(&self) -> usize {
        self.pool.status().max_size
    }

    async fn acquire(&self) -> Result<Box<dyn DatabaseConnection>, TenantError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| TenantError::Infrastructure(format!("pool error: {e}")))?;
        Ok(Box::new(PostgresConnection { client }))
    }
}

/// A dedicated PostgreSQL connection checked out of a [`PostgresPool`].
pub struct PostgresConnection {
    client: deadpool_postgres::Object,
}

/// Maps a statement error; a closed connection is an infrastructure failure.
fn statement_error(e: &tokio_postgres::Error) -> TenantError {
    if e.is_closed() {
        TenantError::OperationalError(format!("{e}"))
    } else {
        TenantError::DatabaseError(format!("{e}"))
    }
}

fn bind<'a>(params: &'a [&'a str]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// Builds the `SET search_path` statement for a schema switch.
pub(crate) fn search_path_sql(schema: &SchemaName, public: &SchemaName, include_public: bool) -> String {
    if include_public && schema != public {
        format!("SET search_path TO {}, {}", schema.quoted(), public.quoted())
    } else {
        format!("SET search_path TO {}", schema.quoted())
    }
}

#[async_trait::async_trait]
impl DatabaseConnection for PostgresConnection {
    fn vendor(&self) -> &str {
        "postgresql"
    }

    async fn set_search_path(
        &mut self,
        schema: &SchemaName,
        public: &SchemaName,
        include_public: bool,
    ) -> Result<(), TenantError> {
        let sql = search_path_sql(schema, public, include_public);
        self.client
            .batch_execute(&sql)
            .await
            .map_err(|e| statement_error(&e))
    }

    async fn current_schema(&mut self) -> Result<String, TenantError> {
        let row = self
            .client
            .query_one("SELECT current_schema()", &[])
            .await
            .map_err(|e| statement_error(&e))?;
        let schema: Option<String> = row.try_get(0).map_err(|e| statement_error(&e))?;
        Ok(schema.unwrap_or_default())
    }

    async fn schema_exists(&mut self, schema: &SchemaName) -> Result<bool, TenantError> {
        let rows = self
            .query_column(
                "SELECT schema_name::text FROM information_schema.schemata WHERE schema_name = $1",
                &[schema.as_str()],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool, TenantError> {
        let rows = self
            .query_column(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1",
                &[table],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, TenantError> {
        self.client
            .execute(sql, &[])
            .await
            .map_err(|e| statement_error(&e))
    }

    async fn query_column(&mut self, sql: &str, params: &[&str]) -> Result<Vec<String>, TenantError> {
        let rows = self
            .client
            .query(sql, &bind(params))
            .await
            .map_err(|e| statement_error(&e))?;
        rows.iter()
            .map(|row| {
                row.try_get::<_, Option<String>>(0)
                    .map(Option::unwrap_or_default)
                    .map_err(|e| statement_error(&e))
            })
            .collect()
    }

    async fn ensure_migrations_table(&mut self) -> Result<(), TenantError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{MIGRATIONS_TABLE}\" (\
                \"id\" BIGSERIAL PRIMARY KEY, \
                \"app\" VARCHAR(255) NOT NULL, \
                \"name\" VARCHAR(255) NOT NULL, \
                \"applied\" TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP\
            )"
        );
        self.client
            .batch_execute(&sql)
            .await
            .map_err(|e| statement_error(&e))
    }

    async fn applied_migrations(&mut self) -> Result<Vec<(String, String)>, TenantError> {
        if !self.table_exists(MIGRATIONS_TABLE).await? {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT \"app\", \"name\" FROM \"{MIGRATIONS_TABLE}\" ORDER BY \"id\"");
        let rows = self
            .client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| statement_error(&e))?;
        rows.iter()
            .map(|row| {
                let app: String = row.try_get("app").map_err(|e| statement_error(&e))?;
                let name: String = row.try_get("name").map_err(|e| statement_error(&e))?;
                Ok((app, name))
            })
            .collect()
    }

    async fn record_migration(&mut self, app_label: &str, name: &str) -> Result<(), TenantError> {
        let sql = format!(
            "INSERT INTO \"{MIGRATIONS_TABLE}\" (\"app\", \"name\", \"applied\") \
             VALUES ($1, $2, CURRENT_TIMESTAMP)"
        );
        self.client
            .execute(sql.as_str(), &bind(&[app_label, name]))
            .await
            .map(|_| ())
            .map_err(|e| statement_error(&e))
    }

    async fn unrecord_migration(&mut self, app_label: &str, name: &str) -> Result<(), TenantError> {
        let sql = format!(
            "DELETE FROM \"{MIGRATIONS_TABLE}\" WHERE \"app\" = $1 AND \"name\" = $2"
        );
        self.client
            .execute(sql.as_str(), &bind(&[app_label, name]))
            .await
            .map(|_| ())
            .map_err(|e| statement_error(&e))
    }
}
