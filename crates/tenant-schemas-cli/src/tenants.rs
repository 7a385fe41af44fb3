//! Resolving which schemas belong to tenants.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tenant_schemas_core::{SchemaName, Settings, TenantError, TenantResult};
use tenant_schemas_db::ConnectionPool;

/// Answers which tenant schemas exist.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    /// Every tenant schema, excluding the public schema, ordered by name.
    async fn tenant_schemas(&self) -> TenantResult<Vec<SchemaName>>;

    /// Whether `schema` exists in the database.
    async fn schema_exists(&self, schema: &SchemaName) -> TenantResult<bool>;
}

/// Reads tenant schemas from the tenant table in the public schema.
pub struct TableTenantResolver {
    pool: Arc<dyn ConnectionPool>,
    public: SchemaName,
    table: String,
    column: String,
}

impl TableTenantResolver {
    /// Creates a resolver reading `column` of `public.table`.
    pub fn new(
        pool: Arc<dyn ConnectionPool>,
        public: SchemaName,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> TenantResult<Self> {
        let table = table.into();
        let column = column.into();
        for (what, ident) in [("tenant table", &table), ("tenant schema column", &column)] {
            if ident.is_empty() || ident.contains('"') {
                return Err(TenantError::ConfigurationError(format!(
                    "{what} '{ident}' is not a valid identifier"
                )));
            }
        }
        Ok(Self {
            pool,
            public,
            table,
            column,
        })
    }

    /// Creates a resolver from `tenant_model`, `tenant_schema_column`, and
    /// `public_schema_name`.
    pub fn from_settings(pool: Arc<dyn ConnectionPool>, settings: &Settings) -> TenantResult<Self> {
        Self::new(
            pool,
            SchemaName::parse(settings.public_schema_name.as_str())?,
            settings.tenant_table()?,
            settings.tenant_schema_column.clone(),
        )
    }

    fn query(&self) -> String {
        format!(
            "SELECT \"{column}\"::text FROM {public}.\"{table}\" WHERE \"{column}\" <> $1 ORDER BY \"{column}\"",
            column = self.column,
            public = self.public.quoted(),
            table = self.table,
        )
    }
}

#[async_trait]
impl TenantResolver for TableTenantResolver {
    async fn tenant_schemas(&self) -> TenantResult<Vec<SchemaName>> {
        let mut connection = self.pool.acquire().await?;
        let rows = connection
            .query_column(&self.query(), &[self.public.as_str()])
            .await?;

        let names: BTreeSet<String> = rows
            .into_iter()
            .filter(|name| !name.is_empty() && name != self.public.as_str())
            .collect();
        let schemas = names
            .into_iter()
            .map(SchemaName::parse)
            .collect::<TenantResult<Vec<_>>>()?;
        tracing::debug!(count = schemas.len(), table = %self.table, "resolved tenant schemas");
        Ok(schemas)
    }

    async fn schema_exists(&self, schema: &SchemaName) -> TenantResult<bool> {
        let mut connection = self.pool.acquire().await?;
        connection.schema_exists(schema).await
    }
}

/// A fixed list of tenant schemas.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantResolver {
    schemas: Vec<SchemaName>,
}

impl StaticTenantResolver {
    /// Wraps `schemas`; they are reported sorted and deduplicated.
    pub fn new(schemas: impl IntoIterator<Item = SchemaName>) -> Self {
        let schemas: BTreeSet<SchemaName> = schemas.into_iter().collect();
        Self {
            schemas: schemas.into_iter().collect(),
        }
    }
}

#[async_trait]
impl TenantResolver for StaticTenantResolver {
    async fn tenant_schemas(&self) -> TenantResult<Vec<SchemaName>> {
        Ok(self.schemas.clone())
    }

    async fn schema_exists(&self, schema: &SchemaName) -> TenantResult<bool> {
        Ok(self.schemas.contains(schema))
    }
}
