//! In-memory database backend.
//!
//! [`InMemoryPool`] keeps schemas, tables, and each schema's migration ledger
//! in process memory. It enforces the same connection-scoped schema switching
//! as a real server, records every activation and statement it sees, and can
//! be told to fail in specific ways. That makes it the backend of choice for
//! tests and dry local runs; nothing is persisted.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tenant_schemas_core::{SchemaName, TenantError};

use crate::base::{ConnectionPool, DatabaseConnection, MIGRATIONS_TABLE};

static CREATE_TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:"?\w+"?\.)?"?(\w+)"?"#)
        .expect("valid create table regex")
});

static DROP_TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*DROP\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:"?\w+"?\.)?"?(\w+)"?"#)
        .expect("valid drop table regex")
});

static CREATE_SCHEMA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*CREATE\s+SCHEMA\s+(?:IF\s+NOT\s+EXISTS\s+)?"?(\w+)"?"#)
        .expect("valid create schema regex")
});

static FROM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bFROM\s+(?:"?(\w+)"?\.)?"?(\w+)"?"#).expect("valid from regex")
});

/// One recorded `set_search_path` attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// The schema that was requested.
    pub schema: String,
    /// Whether the public schema was kept on the search path.
    pub include_public: bool,
    /// Whether the switch was accepted.
    pub succeeded: bool,
}

/// One recorded statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    /// The schema that was active when the statement ran.
    pub schema: String,
    /// The statement text.
    pub sql: String,
}

#[derive(Debug, Clone, Default)]
struct SchemaData {
    tables: BTreeSet<String>,
    ledger: Vec<(String, String)>,
    rows: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
struct Faults {
    activation: HashSet<String>,
    broken_on: HashSet<String>,
    statement_markers: Vec<String>,
    acquisitions: HashSet<usize>,
}

#[derive(Debug, Default)]
struct MemoryState {
    schemas: BTreeMap<String, SchemaData>,
    activations: Vec<Activation>,
    statements: Vec<ExecutedStatement>,
    acquisitions: usize,
    live: usize,
    peak_live: usize,
    faults: Faults,
}

type SharedState = Arc<Mutex<MemoryState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-memory connection pool.
///
/// # Examples
///
/// ```
/// use tenant_schemas_db::{ConnectionPool, InMemoryPool};
///
/// let pool = InMemoryPool::with_schemas(["public", "tenant_a"]).with_max_size(2);
/// assert_eq!(pool.max_size(), 2);
/// assert!(pool.schema_names().contains(&"tenant_a".to_string()));
/// ```
#[derive(Clone)]
pub struct InMemoryPool {
    state: SharedState,
    max_size: usize,
    statement_delay: Option<Duration>,
}

impl Default for InMemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPool {
    /// Creates a pool with only the `public` schema and room for 16 connections.
    pub fn new() -> Self {
        Self::with_schemas(["public"])
    }

    /// Creates a pool with exactly the given schemas.
    pub fn with_schemas<I, S>(schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = MemoryState {
            schemas: schemas
                .into_iter()
                .map(|s| (s.into(), SchemaData::default()))
                .collect(),
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            max_size: 16,
            statement_delay: None,
        }
    }

    /// Sets the maximum number of simultaneously checked-out connections.
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Makes every statement take at least `delay`, to widen race windows.
    #[must_use]
    pub fn with_statement_delay(mut self, delay: Duration) -> Self {
        self.statement_delay = Some(delay);
        self
    }

    // ── Schema management ────────────────────────────────────────────

    /// Creates an empty schema.
    pub fn create_schema(&self, schema: &str) {
        lock(&self.state)
            .schemas
            .entry(schema.to_string())
            .or_default();
    }

    /// Drops a schema and everything in it.
    pub fn drop_schema(&self, schema: &str) {
        lock(&self.state).schemas.remove(schema);
    }

    /// Names of all schemas, sorted.
    pub fn schema_names(&self) -> Vec<String> {
        lock(&self.state).schemas.keys().cloned().collect()
    }

    /// Stores values returned by `SELECT ... FROM table` inside `schema`.
    pub fn insert_column_values<I, S>(&self, schema: &str, table: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = lock(&self.state);
        let data = state.schemas.entry(schema.to_string()).or_default();
        data.tables.insert(table.to_string());
        data.rows
            .entry(table.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    // ── Fault injection ──────────────────────────────────────────────

    /// Makes every switch to `schema` fail as if the server rejected it.
    pub fn fail_activation_for(&self, schema: &str) {
        lock(&self.state)
            .faults
            .activation
            .insert(schema.to_string());
    }

    /// Makes the connection die when it is switched to `schema`.
    ///
    /// The failing connection stays broken; other connections are unaffected.
    pub fn break_connection_on(&self, schema: &str) {
        lock(&self.state)
            .faults
            .broken_on
            .insert(schema.to_string());
    }

    /// Makes any statement containing `marker` fail.
    pub fn fail_statements_containing(&self, marker: &str) {
        lock(&self.state)
            .faults
            .statement_markers
            .push(marker.to_string());
    }

    /// Makes the `nth` (1-based) call to [`acquire`](ConnectionPool::acquire) fail.
    pub fn fail_acquisition(&self, nth: usize) {
        lock(&self.state).faults.acquisitions.insert(nth);
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// Every schema switch attempted so far, in order.
    pub fn activations(&self) -> Vec<Activation> {
        lock(&self.state).activations.clone()
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        lock(&self.state).statements.clone()
    }

    /// Statements executed while `schema` was active.
    pub fn statements_in(&self, schema: &str) -> Vec<String> {
        lock(&self.state)
            .statements
            .iter()
            .filter(|s| s.schema == schema)
            .map(|s| s.sql.clone())
            .collect()
    }

    /// The migration ledger of `schema`, in recording order.
    pub fn applied_in(&self, schema: &str) -> Vec<(String, String)> {
        lock(&self.state)
            .schemas
            .get(schema)
            .map(|data| data.ledger.clone())
            .unwrap_or_default()
    }

    /// Tables existing in `schema`.
    pub fn tables_in(&self, schema: &str) -> Vec<String> {
        lock(&self.state)
            .schemas
            .get(schema)
            .map(|data| data.tables.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of `acquire` calls so far.
    pub fn acquisitions(&self) -> usize {
        lock(&self.state).acquisitions
    }

    /// Number of connections currently checked out.
    pub fn live_connections(&self) -> usize {
        lock(&self.state).live
    }

    /// Highest number of connections checked out at the same time.
    pub fn peak_connections(&self) -> usize {
        lock(&self.state).peak_live
    }
}

#[async_trait::async_trait]
impl ConnectionPool for InMemoryPool {
    fn vendor(&self) -> &str {
        "memory"
    }

    fn max_size(&self) -> usize {
        self.max_size
    }

    async fn acquire(&self) -> Result<Box<dyn DatabaseConnection>, TenantError> {
        let mut state = lock(&self.state);
        state.acquisitions += 1;
        let nth = state.acquisitions;

        if state.faults.acquisitions.contains(&nth) {
            return Err(TenantError::Infrastructure(format!(
                "connection refused (acquisition #{nth})"
            )));
        }
        if state.live >= self.max_size {
            return Err(TenantError::Infrastructure(format!(
                "connection pool exhausted (max_size {})",
                self.max_size
            )));
        }

        state.live += 1;
        state.peak_live = state.peak_live.max(state.live);
        drop(state);

        Ok(Box::new(InMemoryConnection {
            state: Arc::clone(&self.state),
            search_path: Vec::new(),
            broken: false,
            snapshot: None,
            statement_delay: self.statement_delay,
        }))
    }
}

/// A connection checked out of an [`InMemoryPool`].
pub struct InMemoryConnection {
    state: SharedState,
    search_path: Vec<String>,
    broken: bool,
    snapshot: Option<(String, Option<SchemaData>)>,
    statement_delay: Option<Duration>,
}

impl InMemoryConnection {
    fn check_alive(&self) -> Result<(), TenantError> {
        if self.broken {
            return Err(TenantError::OperationalError(
                "connection already closed".to_string(),
            ));
        }
        Ok(())
    }

    fn active(&self) -> Result<String, TenantError> {
        self.search_path.first().cloned().ok_or_else(|| {
            TenantError::DatabaseError("no schema has been selected to create in".to_string())
        })
    }

    async fn delay(&self) {
        if let Some(delay) = self.statement_delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn write(&self, sql: String, apply: impl FnOnce(&mut SchemaData)) -> Result<(), TenantError> {
        let schema = self.active()?;
        let mut state = lock(&self.state);
        state.statements.push(ExecutedStatement {
            schema: schema.clone(),
            sql,
        });
        let data = state.schemas.get_mut(&schema).ok_or_else(|| {
            TenantError::DatabaseError(format!("schema \"{schema}\" does not exist"))
        })?;
        apply(data);
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.live = state.live.saturating_sub(1);
    }
}

#[async_trait::async_trait]
impl DatabaseConnection for InMemoryConnection {
    fn vendor(&self) -> &str {
        "memory"
    }

    async fn set_search_path(
        &mut self,
        schema: &SchemaName,
        public: &SchemaName,
        include_public: bool,
    ) -> Result<(), TenantError> {
        self.check_alive()?;
        let name = schema.as_str().to_string();
        let mut state = lock(&self.state);

        let outcome = if state.faults.broken_on.contains(&name) {
            self.broken = true;
            Err(TenantError::OperationalError(
                "server closed the connection unexpectedly".to_string(),
            ))
        } else if state.faults.activation.contains(&name) {
            Err(TenantError::DatabaseError(format!(
                "permission denied for schema {name}"
            )))
        } else if !state.schemas.contains_key(&name) {
            Err(TenantError::DatabaseError(format!(
                "schema \"{name}\" does not exist"
            )))
        } else {
            Ok(())
        };

        state.activations.push(Activation {
            schema: name.clone(),
            include_public,
            succeeded: outcome.is_ok(),
        });
        drop(state);

        outcome?;
        self.search_path = vec![name];
        if include_public {
            self.search_path.push(public.as_str().to_string());
        }
        Ok(())
    }

    async fn current_schema(&mut self) -> Result<String, TenantError> {
        self.check_alive()?;
        self.active()
    }

    async fn schema_exists(&mut self, schema: &SchemaName) -> Result<bool, TenantError> {
        self.check_alive()?;
        Ok(lock(&self.state).schemas.contains_key(schema.as_str()))
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool, TenantError> {
        self.check_alive()?;
        let schema = self.active()?;
        Ok(lock(&self.state)
            .schemas
            .get(&schema)
            .is_some_and(|data| data.tables.contains(table)))
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, TenantError> {
        self.check_alive()?;
        self.delay().await;
        let schema = self.active()?;
        let keyword = sql.trim().to_uppercase();

        let mut state = lock(&self.state);
        state.statements.push(ExecutedStatement {
            schema: schema.clone(),
            sql: sql.to_string(),
        });

        match keyword.as_str() {
            "BEGIN" => {
                self.snapshot = Some((schema.clone(), state.schemas.get(&schema).cloned()));
                return Ok(0);
            }
            "COMMIT" => {
                self.snapshot = None;
                return Ok(0);
            }
            "ROLLBACK" => {
                if let Some((snapshot_schema, data)) = self.snapshot.take() {
                    match data {
                        Some(data) => state.schemas.insert(snapshot_schema, data),
                        None => state.schemas.remove(&snapshot_schema),
                    };
                }
                return Ok(0);
            }
            _ => {}
        }

        if let Some(marker) = state
            .faults
            .statement_markers
            .iter()
            .find(|m| sql.contains(m.as_str()))
        {
            return Err(TenantError::DatabaseError(format!(
                "statement failed ({marker}): {sql}"
            )));
        }

        if let Some(caps) = CREATE_SCHEMA_RE.captures(sql) {
            state.schemas.entry(caps[1].to_string()).or_default();
            return Ok(0);
        }

        let data = state.schemas.get_mut(&schema).ok_or_else(|| {
            TenantError::DatabaseError(format!("schema \"{schema}\" does not exist"))
        })?;
        if let Some(caps) = CREATE_TABLE_RE.captures(sql) {
            data.tables.insert(caps[1].to_string());
        } else if let Some(caps) = DROP_TABLE_RE.captures(sql) {
            data.tables.remove(&caps[1]);
            data.rows.remove(&caps[1]);
        }
        Ok(0)
    }

    async fn query_column(&mut self, sql: &str, _params: &[&str]) -> Result<Vec<String>, TenantError> {
        self.check_alive()?;
        self.delay().await;
        let caps = FROM_RE.captures(sql).ok_or_else(|| {
            TenantError::DatabaseError(format!("unsupported query: {sql}"))
        })?;
        let schema = match caps.get(1) {
            Some(schema) => schema.as_str().to_string(),
            None => self.active()?,
        };
        let table = &caps[2];

        let state = lock(&self.state);
        let data = state
            .schemas
            .get(&schema)
            .filter(|data| data.tables.contains(table))
            .ok_or_else(|| {
                TenantError::DatabaseError(format!("relation \"{schema}.{table}\" does not exist"))
            })?;
        Ok(data.rows.get(table).cloned().unwrap_or_default())
    }

    async fn ensure_migrations_table(&mut self) -> Result<(), TenantError> {
        self.check_alive()?;
        if self.table_exists(MIGRATIONS_TABLE).await? {
            return Ok(());
        }
        self.write(
            format!("CREATE TABLE IF NOT EXISTS \"{MIGRATIONS_TABLE}\""),
            |data| {
                data.tables.insert(MIGRATIONS_TABLE.to_string());
            },
        )
    }

    async fn applied_migrations(&mut self) -> Result<Vec<(String, String)>, TenantError> {
        self.check_alive()?;
        let schema = self.active()?;
        Ok(lock(&self.state)
            .schemas
            .get(&schema)
            .filter(|data| data.tables.contains(MIGRATIONS_TABLE))
            .map(|data| data.ledger.clone())
            .unwrap_or_default())
    }

    async fn record_migration(&mut self, app_label: &str, name: &str) -> Result<(), TenantError> {
        self.check_alive()?;
        if !self.table_exists(MIGRATIONS_TABLE).await? {
            return Err(TenantError::DatabaseError(format!(
                "relation \"{MIGRATIONS_TABLE}\" does not exist"
            )));
        }
        let key = (app_label.to_string(), name.to_string());
        self.write(
            format!("INSERT INTO \"{MIGRATIONS_TABLE}\" VALUES ('{app_label}', '{name}')"),
            |data| {
                if !data.ledger.contains(&key) {
                    data.ledger.push(key);
                }
            },
        )
    }

    async fn unrecord_migration(&mut self, app_label: &str, name: &str) -> Result<(), TenantError> {
        self.check_alive()?;
        self.write(
            format!(
                "DELETE FROM \"{MIGRATIONS_TABLE}\" WHERE app = '{app_label}' AND name = '{name}'"
            ),
            |data| data.ledger.retain(|(a, n)| a != app_label || n != name),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> SchemaName {
        SchemaName::parse(s).unwrap()
    }

    async fn connect(pool: &InMemoryPool, schema: &str) -> Box<dyn DatabaseConnection> {
        let mut conn = pool.acquire().await.unwrap();
        conn.set_search_path(&name(schema), &name("public"), schema != "public")
            .await
            .unwrap();
        conn
    }

    #[tokio::test]
    async fn test_pool_exhaustion() {
        let pool = InMemoryPool::new().with_max_size(1);
        let first = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();
        assert!(err.is_infrastructure());
        assert!(err.to_string().contains("exhausted"));

        drop(first);
        assert_eq!(pool.live_connections(), 0);
        assert!(pool.acquire().await.is_ok());
        assert_eq!(pool.peak_connections(), 1);
    }

    #[tokio::test]
    async fn test_fail_nth_acquisition() {
        let pool = InMemoryPool::new();
        pool.fail_acquisition(2);
        assert!(pool.acquire().await.is_ok());
        assert!(pool.acquire().await.is_err());
        assert!(pool.acquire().await.is_ok());
        assert_eq!(pool.acquisitions(), 3);
    }

    #[tokio::test]
    async fn test_statements_are_scoped_to_active_schema() {
        let pool = InMemoryPool::with_schemas(["public", "t1", "t2"]);
        let mut conn = connect(&pool, "t1").await;
        conn.execute("CREATE TABLE \"blog_post\" (id int)").await.unwrap();

        assert_eq!(pool.tables_in("t1"), vec!["blog_post"]);
        assert!(pool.tables_in("t2").is_empty());
        assert_eq!(pool.statements_in("t1").len(), 1);
        assert!(conn.table_exists("blog_post").await.unwrap());

        conn.execute("DROP TABLE IF EXISTS blog_post").await.unwrap();
        assert!(pool.tables_in("t1").is_empty());
    }

    #[tokio::test]
    async fn test_ledger_roundtrip() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let mut conn = connect(&pool, "t1").await;

        assert!(conn.applied_migrations().await.unwrap().is_empty());
        assert!(conn.record_migration("blog", "0001").await.is_err());

        conn.ensure_migrations_table().await.unwrap();
        conn.record_migration("blog", "0001").await.unwrap();
        conn.record_migration("blog", "0001").await.unwrap();
        assert_eq!(pool.applied_in("t1"), vec![("blog".into(), "0001".into())]);

        conn.unrecord_migration("blog", "0001").await.unwrap();
        assert!(pool.applied_in("t1").is_empty());
        assert!(pool.applied_in("public").is_empty());
    }

    #[tokio::test]
    async fn test_rollback_restores_schema_state() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let mut conn = connect(&pool, "t1").await;
        conn.ensure_migrations_table().await.unwrap();

        conn.begin().await.unwrap();
        conn.execute("CREATE TABLE shop_order (id int)").await.unwrap();
        conn.record_migration("shop", "0001").await.unwrap();
        conn.rollback().await.unwrap();

        assert!(!pool.tables_in("t1").contains(&"shop_order".to_string()));
        assert!(pool.applied_in("t1").is_empty());
    }

    #[tokio::test]
    async fn test_statement_fault() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        pool.fail_statements_containing("boom");
        let mut conn = connect(&pool, "t1").await;
        let err = conn.execute("SELECT boom()").await.unwrap_err();
        assert!(!err.is_infrastructure());
        assert!(conn.execute("SELECT 1").await.is_ok());
    }

    #[tokio::test]
    async fn test_broken_connection_stays_broken() {
        let pool = InMemoryPool::with_schemas(["public", "t1", "t2"]);
        pool.break_connection_on("t1");
        let mut conn = pool.acquire().await.unwrap();
        let err = conn
            .set_search_path(&name("t1"), &name("public"), true)
            .await
            .unwrap_err();
        assert!(err.is_infrastructure());
        assert!(conn.execute("SELECT 1").await.unwrap_err().is_infrastructure());

        let mut other = connect(&pool, "t2").await;
        assert!(other.execute("SELECT 1").await.is_ok());
    }

    #[tokio::test]
    async fn test_query_column_reads_qualified_table() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        pool.insert_column_values("public", "customers_client", ["t1", "public"]);
        let mut conn = connect(&pool, "t1").await;
        let rows = conn
            .query_column("SELECT \"schema_name\" FROM \"public\".\"customers_client\"", &[])
            .await
            .unwrap();
        assert_eq!(rows, vec!["t1", "public"]);

        assert!(conn.query_column("SELECT x FROM missing", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_create_schema_statement() {
        let pool = InMemoryPool::new();
        let mut conn = connect(&pool, "public").await;
        conn.execute("CREATE SCHEMA IF NOT EXISTS \"tenant_new\"").await.unwrap();
        assert!(conn.schema_exists(&name("tenant_new")).await.unwrap());
    }
}
