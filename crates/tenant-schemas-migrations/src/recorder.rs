//! Per-schema applied-migration bookkeeping.
//!
//! The [`MigrationRecorder`] mirrors the ledger table of the schema that is
//! active on a connection. Loading never creates the table, so planning a
//! schema that has never been migrated performs no writes.

use std::collections::HashSet;

use tenant_schemas_core::TenantError;
use tenant_schemas_db::DatabaseConnection;

use crate::migration::MigrationKey;

/// Tracks which migrations have been applied to one schema.
///
/// The in-memory set is the source of truth for plan building; the ledger
/// table in the active schema provides persistence across runs.
#[derive(Debug, Clone, Default)]
pub struct MigrationRecorder {
    applied_migrations: HashSet<MigrationKey>,
    has_table: bool,
}

impl MigrationRecorder {
    /// Creates a new empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the ledger of the connection's active schema.
    ///
    /// A missing ledger table yields an empty recorder; nothing is created.
    pub async fn load(connection: &mut dyn DatabaseConnection) -> Result<Self, TenantError> {
        let has_table = connection
            .table_exists(tenant_schemas_db::MIGRATIONS_TABLE)
            .await?;
        let applied_migrations = if has_table {
            connection.applied_migrations().await?.into_iter().collect()
        } else {
            HashSet::new()
        };
        Ok(Self {
            applied_migrations,
            has_table,
        })
    }

    /// Creates the ledger table in the active schema if needed.
    pub async fn ensure_table(&mut self, connection: &mut dyn DatabaseConnection) -> Result<(), TenantError> {
        if !self.has_table {
            connection.ensure_migrations_table().await?;
            self.has_table = true;
        }
        Ok(())
    }

    /// Records a migration as applied, in memory and in the ledger.
    pub async fn record_applied(
        &mut self,
        connection: &mut dyn DatabaseConnection,
        key: &MigrationKey,
    ) -> Result<(), TenantError> {
        connection.record_migration(&key.0, &key.1).await?;
        self.apply(key.clone());
        Ok(())
    }

    /// Records a migration as unapplied, in memory and in the ledger.
    pub async fn record_unapplied(
        &mut self,
        connection: &mut dyn DatabaseConnection,
        key: &MigrationKey,
    ) -> Result<(), TenantError> {
        connection.unrecord_migration(&key.0, &key.1).await?;
        self.unapply(key);
        Ok(())
    }

    /// Marks a migration as applied (in-memory only).
    pub fn apply(&mut self, key: MigrationKey) {
        self.applied_migrations.insert(key);
    }

    /// Marks a migration as unapplied (in-memory only).
    pub fn unapply(&mut self, key: &MigrationKey) {
        self.applied_migrations.remove(key);
    }

    /// Returns the set of applied migrations.
    pub fn applied(&self) -> &HashSet<MigrationKey> {
        &self.applied_migrations
    }

    /// Returns whether a specific migration has been applied.
    pub fn is_applied(&self, key: &MigrationKey) -> bool {
        self.applied_migrations.contains(key)
    }

    /// Returns whether the ledger table was found (or created).
    pub fn has_table(&self) -> bool {
        self.has_table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenant_schemas_core::SchemaName;
    use tenant_schemas_db::{ConnectionPool, InMemoryPool};

    fn key(app: &str, name: &str) -> MigrationKey {
        (app.to_string(), name.to_string())
    }

    async fn connection(pool: &InMemoryPool, schema: &str) -> Box<dyn DatabaseConnection> {
        let mut conn = pool.acquire().await.unwrap();
        let public = SchemaName::parse("public").unwrap();
        conn.set_search_path(&SchemaName::parse(schema).unwrap(), &public, true)
            .await
            .unwrap();
        conn
    }

    #[test]
    fn test_apply_and_unapply_in_memory() {
        let mut recorder = MigrationRecorder::new();
        recorder.apply(key("shop", "0001"));
        assert!(recorder.is_applied(&key("shop", "0001")));
        recorder.unapply(&key("shop", "0001"));
        assert!(recorder.applied().is_empty());
    }

    #[tokio::test]
    async fn test_load_does_not_create_table() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let mut conn = connection(&pool, "t1").await;

        let recorder = MigrationRecorder::load(conn.as_mut()).await.unwrap();
        assert!(!recorder.has_table());
        assert!(recorder.applied().is_empty());
        assert!(pool.tables_in("t1").is_empty());
        assert!(pool.statements().is_empty());
    }

    #[tokio::test]
    async fn test_record_roundtrip_through_ledger() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let mut conn = connection(&pool, "t1").await;

        let mut recorder = MigrationRecorder::load(conn.as_mut()).await.unwrap();
        recorder.ensure_table(conn.as_mut()).await.unwrap();
        recorder
            .record_applied(conn.as_mut(), &key("shop", "0001_initial"))
            .await
            .unwrap();

        let reloaded = MigrationRecorder::load(conn.as_mut()).await.unwrap();
        assert!(reloaded.has_table());
        assert!(reloaded.is_applied(&key("shop", "0001_initial")));

        recorder
            .record_unapplied(conn.as_mut(), &key("shop", "0001_initial"))
            .await
            .unwrap();
        assert!(pool.applied_in("t1").is_empty());
    }
}
