//! Schema context switching.
//!
//! A [`SchemaContext`] owns one database connection and tracks which schema
//! that connection currently resolves names in. [`SchemaContext::activate`]
//! switches to a schema and hands back an [`ActivationHandle`]; releasing the
//! handle restores the previous schema.
//!
//! The active schema is connection state, so a `SchemaContext` is owned by
//! exactly one worker and is deliberately not `Clone`.
//!
//! ```rust,no_run
//! # use tenant_schemas_core::{SchemaName, TenantError};
//! # use tenant_schemas_db::{ConnectionPool, SchemaContext};
//! # async fn demo(pool: &dyn ConnectionPool) -> Result<(), TenantError> {
//! let public = SchemaName::parse("public")?;
//! let mut context = SchemaContext::new(pool.acquire().await?, public).await?;
//!
//! let tenant = SchemaName::parse("tenant_acme")?;
//! let mut handle = context.activate(&tenant).await?;
//! let result = handle.connection().execute("SELECT 1").await;
//! handle.release().await?;
//! result?;
//! # Ok(())
//! # }
//! ```

use tenant_schemas_core::{SchemaName, TenantError};

use crate::base::DatabaseConnection;

/// A dedicated connection plus the schema it is currently switched to.
pub struct SchemaContext {
    connection: Box<dyn DatabaseConnection>,
    public: SchemaName,
    active: SchemaName,
    include_public: bool,
    dirty: bool,
    activations: u64,
}

impl SchemaContext {
    /// Wraps a connection and switches it to the public schema baseline.
    pub async fn new(
        connection: Box<dyn DatabaseConnection>,
        public: SchemaName,
    ) -> Result<Self, TenantError> {
        let mut context = Self {
            connection,
            active: public.clone(),
            public,
            include_public: true,
            dirty: false,
            activations: 0,
        };
        context.reset().await?;
        Ok(context)
    }

    /// Controls whether tenant schemas keep the public schema on the search path.
    ///
    /// Enabled by default so shared tables stay visible to tenant migrations.
    #[must_use]
    pub fn include_public(mut self, include_public: bool) -> Self {
        self.include_public = include_public;
        self
    }

    /// Returns the schema the connection is currently switched to.
    pub fn active_schema(&self) -> &SchemaName {
        &self.active
    }

    /// Returns the public schema this context falls back to.
    pub fn public_schema(&self) -> &SchemaName {
        &self.public
    }

    /// Returns `true` if a handle was dropped without being released.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of successful activations on this context.
    pub fn activation_count(&self) -> u64 {
        self.activations
    }

    /// Switches the connection to `schema`.
    ///
    /// If an earlier handle leaked (dropped without [`ActivationHandle::release`]),
    /// the connection is first reset to the public baseline. Backend rejections
    /// surface as [`TenantError::SchemaActivation`]; a dead connection surfaces
    /// as an infrastructure error.
    pub async fn activate(&mut self, schema: &SchemaName) -> Result<ActivationHandle<'_>, TenantError> {
        if self.dirty {
            tracing::warn!(
                leaked = %self.active,
                "schema context was not released, restoring {}",
                self.public
            );
            self.reset().await.map_err(|e| {
                TenantError::Infrastructure(format!("failed to restore schema context: {e}"))
            })?;
        }

        let previous = self.active.clone();
        self.switch(schema).await?;
        self.activations += 1;
        tracing::debug!(schema = %schema, previous = %previous, "schema activated");

        Ok(ActivationHandle {
            context: self,
            schema: schema.clone(),
            previous,
            released: false,
        })
    }

    /// Direct access to the underlying connection, in whatever schema is active.
    pub fn connection(&mut self) -> &mut dyn DatabaseConnection {
        self.connection.as_mut()
    }

    /// Consumes the context and returns the connection.
    pub fn into_connection(self) -> Box<dyn DatabaseConnection> {
        self.connection
    }

    async fn reset(&mut self) -> Result<(), TenantError> {
        let public = self.public.clone();
        self.switch(&public).await?;
        self.dirty = false;
        Ok(())
    }

    async fn switch(&mut self, schema: &SchemaName) -> Result<(), TenantError> {
        let include_public = self.include_public && *schema != self.public;
        self.connection
            .set_search_path(schema, &self.public, include_public)
            .await
            .map_err(|e| match e {
                TenantError::SchemaActivation { .. } => e,
                e if e.is_infrastructure() => e,
                e => TenantError::SchemaActivation {
                    schema: schema.to_string(),
                    message: e.to_string(),
                },
            })?;
        self.active = schema.clone();
        Ok(())
    }
}

/// A scoped schema activation.
///
/// Call [`release`](Self::release) on every exit path. A handle dropped
/// without release marks its context dirty, and the next activation on that
/// context restores the public baseline before doing anything else.
pub struct ActivationHandle<'a> {
    context: &'a mut SchemaContext,
    schema: SchemaName,
    previous: SchemaName,
    released: bool,
}

impl ActivationHandle<'_> {
    /// The schema this handle activated.
    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }

    /// The schema that will be restored on release.
    pub fn previous(&self) -> &SchemaName {
        &self.previous
    }

    /// The connection, switched to [`schema`](Self::schema).
    pub fn connection(&mut self) -> &mut dyn DatabaseConnection {
        self.context.connection.as_mut()
    }

    /// Restores the previous schema.
    ///
    /// If restoring fails the context stays dirty, so the next activation
    /// retries the reset before switching.
    pub async fn release(mut self) -> Result<(), TenantError> {
        self.released = true;
        let previous = self.previous.clone();
        let result = self.context.switch(&previous).await;
        if result.is_err() {
            self.context.dirty = true;
        }
        tracing::debug!(schema = %self.schema, restored = %previous, ok = result.is_ok(), "schema released");
        result
    }
}

impl Drop for ActivationHandle<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.context.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPool;
    use crate::ConnectionPool;

    fn name(s: &str) -> SchemaName {
        SchemaName::parse(s).unwrap()
    }

    async fn context(pool: &InMemoryPool) -> SchemaContext {
        SchemaContext::new(pool.acquire().await.unwrap(), name("public"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_context_starts_on_public() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let mut ctx = context(&pool).await;
        assert_eq!(ctx.active_schema().as_str(), "public");
        assert_eq!(ctx.connection().current_schema().await.unwrap(), "public");
        assert!(!ctx.is_dirty());
    }

    #[tokio::test]
    async fn test_activate_and_release_restores_previous() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let mut ctx = context(&pool).await;

        let mut handle = ctx.activate(&name("t1")).await.unwrap();
        assert_eq!(handle.connection().current_schema().await.unwrap(), "t1");
        assert_eq!(handle.previous().as_str(), "public");
        handle.release().await.unwrap();

        assert_eq!(ctx.active_schema().as_str(), "public");
        assert_eq!(ctx.connection().current_schema().await.unwrap(), "public");
        assert_eq!(ctx.activation_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_marks_dirty_and_next_activation_resets() {
        let pool = InMemoryPool::with_schemas(["public", "t1", "t2"]);
        let mut ctx = context(&pool).await;

        {
            let _handle = ctx.activate(&name("t1")).await.unwrap();
        }
        assert!(ctx.is_dirty());
        assert_eq!(ctx.active_schema().as_str(), "t1");

        let handle = ctx.activate(&name("t2")).await.unwrap();
        assert_eq!(handle.previous().as_str(), "public");
        handle.release().await.unwrap();
        assert!(!ctx.is_dirty());

        let paths: Vec<String> = pool.activations().into_iter().map(|a| a.schema).collect();
        assert_eq!(paths, vec!["public", "t1", "public", "t2", "public"]);
    }

    #[tokio::test]
    async fn test_rejected_activation_is_schema_activation_error() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        pool.fail_activation_for("t1");
        let mut ctx = context(&pool).await;

        let err = ctx.activate(&name("t1")).await.err().unwrap();
        assert!(matches!(err, TenantError::SchemaActivation { .. }));
        assert_eq!(ctx.active_schema().as_str(), "public");
    }

    #[tokio::test]
    async fn test_missing_schema_is_rejected() {
        let pool = InMemoryPool::with_schemas(["public"]);
        let mut ctx = context(&pool).await;
        let err = ctx.activate(&name("ghost")).await.err().unwrap();
        assert!(matches!(err, TenantError::SchemaActivation { .. }));
    }

    #[tokio::test]
    async fn test_broken_connection_is_infrastructure_error() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        pool.break_connection_on("t1");
        let mut ctx = context(&pool).await;
        let err = ctx.activate(&name("t1")).await.err().unwrap();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn test_include_public_on_search_path() {
        let pool = InMemoryPool::with_schemas(["public", "t1"]);
        let mut ctx = context(&pool).await;
        ctx.activate(&name("t1")).await.unwrap().release().await.unwrap();

        let activations = pool.activations();
        assert!(!activations[0].include_public);
        assert!(activations[1].include_public);

        let mut ctx = context(&pool).await.include_public(false);
        ctx.activate(&name("t1")).await.unwrap().release().await.unwrap();
        let activations = pool.activations();
        let tenant = &activations[activations.len() - 2];
        assert_eq!(tenant.schema, "t1");
        assert!(!tenant.include_public);
    }
}
