//! Run-scoped executor configuration.
//!
//! An [`ExecutorConfig`] is built once per invocation, validated, and then
//! shared read-only between lanes as an `Arc<ExecutorConfig>`.

use std::num::NonZeroUsize;

use serde::Serialize;
use tenant_schemas_core::{Settings, TenantError};

/// Upper bound on the default number of parallel lanes.
pub const DEFAULT_MAX_WIDTH: usize = 8;

/// Configuration shared by every target of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutorConfig {
    /// Connection alias in the settings' `databases` table.
    pub database_alias: String,
    /// Number of parallel lanes; `None` derives it from the machine and pool.
    pub concurrency_width: Option<NonZeroUsize>,
    /// Stop picking up targets after the first failure.
    pub fail_fast: bool,
    /// Describe the plan without applying anything.
    pub plan: bool,
    /// Record migrations as applied without running them.
    pub fake: bool,
    /// Fake initial migrations whose tables already exist.
    pub fake_initial: bool,
    /// Ask for confirmation before mutating.
    pub interactive: bool,
    /// Create tables for apps without migrations.
    pub run_syncdb: bool,
    /// Only check for unapplied migrations.
    pub check_unapplied: bool,
    /// Restricts the run to one app.
    pub app_label: Option<String>,
    /// Migrates the app to this migration.
    pub migration_name: Option<String>,
    /// Keep the public schema on tenant search paths.
    pub include_public: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            database_alias: "default".to_string(),
            concurrency_width: None,
            fail_fast: false,
            plan: false,
            fake: false,
            fake_initial: false,
            interactive: false,
            run_syncdb: false,
            check_unapplied: false,
            app_label: None,
            migration_name: None,
            include_public: true,
        }
    }
}

impl ExecutorConfig {
    /// Starts a builder with default values.
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::default()
    }

    /// Starts a builder seeded from the global settings.
    pub fn from_settings(settings: &Settings) -> ExecutorConfigBuilder {
        let mut builder = ExecutorConfigBuilder::default().fail_fast(settings.migration_fail_fast);
        if let Some(width) = settings.migration_parallelism {
            builder = builder.concurrency_width(width);
        }
        builder
    }

    /// Checks option combinations that cannot work together.
    pub fn validate(&self) -> Result<(), TenantError> {
        if self.migration_name.is_some() && self.app_label.is_none() {
            return Err(TenantError::ConfigurationError(
                "a migration name requires an app label".to_string(),
            ));
        }
        if self.database_alias.is_empty() {
            return Err(TenantError::ConfigurationError(
                "database alias must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the number of lanes for `targets` targets on a pool of `pool_size`.
    ///
    /// An explicit width is honored as given. The default is the machine's
    /// available parallelism, capped at [`DEFAULT_MAX_WIDTH`] and the pool
    /// size. Either way the result never exceeds the number of targets and is
    /// at least 1.
    pub fn resolve_width(&self, pool_size: usize, targets: usize) -> usize {
        let width = self.concurrency_width.map_or_else(
            || {
                let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
                cores.min(DEFAULT_MAX_WIDTH).min(pool_size)
            },
            NonZeroUsize::get,
        );
        width.min(targets).max(1)
    }
}

/// Builder for [`ExecutorConfig`].
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
    width: Option<usize>,
}

impl ExecutorConfigBuilder {
    /// Sets the connection alias.
    #[must_use]
    pub fn database_alias(mut self, alias: impl Into<String>) -> Self {
        self.config.database_alias = alias.into();
        self
    }

    /// Sets the number of parallel lanes. Zero is rejected by [`build`](Self::build).
    #[must_use]
    pub fn concurrency_width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    /// Enables or disables fail-fast.
    #[must_use]
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    /// Enables or disables plan-only mode.
    #[must_use]
    pub fn plan(mut self, plan: bool) -> Self {
        self.config.plan = plan;
        self
    }

    /// Enables or disables fake apply.
    #[must_use]
    pub fn fake(mut self, fake: bool) -> Self {
        self.config.fake = fake;
        self
    }

    /// Enables or disables faking of initial migrations.
    #[must_use]
    pub fn fake_initial(mut self, fake_initial: bool) -> Self {
        self.config.fake_initial = fake_initial;
        self
    }

    /// Enables or disables the confirmation prompt.
    #[must_use]
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.config.interactive = interactive;
        self
    }

    /// Enables or disables syncdb for unmigrated apps.
    #[must_use]
    pub fn run_syncdb(mut self, run_syncdb: bool) -> Self {
        self.config.run_syncdb = run_syncdb;
        self
    }

    /// Enables or disables the unapplied-migrations check.
    #[must_use]
    pub fn check_unapplied(mut self, check: bool) -> Self {
        self.config.check_unapplied = check;
        self
    }

    /// Scopes the run to an app and optionally one of its migrations.
    #[must_use]
    pub fn selection(mut self, app_label: Option<String>, migration_name: Option<String>) -> Self {
        self.config.app_label = app_label;
        self.config.migration_name = migration_name;
        self
    }

    /// Keeps or drops the public schema from tenant search paths.
    #[must_use]
    pub fn include_public(mut self, include_public: bool) -> Self {
        self.config.include_public = include_public;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ExecutorConfig, TenantError> {
        let mut config = self.config;
        if let Some(width) = self.width {
            config.concurrency_width = Some(NonZeroUsize::new(width).ok_or_else(|| {
                TenantError::ConfigurationError("concurrency width must be at least 1".to_string())
            })?);
        }
        config.validate()?;
        Ok(config)
    }
}
