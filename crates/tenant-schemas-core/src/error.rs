//! Core error types for tenant-schemas.
//!
//! This module provides the error enum [`TenantError`] shared by every crate in
//! the workspace, and [`ErrorKind`], the coarse classification the migration
//! executors use to decide whether an error belongs to a single target or to a
//! whole worker lane.

use thiserror::Error;

/// Coarse classification of a [`TenantError`].
///
/// Executors record per-target failures with their kind so that operators can
/// tell a broken migration apart from a broken connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid configuration: unknown executor, bad width, bad arguments.
    Configuration,
    /// The schema does not exist.
    SchemaNotFound,
    /// The backend rejected switching to the schema.
    SchemaActivation,
    /// The migration framework failed while planning or applying.
    MigrationApply,
    /// A lane-level failure: pool exhaustion, lost connection, panicked worker.
    Infrastructure,
}

impl ErrorKind {
    /// Returns a short lowercase label used in reports and log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::SchemaNotFound => "schema_not_found",
            Self::SchemaActivation => "schema_activation",
            Self::MigrationApply => "migration_apply",
            Self::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The primary error type for tenant-schemas.
///
/// Configuration-time errors are raised straight to the caller. Everything
/// that happens while migrating a single schema is captured into that
/// schema's outcome instead; see `tenant_schemas_migrations::ExecutionOutcome`.
#[derive(Error, Debug)]
pub enum TenantError {
    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The requested executor codename is not registered.
    #[error("Unknown executor '{codename}' (available: {available})")]
    UnknownExecutor {
        /// The codename that was requested.
        codename: String,
        /// Comma-separated list of registered codenames.
        available: String,
    },

    /// A schema name failed validation.
    #[error("Invalid schema name '{name}': {reason}")]
    InvalidSchemaName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    // ── Schemas ──────────────────────────────────────────────────────

    /// The named schema does not exist in the database.
    #[error("Schema \"{0}\" does not exist")]
    SchemaNotFound(String),

    /// The backend refused to switch the connection to a schema.
    #[error("Could not activate schema \"{schema}\": {message}")]
    SchemaActivation {
        /// The schema that could not be activated.
        schema: String,
        /// The backend's message.
        message: String,
    },

    // ── Migrations ───────────────────────────────────────────────────

    /// The migration framework failed to plan or apply migrations.
    #[error("Migration error: {0}")]
    MigrationApply(String),

    /// `--check` found migrations that have not been applied.
    #[error("Unapplied migrations in {0} schema(s)")]
    UnappliedMigrations(usize),

    /// One or more targets of a run failed.
    #[error("Migrations failed for {failed} of {total} schema(s)")]
    MigrationsFailed {
        /// Number of failed targets.
        failed: usize,
        /// Total number of targets.
        total: usize,
    },

    // ── Database ─────────────────────────────────────────────────────

    /// A lane-level infrastructure failure (pool exhaustion, lost connection).
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// A generic database error raised by a statement.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An operational database error (connection failure, etc.).
    #[error("Operational error: {0}")]
    OperationalError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TenantError {
    /// Returns the coarse classification of this error.
    ///
    /// Statement-level database errors count as migration failures, while
    /// operational errors (the connection itself is gone) are lane-level.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigurationError(_)
            | Self::UnknownExecutor { .. }
            | Self::InvalidSchemaName { .. } => ErrorKind::Configuration,
            Self::SchemaNotFound(_) => ErrorKind::SchemaNotFound,
            Self::SchemaActivation { .. } => ErrorKind::SchemaActivation,
            Self::MigrationApply(_)
            | Self::UnappliedMigrations(_)
            | Self::MigrationsFailed { .. }
            | Self::DatabaseError(_) => ErrorKind::MigrationApply,
            Self::Infrastructure(_) | Self::OperationalError(_) | Self::IoError(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Returns `true` if this error invalidates the connection it came from.
    pub const fn is_infrastructure(&self) -> bool {
        matches!(self.kind(), ErrorKind::Infrastructure)
    }

    /// Returns the process exit code for this error.
    ///
    /// - configuration errors -> 2
    /// - everything else -> 1
    pub const fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration => 2,
            _ => 1,
        }
    }
}

/// A convenience type alias for `Result<T, TenantError>`.
pub type TenantResult<T> = Result<T, TenantError>;
