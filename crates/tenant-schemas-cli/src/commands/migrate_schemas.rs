//! The `migrate_schemas` management command.
//!
//! Migrates the public schema and then the tenant schemas. The public pass
//! always runs on its own, before and never alongside the tenant pass; the
//! tenant pass uses whichever executor was selected.

use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tenant_schemas_core::{SchemaName, Settings, TenantError, TenantResult};
use tenant_schemas_db::{create_pool, ConnectionPool, DatabaseConfig};
use tenant_schemas_migrations::{
    ExecutionEnv, ExecutionOutcome, ExecutionReport, ExecutorConfig, ExecutorSelector,
    GraphMigrationFramework, MigrationFramework, MigrationLoader, ReportBuilder, SkipReason,
    TargetList,
};

use crate::command::ManagementCommand;
use crate::tenants::{TableTenantResolver, TenantResolver};

/// How the final report is printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// One line per schema plus a summary line.
    #[default]
    Text,
    /// The whole report as JSON.
    Json,
}

impl FromStr for OutputFormat {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(TenantError::ConfigurationError(format!(
                "unknown output format '{other}' (expected text or json)"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Parsed `migrate_schemas` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateSchemasOptions {
    /// Restrict to this app.
    pub app_label: Option<String>,
    /// Migrate the app to this migration (`zero` unapplies it).
    pub migration_name: Option<String>,
    /// Only the public schema.
    pub shared: bool,
    /// Only tenant schemas.
    pub tenant: bool,
    /// A single schema to migrate.
    pub schema_name: Option<String>,
    /// Executor codename; falls back to the settings.
    pub executor: Option<String>,
    /// Database alias.
    pub database: String,
    /// Create tables for apps without migrations.
    pub run_syncdb: bool,
    /// Ask before mutating.
    pub interactive: bool,
    /// Fail if migrations are pending, without applying them.
    pub check: bool,
    /// Show the plan without applying it.
    pub plan: bool,
    /// Record migrations without running them.
    pub fake: bool,
    /// Fake initial migrations whose tables exist.
    pub fake_initial: bool,
    /// Stop after the first failed schema.
    pub fail_fast: bool,
    /// Number of parallel lanes.
    pub parallelism: Option<usize>,
    /// Report format.
    pub format: OutputFormat,
    /// Where migration files live.
    pub migrations_dir: String,
}

impl Default for MigrateSchemasOptions {
    fn default() -> Self {
        Self {
            app_label: None,
            migration_name: None,
            shared: false,
            tenant: false,
            schema_name: None,
            executor: None,
            database: "default".to_string(),
            run_syncdb: false,
            interactive: false,
            check: false,
            plan: false,
            fake: false,
            fake_initial: false,
            fail_fast: false,
            parallelism: None,
            format: OutputFormat::Text,
            migrations_dir: "migrations".to_string(),
        }
    }
}

impl MigrateSchemasOptions {
    /// Reads options from the command's matches.
    pub fn from_matches(matches: &clap::ArgMatches) -> TenantResult<Self> {
        let string = |id: &str| matches.get_one::<String>(id).cloned();
        Ok(Self {
            app_label: string("app_label"),
            migration_name: string("migration_name"),
            shared: matches.get_flag("shared"),
            tenant: matches.get_flag("tenant"),
            schema_name: string("schema_name"),
            executor: string("executor"),
            database: string("database").unwrap_or_else(|| "default".to_string()),
            run_syncdb: matches.get_flag("run_syncdb"),
            interactive: matches.get_flag("interactive"),
            check: matches.get_flag("check"),
            plan: matches.get_flag("plan"),
            fake: matches.get_flag("fake"),
            fake_initial: matches.get_flag("fake_initial"),
            fail_fast: matches.get_flag("fail_fast"),
            parallelism: matches.get_one::<usize>("parallelism").copied(),
            format: matches
                .get_one::<String>("format")
                .map_or(Ok(OutputFormat::Text), |f| f.parse())?,
            migrations_dir: string("migrations_dir").unwrap_or_else(|| "migrations".to_string()),
        })
    }

    /// Whether the public schema is migrated.
    pub fn sync_public(&self) -> bool {
        self.shared || !self.tenant
    }

    /// Whether tenant schemas are migrated.
    pub fn sync_tenant(&self) -> bool {
        self.tenant || !self.shared
    }

    fn executor_config(&self, settings: &Settings) -> TenantResult<ExecutorConfig> {
        let mut builder = ExecutorConfig::from_settings(settings)
            .database_alias(self.database.clone())
            .plan(self.plan || self.check)
            .fake(self.fake)
            .fake_initial(self.fake_initial)
            .interactive(self.interactive)
            .run_syncdb(self.run_syncdb)
            .check_unapplied(self.check)
            .selection(self.app_label.clone(), self.migration_name.clone());
        if self.fail_fast {
            builder = builder.fail_fast(true);
        }
        if let Some(width) = self.parallelism {
            builder = builder.concurrency_width(width);
        }
        builder.build()
    }
}

/// The collaborators `migrate_schemas` runs against.
#[derive(Clone)]
pub struct MigrationBackend {
    /// Connection pool for every phase.
    pub pool: Arc<dyn ConnectionPool>,
    /// Plans and applies migrations.
    pub framework: Arc<dyn MigrationFramework>,
    /// Lists and checks tenant schemas.
    pub resolver: Arc<dyn TenantResolver>,
}

impl MigrationBackend {
    /// Builds the pool, loads migrations from disk, and reads tenants from the
    /// tenant table, all as configured in `settings`.
    pub fn from_settings(settings: &Settings, options: &MigrateSchemasOptions) -> TenantResult<Self> {
        let database = settings.database(&options.database)?;
        let pool = create_pool(&DatabaseConfig::from_settings(database))?;
        let migrations = MigrationLoader::new(&options.migrations_dir).load()?;
        let framework = Arc::new(GraphMigrationFramework::new(migrations)?);
        let resolver = Arc::new(TableTenantResolver::from_settings(Arc::clone(&pool), settings)?);
        Ok(Self {
            pool,
            framework,
            resolver,
        })
    }
}

/// Asks the operator a yes/no question.
pub type Confirm = Arc<dyn Fn(&str) -> bool + Send + Sync>;

fn confirm_on_stdin(question: &str) -> bool {
    eprint!("{question} [y/N] ");
    if std::io::stderr().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Migrates the public schema and all tenant schemas.
pub struct MigrateSchemasCommand {
    backend: Option<MigrationBackend>,
    confirm: Confirm,
}

impl Default for MigrateSchemasCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrateSchemasCommand {
    /// A command that builds its backend from settings at run time.
    pub fn new() -> Self {
        Self {
            backend: None,
            confirm: Arc::new(confirm_on_stdin),
        }
    }

    /// A command bound to an existing backend.
    pub fn with_backend(backend: MigrationBackend) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    /// Replaces the `--interactive` confirmation prompt.
    #[must_use]
    pub fn with_confirm(mut self, confirm: Confirm) -> Self {
        self.confirm = confirm;
        self
    }

    /// Runs both phases and returns the combined report.
    ///
    /// Configuration problems (unknown executor, invalid options, a missing
    /// explicitly named schema) are returned as errors before any schema is
    /// migrated. Per-schema failures are in the report.
    pub async fn run(&self, options: &MigrateSchemasOptions, settings: &Settings) -> TenantResult<ExecutionReport> {
        let config = Arc::new(options.executor_config(settings)?);
        let codename = options
            .executor
            .as_deref()
            .unwrap_or(settings.migration_executor.as_str());
        let factory = ExecutorSelector::select(codename)?;

        let public = SchemaName::parse(settings.public_schema_name.as_str())?;
        let mut schema = options
            .schema_name
            .as_deref()
            .map(SchemaName::parse)
            .transpose()?;
        if options.sync_public() && schema.is_none() {
            schema = Some(public.clone());
        }

        let backend = match &self.backend {
            Some(backend) => backend.clone(),
            None => MigrationBackend::from_settings(settings, options)?,
        };
        let executor = factory(
            ExecutionEnv::new(Arc::clone(&backend.pool), Arc::clone(&backend.framework))
                .with_public_schema(public.clone()),
        );

        let app = options.app_label.as_deref();
        let name = options.migration_name.as_deref();
        let public_targets = match (&schema, options.sync_public()) {
            (Some(schema), true) => Some(TargetList::for_schemas([schema.clone()], app, name)?),
            _ => None,
        };
        let tenant_targets = if options.sync_tenant() {
            let schemas = match &schema {
                Some(schema) if *schema != public => {
                    if !backend.resolver.schema_exists(schema).await? {
                        return Err(TenantError::SchemaNotFound(schema.to_string()));
                    }
                    vec![schema.clone()]
                }
                _ => backend.resolver.tenant_schemas().await?,
            };
            Some(TargetList::for_schemas(schemas, app, name)?)
        } else {
            None
        };

        if config.interactive && !config.plan {
            let total = public_targets.as_ref().map_or(0, TargetList::len)
                + tenant_targets.as_ref().map_or(0, TargetList::len);
            let question = format!("Apply migrations to {total} schema(s) using the {} executor?", executor.codename());
            if total > 0 && !(self.confirm)(&question) {
                tracing::warn!("migration cancelled by operator");
                return Ok(ReportBuilder::new(executor.codename(), &TargetList::default()).finish());
            }
        }

        tracing::info!(
            executor = executor.codename(),
            public = public_targets.is_some(),
            tenants = tenant_targets.as_ref().map_or(0, TargetList::len),
            plan = config.plan,
            "migrating schemas"
        );

        let mut report: Option<ExecutionReport> = None;
        if let Some(targets) = &public_targets {
            report = Some(executor.run_migrations(targets, &config).await?);
        }
        if let Some(targets) = &tenant_targets {
            let public_failed = report.as_ref().is_some_and(ExecutionReport::has_failures);
            let tenants = if config.fail_fast && public_failed {
                tracing::warn!("public schema failed; skipping tenant schemas");
                skipped(executor.codename(), targets)
            } else {
                executor.run_migrations(targets, &config).await?
            };
            report = Some(match report {
                Some(public) => public.concat(tenants),
                None => tenants,
            });
        }

        match report {
            Some(report) => Ok(report),
            None => Ok(ReportBuilder::new(executor.codename(), &TargetList::default()).finish()),
        }
    }
}

fn skipped(codename: &str, targets: &TargetList) -> ExecutionReport {
    let mut builder = ReportBuilder::new(codename, targets);
    for index in 0..targets.len() {
        builder.record(index, ExecutionOutcome::Skipped(SkipReason::UpstreamFailure));
    }
    builder.finish()
}

/// Renders `report` in `format`.
pub fn render(report: &ExecutionReport, format: OutputFormat) -> TenantResult<String> {
    match format {
        OutputFormat::Text => Ok(report.render_text()),
        OutputFormat::Json => report
            .to_json()
            .map_err(|e| TenantError::ConfigurationError(format!("cannot serialize report: {e}"))),
    }
}

/// Maps a finished report to the command's result.
///
/// Any failed schema is an error; under `--check`, so is any schema with
/// pending migrations.
pub fn verdict(report: &ExecutionReport, check: bool) -> TenantResult<()> {
    let counts = report.counts();
    if counts.failure > 0 {
        return Err(TenantError::MigrationsFailed {
            failed: counts.failure,
            total: report.len(),
        });
    }
    if check {
        let unapplied = report
            .entries()
            .iter()
            .filter(|entry| {
                matches!(&entry.outcome, ExecutionOutcome::Skipped(SkipReason::Plan(plan)) if plan.pending > 0)
            })
            .count();
        if unapplied > 0 {
            return Err(TenantError::UnappliedMigrations(unapplied));
        }
    }
    Ok(())
}

#[async_trait]
impl ManagementCommand for MigrateSchemasCommand {
    fn name(&self) -> &'static str {
        "migrate_schemas"
    }

    fn help(&self) -> &'static str {
        "Updates database schemas. Manages both apps with migrations and those without."
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        use clap::{Arg, ArgAction};

        let flag = |id: &'static str, long: &'static str, help: &'static str| {
            Arg::new(id).long(long).action(ArgAction::SetTrue).help(help)
        };

        cmd.arg(Arg::new("app_label").help("App label of an application to synchronize the state"))
            .arg(
                Arg::new("migration_name")
                    .requires("app_label")
                    .help("Database state will be brought to the state after that migration; use \"zero\" to unapply all"),
            )
            .arg(flag("shared", "shared", "Only migrate the public schema"))
            .arg(flag("tenant", "tenant", "Only migrate tenant schemas"))
            .arg(
                Arg::new("schema_name")
                    .short('s')
                    .long("schema")
                    .value_name("SCHEMA")
                    .help("Migrate a single schema"),
            )
            .arg(
                Arg::new("executor")
                    .long("executor")
                    .value_name("CODENAME")
                    .help("Executor to use (sequential, parallel); defaults to the settings"),
            )
            .arg(
                Arg::new("database")
                    .long("database")
                    .default_value("default")
                    .help("Nominates a database to synchronize"),
            )
            .arg(flag("run_syncdb", "run-syncdb", "Creates tables for apps without migrations"))
            .arg(flag("interactive", "interactive", "Ask for confirmation before migrating"))
            .arg(flag("check", "check", "Exits with a non-zero status if unapplied migrations exist"))
            .arg(flag("plan", "plan", "Shows a list of the migration actions that will be performed"))
            .arg(flag("fake", "fake", "Mark migrations as run without actually running them"))
            .arg(flag(
                "fake_initial",
                "fake-initial",
                "Detect if tables already exist and fake-apply initial migrations if so",
            ))
            .arg(flag("fail_fast", "fail-fast", "Stop at the first schema that fails"))
            .arg(
                Arg::new("parallelism")
                    .long("parallelism")
                    .value_name("N")
                    .value_parser(clap::value_parser!(usize))
                    .help("Number of schemas migrated at once by the parallel executor"),
            )
            .arg(
                Arg::new("format")
                    .long("format")
                    .value_parser(["text", "json"])
                    .default_value("text")
                    .help("Report format"),
            )
            .arg(
                Arg::new("migrations_dir")
                    .long("migrations-dir")
                    .default_value("migrations")
                    .help("Directory holding <app>/<name>.json migration files"),
            )
    }

    async fn handle(&self, matches: &clap::ArgMatches, settings: &Settings) -> Result<(), TenantError> {
        let options = MigrateSchemasOptions::from_matches(matches)?;
        let report = self.run(&options, settings).await?;
        println!("{}", render(&report, options.format)?);
        verdict(&report, options.check)
    }
}
