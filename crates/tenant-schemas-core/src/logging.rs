//! Logging integration for tenant-schemas.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings) and for creating per-run and
//! per-schema spans.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The log level is read from `settings.log_level` (e.g. "debug", "info", "warn",
/// "error"). In debug mode a pretty, human-readable format is used; otherwise
/// a structured JSON format is used. Logs go to stderr so reports on stdout
/// stay parseable. Installing a second subscriber is a no-op.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a span covering one `run_migrations` call.
///
/// # Examples
///
/// ```
/// use tenant_schemas_core::logging::run_span;
///
/// let span = run_span("7d1f0c", "parallel", 12);
/// let _guard = span.enter();
/// tracing::info!("starting");
/// ```
pub fn run_span(run_id: &str, executor: &str, targets: usize) -> tracing::Span {
    tracing::info_span!("migrate_schemas", run = run_id, executor, targets)
}

/// Creates a span for migrating a single schema.
///
/// `idx` is 1-based. The `progress` field renders as
/// `[3/10 (30%) tenant_a:parallel]` so interleaved lane output stays readable.
pub fn schema_span(schema: &str, executor: &str, idx: usize, count: usize) -> tracing::Span {
    let progress = progress_label(schema, executor, idx, count);
    tracing::info_span!("schema", schema, executor, progress = %progress)
}

/// Formats the `[idx/count (pct%) schema:executor]` progress label.
pub fn progress_label(schema: &str, executor: &str, idx: usize, count: usize) -> String {
    if count == 0 {
        return format!("[{schema}:{executor}]");
    }
    let percent = idx * 100 / count;
    format!("[{idx}/{count} ({percent}%) {schema}:{executor}]")
}
