//! The `tenant-schemas` management binary.

use std::process::ExitCode;

use tenant_schemas_cli::command::{settings_path, CommandRegistry};
use tenant_schemas_cli::commands::register_builtin_commands;
use tenant_schemas_core::logging::setup_logging;
use tenant_schemas_core::{settings_loader, Settings, TenantError, SETTINGS};

fn load_settings(path: Option<&str>) -> Result<Settings, TenantError> {
    match path {
        Some(path) => settings_loader::from_file_with_env(path),
        None => Ok(settings_loader::from_env()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut registry = CommandRegistry::new();
    register_builtin_commands(&mut registry);
    let matches = registry.build_cli().get_matches();

    let settings = match load_settings(settings_path(&matches)) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1));
        }
    };
    SETTINGS.configure(settings);
    setup_logging(SETTINGS.get());

    match registry.execute(&matches, SETTINGS.get()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, kind = ?e.kind(), "command failed");
            eprintln!("Error: {e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
