//! Management command framework.
//!
//! A [`ManagementCommand`] declares its arguments on a `clap::Command` and
//! handles the parsed matches. [`CommandRegistry`] collects commands, builds
//! the top-level CLI, and dispatches to the selected subcommand.
//!
//! ## Defining a Command
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use tenant_schemas_cli::command::ManagementCommand;
//! use tenant_schemas_core::{Settings, TenantError};
//!
//! struct ListAliasesCommand;
//!
//! #[async_trait]
//! impl ManagementCommand for ListAliasesCommand {
//!     fn name(&self) -> &'static str { "list_aliases" }
//!     fn help(&self) -> &'static str { "Print the configured database aliases" }
//!
//!     async fn handle(
//!         &self,
//!         _matches: &clap::ArgMatches,
//!         settings: &Settings,
//!     ) -> Result<(), TenantError> {
//!         for alias in settings.databases.keys() {
//!             println!("{alias}");
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use tenant_schemas_core::{Settings, TenantError};

/// Name of the global option pointing at a settings file.
pub const SETTINGS_ARG: &str = "settings";

/// A command invocable as a subcommand of the `tenant-schemas` binary.
#[async_trait]
pub trait ManagementCommand: Send + Sync {
    /// The subcommand name.
    fn name(&self) -> &'static str;

    /// One-line help text.
    fn help(&self) -> &'static str;

    /// Adds the command's arguments. The default adds none.
    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd
    }

    /// Runs the command.
    async fn handle(&self, matches: &clap::ArgMatches, settings: &Settings) -> Result<(), TenantError>;
}

/// Commands keyed by name.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Box<dyn ManagementCommand>>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `command`, replacing any command with the same name.
    pub fn register(&mut self, command: Box<dyn ManagementCommand>) {
        if let Some(previous) = self.commands.insert(command.name(), command) {
            tracing::debug!(command = previous.name(), "replaced management command");
        }
    }

    /// Looks up a command by name.
    pub fn get(&self, name: &str) -> Option<&dyn ManagementCommand> {
        self.commands.get(name).map(AsRef::as_ref)
    }

    /// Registered command names, sorted.
    pub fn list_commands(&self) -> Vec<&'static str> {
        self.commands.keys().copied().collect()
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Builds the top-level CLI with one subcommand per registered command.
    pub fn build_cli(&self) -> clap::Command {
        let mut app = clap::Command::new("tenant-schemas")
            .about("Schema-per-tenant migration management")
            .subcommand_required(true)
            .arg_required_else_help(true)
            .arg(
                clap::Arg::new(SETTINGS_ARG)
                    .long(SETTINGS_ARG)
                    .global(true)
                    .value_name("FILE")
                    .help("Settings file (TOML or JSON); defaults to TENANT_* environment variables"),
            );

        for (name, command) in &self.commands {
            let subcommand = clap::Command::new(*name).about(command.help());
            app = app.subcommand(command.add_arguments(subcommand));
        }
        app
    }

    /// Dispatches to the subcommand selected in `matches`.
    pub async fn execute(&self, matches: &clap::ArgMatches, settings: &Settings) -> Result<(), TenantError> {
        let (name, sub_matches) = matches
            .subcommand()
            .ok_or_else(|| TenantError::ConfigurationError("No subcommand specified".to_string()))?;

        let command = self
            .get(name)
            .ok_or_else(|| TenantError::ConfigurationError(format!("Unknown command: {name}")))?;

        tracing::debug!(command = name, "dispatching management command");
        command.handle(sub_matches, settings).await
    }
}

/// Returns the `--settings` value, whether given before or after the subcommand.
pub fn settings_path(matches: &clap::ArgMatches) -> Option<&str> {
    matches
        .get_one::<String>(SETTINGS_ARG)
        .or_else(|| {
            matches
                .subcommand()
                .and_then(|(_, sub)| sub.get_one::<String>(SETTINGS_ARG))
        })
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoCommand {
        name: &'static str,
    }

    #[async_trait]
    impl ManagementCommand for EchoCommand {
        fn name(&self) -> &'static str {
            self.name
        }

        fn help(&self) -> &'static str {
            "Echo"
        }

        fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
            cmd.arg(
                clap::Arg::new("verbose")
                    .long("verbose")
                    .action(clap::ArgAction::SetTrue),
            )
        }

        async fn handle(&self, _matches: &clap::ArgMatches, _settings: &Settings) -> Result<(), TenantError> {
            Ok(())
        }
    }

    struct FailingCommand;

    #[async_trait]
    impl ManagementCommand for FailingCommand {
        fn name(&self) -> &'static str {
            "fail"
        }

        fn help(&self) -> &'static str {
            "Always fails"
        }

        async fn handle(&self, _matches: &clap::ArgMatches, _settings: &Settings) -> Result<(), TenantError> {
            Err(TenantError::MigrationsFailed { failed: 1, total: 1 })
        }
    }

    fn registry() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(EchoCommand { name: "zebra" }));
        registry.register(Box::new(EchoCommand { name: "alpha" }));
        registry.register(Box::new(FailingCommand));
        registry
    }

    #[test]
    fn test_register_and_list() {
        let mut registry = registry();
        assert_eq!(registry.list_commands(), vec!["alpha", "fail", "zebra"]);
        registry.register(Box::new(EchoCommand { name: "alpha" }));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("alpha").unwrap().help(), "Echo");
        assert!(registry.get("missing").is_none());
        assert!(CommandRegistry::new().is_empty());
    }

    #[test]
    fn test_settings_arg_is_global() {
        let cli = registry().build_cli();
        let before = cli
            .clone()
            .try_get_matches_from(["tenant-schemas", "--settings", "a.toml", "alpha"])
            .unwrap();
        assert_eq!(settings_path(&before), Some("a.toml"));

        let after = cli
            .try_get_matches_from(["tenant-schemas", "alpha", "--verbose", "--settings", "b.toml"])
            .unwrap();
        assert_eq!(settings_path(&after), Some("b.toml"));
        assert!(after.subcommand_matches("alpha").unwrap().get_flag("verbose"));
    }

    #[tokio::test]
    async fn test_execute_dispatches() {
        let registry = registry();
        let settings = Settings::default();

        let ok = registry.build_cli().try_get_matches_from(["tenant-schemas", "zebra"]).unwrap();
        assert!(registry.execute(&ok, &settings).await.is_ok());

        let fail = registry.build_cli().try_get_matches_from(["tenant-schemas", "fail"]).unwrap();
        let err = registry.execute(&fail, &settings).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
