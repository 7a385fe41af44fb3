//! Built-in management commands.
//!
//! Each command implements the
//! [`ManagementCommand`](crate::command::ManagementCommand) trait.

pub mod migrate_schemas;

pub use migrate_schemas::{
    render, verdict, Confirm, MigrateSchemasCommand, MigrateSchemasOptions, MigrationBackend,
    OutputFormat,
};

use crate::command::CommandRegistry;

/// Registers all built-in management commands into the given registry.
pub fn register_builtin_commands(registry: &mut CommandRegistry) {
    registry.register(Box::new(MigrateSchemasCommand::new()));
}
