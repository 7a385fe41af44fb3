//! # tenant-schemas-cli
//!
//! Management commands for schema-per-tenant databases.
//!
//! This crate provides:
//!
//! - **Management commands** - A registry of CLI commands sharing one
//!   `--settings` flag, and the built-in `migrate_schemas` command
//! - **Tenant resolution** - Listing tenant schemas from the tenant table
//!
//! ## Quick Start
//!
//! ```rust
//! use tenant_schemas_cli::command::CommandRegistry;
//! use tenant_schemas_cli::commands::register_builtin_commands;
//!
//! let mut registry = CommandRegistry::new();
//! register_builtin_commands(&mut registry);
//!
//! assert_eq!(registry.list_commands(), vec!["migrate_schemas"]);
//! ```

// These clippy lints are intentionally allowed:
// - result_large_err: TenantError is the workspace-wide error type
// - doc_markdown: backtick requirements for documentation items are too strict
// - module_name_repetitions: re-exports make module-prefixed names redundant
// - struct_excessive_bools: command options mirror CLI flags one to one
#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]

pub mod command;
pub mod commands;
pub mod tenants;

pub use command::{CommandRegistry, ManagementCommand};
pub use commands::{MigrateSchemasCommand, MigrateSchemasOptions, MigrationBackend, OutputFormat};
pub use tenants::{StaticTenantResolver, TableTenantResolver, TenantResolver};
