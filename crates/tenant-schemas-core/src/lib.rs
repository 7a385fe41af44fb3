//! # tenant-schemas-core
//!
//! Core types, settings, and error types for tenant-schemas.
//! This crate has no database dependencies and provides the foundation for all other crates.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`schema`] - Validated schema identifiers
//! - [`settings`] - Connection and tenancy settings, global configuration
//! - [`settings_loader`] - Loading settings from TOML/JSON files and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod schema;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{ErrorKind, TenantError, TenantResult};
pub use schema::{SchemaName, PUBLIC_SCHEMA};
pub use settings::{DatabaseSettings, Settings, SETTINGS};
