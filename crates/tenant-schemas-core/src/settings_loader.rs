//! Settings loading from configuration files.
//!
//! This module provides functions to load [`Settings`] from TOML files, JSON
//! files, and to apply environment variable overrides.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `TENANT_DEBUG` | `debug` |
//! | `TENANT_LOG_LEVEL` | `log_level` |
//! | `TENANT_PUBLIC_SCHEMA_NAME` | `public_schema_name` |
//! | `TENANT_MODEL` | `tenant_model` |
//! | `TENANT_MIGRATION_EXECUTOR` | `migration_executor` |
//! | `TENANT_MIGRATION_PARALLELISM` | `migration_parallelism` |
//! | `TENANT_MIGRATION_FAIL_FAST` | `migration_fail_fast` |
//! | `TENANT_DB_ENGINE`, `TENANT_DB_NAME`, `TENANT_DB_USER`, `TENANT_DB_PASSWORD`, `TENANT_DB_HOST`, `TENANT_DB_PORT`, `TENANT_DB_POOL_SIZE` | `databases.default.*` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use tenant_schemas_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("tenants.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::TenantError;
use crate::settings::Settings;

/// Loads settings from a TOML string.
///
/// Any fields not present in the TOML keep their default values.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, TenantError> {
    let value: serde_json::Value = toml::from_str(toml_str)
        .map_err(|e| TenantError::ConfigurationError(format!("invalid TOML settings: {e}")))?;
    merge_over_defaults(value, "TOML")
}

/// Loads settings from a TOML file.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, TenantError> {
    from_toml_str(&read_config(path.as_ref(), "TOML")?)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, TenantError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
pub fn from_json_str(json_str: &str) -> Result<Settings, TenantError> {
    let value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| TenantError::ConfigurationError(format!("invalid JSON settings: {e}")))?;
    merge_over_defaults(value, "JSON")
}

/// Loads settings from a JSON file.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<Settings, TenantError> {
    from_json_str(&read_config(path.as_ref(), "JSON")?)
}

/// Loads settings from a JSON file and then applies environment variable overrides.
pub fn from_json_file_with_env(path: impl AsRef<Path>) -> Result<Settings, TenantError> {
    let mut settings = from_json_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a file, picking the format from its extension.
///
/// `.json` files are read as JSON, everything else as TOML. Environment
/// overrides are applied afterwards.
pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Settings, TenantError> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => from_json_file_with_env(path),
        _ => from_toml_file_with_env(path),
    }
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies environment variable overrides to a settings struct.
///
/// `TENANT_DB_*` variables apply to the `default` database alias, creating it
/// if needed. Unparseable numeric values are ignored and leave the setting
/// unchanged.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

fn apply_overrides(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("TENANT_DEBUG") {
        settings.debug = parse_flag(&val);
    }
    if let Some(val) = var("TENANT_LOG_LEVEL") {
        settings.log_level = val;
    }
    if let Some(val) = var("TENANT_PUBLIC_SCHEMA_NAME") {
        settings.public_schema_name = val;
    }
    if let Some(val) = var("TENANT_MODEL") {
        settings.tenant_model = val;
    }
    if let Some(val) = var("TENANT_MIGRATION_EXECUTOR") {
        settings.migration_executor = val;
    }
    if let Some(width) = var("TENANT_MIGRATION_PARALLELISM").and_then(|v| v.trim().parse().ok()) {
        settings.migration_parallelism = Some(width);
    }
    if let Some(val) = var("TENANT_MIGRATION_FAIL_FAST") {
        settings.migration_fail_fast = parse_flag(&val);
    }

    let db_vars = [
        "TENANT_DB_ENGINE",
        "TENANT_DB_NAME",
        "TENANT_DB_USER",
        "TENANT_DB_PASSWORD",
        "TENANT_DB_HOST",
        "TENANT_DB_PORT",
        "TENANT_DB_POOL_SIZE",
    ];
    if db_vars.iter().all(|key| var(key).is_none()) {
        return;
    }
    let db = settings.databases.entry("default".to_string()).or_default();
    if let Some(val) = var("TENANT_DB_ENGINE") {
        db.engine = val;
    }
    if let Some(val) = var("TENANT_DB_NAME") {
        db.name = val;
    }
    if let Some(val) = var("TENANT_DB_USER") {
        db.user = val;
    }
    if let Some(val) = var("TENANT_DB_PASSWORD") {
        db.password = val;
    }
    if let Some(val) = var("TENANT_DB_HOST") {
        db.host = val;
    }
    if let Some(port) = var("TENANT_DB_PORT").and_then(|v| v.trim().parse().ok()) {
        db.port = port;
    }
    if let Some(size) = var("TENANT_DB_POOL_SIZE").and_then(|v| v.trim().parse().ok()) {
        db.pool_size = size;
    }
}

fn parse_flag(val: &str) -> bool {
    matches!(val.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn read_config(path: &Path, format: &str) -> Result<String, TenantError> {
    std::fs::read_to_string(path).map_err(|e| {
        TenantError::ConfigurationError(format!("cannot read {format} settings {}: {e}", path.display()))
    })
}

/// Overlays `value` on the serialized defaults, so partial files only name
/// what they change. Tables merge key by key; anything else replaces.
fn merge_over_defaults(value: serde_json::Value, format: &str) -> Result<Settings, TenantError> {
    let mut merged = serde_json::to_value(Settings::default()).map_err(|e| {
        TenantError::ConfigurationError(format!("cannot serialize default settings: {e}"))
    })?;
    overlay(&mut merged, value);
    serde_json::from_value(merged)
        .map_err(|e| TenantError::ConfigurationError(format!("invalid {format} settings: {e}")))
}

fn overlay(base: &mut serde_json::Value, value: serde_json::Value) {
    match (base, value) {
        (serde_json::Value::Object(base), serde_json::Value::Object(value)) => {
            for (key, value) in value {
                match base.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            debug = false
            public_schema_name = "shared"
            migration_executor = "parallel"
            migration_parallelism = 4
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.public_schema_name, "shared");
        assert_eq!(settings.migration_executor, "parallel");
        assert_eq!(settings.migration_parallelism, Some(4));
        // Defaults preserved
        assert_eq!(settings.tenant_model, "customers.Client");
    }

    #[test]
    fn test_from_toml_str_databases() {
        let toml = r#"
            [databases.default]
            name = "saas"
            user = "migrator"
            password = "secret"
            host = "db.internal"
            pool_size = 4
        "#;

        let settings = from_toml_str(toml).unwrap();
        let db = settings.databases.get("default").unwrap();
        assert_eq!(db.name, "saas");
        assert_eq!(db.user, "migrator");
        assert_eq!(db.pool_size, 4);
        // Untouched fields keep their defaults
        assert_eq!(db.port, 5432);
        assert_eq!(db.engine, "postgresql");
    }

    #[test]
    fn test_from_toml_str_additional_alias() {
        let toml = r#"
            [databases.replica]
            host = "replica.internal"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(settings.databases.contains_key("default"));
        let replica = settings.databases.get("replica").unwrap();
        assert_eq!(replica.host, "replica.internal");
        assert_eq!(replica.pool_size, 16);
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert!(settings.debug);
        assert_eq!(settings.public_schema_name, "public");
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let result = from_toml_str("[[invalid toml content");
        assert!(result.is_err());
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{
            "log_level": "debug",
            "migration_fail_fast": true,
            "tenant_model": "accounts.Organization"
        }"#;

        let settings = from_json_str(json).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert!(settings.migration_fail_fast);
        assert_eq!(settings.tenant_table().unwrap(), "accounts_organization");
    }

    #[test]
    fn test_from_json_str_empty_object() {
        let settings = from_json_str("{}").unwrap();
        assert!(settings.debug);
        assert!(settings.migration_parallelism.is_none());
    }

    #[test]
    fn test_from_json_str_invalid() {
        assert!(from_json_str("{invalid json").is_err());
    }

    #[test]
    fn test_from_json_str_wrong_type() {
        let result = from_json_str(r#"{"migration_parallelism": "many"}"#);
        assert!(result.is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenants.toml");
        std::fs::write(&path, "public_schema_name = \"common\"\n").unwrap();

        let settings = from_toml_file(&path).unwrap();
        assert_eq!(settings.public_schema_name, "common");
    }

    #[test]
    fn test_from_file_picks_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenants.json");
        std::fs::write(&path, r#"{"tenant_schema_column": "schema"}"#).unwrap();

        let settings = from_file_with_env(&path).unwrap();
        assert_eq!(settings.tenant_schema_column, "schema");
    }

    #[test]
    fn test_from_toml_file_missing() {
        let result = from_toml_file("/nonexistent/path/tenants.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_json_file_missing() {
        let result = from_json_file("/nonexistent/path/tenants.json");
        assert!(result.is_err());
    }

    // ── Environment overrides ───────────────────────────────────────

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: std::collections::HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_tenancy_and_executor() {
        let mut settings = Settings::default();
        apply_overrides(
            &mut settings,
            vars(&[
                ("TENANT_PUBLIC_SCHEMA_NAME", "shared_env"),
                ("TENANT_MODEL", "billing.Account"),
                ("TENANT_MIGRATION_EXECUTOR", "parallel"),
                ("TENANT_MIGRATION_PARALLELISM", " 6 "),
                ("TENANT_MIGRATION_FAIL_FAST", "on"),
            ]),
        );
        assert_eq!(settings.public_schema_name, "shared_env");
        assert_eq!(settings.tenant_model, "billing.Account");
        assert_eq!(settings.migration_executor, "parallel");
        assert_eq!(settings.migration_parallelism, Some(6));
        assert!(settings.migration_fail_fast);
    }

    #[test]
    fn test_unparseable_number_is_ignored() {
        let mut settings = Settings::default();
        apply_overrides(&mut settings, vars(&[("TENANT_MIGRATION_PARALLELISM", "lots")]));
        assert!(settings.migration_parallelism.is_none());
    }

    #[test]
    fn test_database_overrides_target_default_alias() {
        let mut settings = Settings::default();
        settings.databases.clear();
        apply_overrides(
            &mut settings,
            vars(&[("TENANT_DB_HOST", "db.internal"), ("TENANT_DB_POOL_SIZE", "4")]),
        );
        let db = settings.database("default").unwrap();
        assert_eq!(db.host, "db.internal");
        assert_eq!(db.pool_size, 4);
        assert_eq!(db.port, 5432);
    }

    #[test]
    fn test_no_database_vars_leaves_aliases_alone() {
        let mut settings = Settings::default();
        settings.databases.clear();
        apply_overrides(&mut settings, vars(&[("TENANT_LOG_LEVEL", "debug")]));
        assert!(settings.databases.is_empty());
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(parse_flag("YES"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
    }

    #[test]
    fn test_overlay() {
        let mut base = serde_json::json!({"outer": {"a": 1, "b": 2}, "list": [1, 2, 3]});
        overlay(&mut base, serde_json::json!({"outer": {"b": 3}, "list": [4], "new": true}));
        assert_eq!(
            base,
            serde_json::json!({"outer": {"a": 1, "b": 3}, "list": [4], "new": true})
        );
    }
}
