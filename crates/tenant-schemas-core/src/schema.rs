//! Schema names.
//!
//! A [`SchemaName`] is a validated PostgreSQL schema identifier. Validation
//! follows the SQL identifier rules the database enforces for unquoted names,
//! plus the `pg_` prefix reservation.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TenantError;

/// Longest identifier PostgreSQL keeps without truncation.
pub const MAX_SCHEMA_NAME_LEN: usize = 63;

/// Name of the shared schema.
pub const PUBLIC_SCHEMA: &str = "public";

static SQL_IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[_a-zA-Z][_a-zA-Z0-9]*$").expect("valid identifier regex"));

/// A validated, immutable schema identifier.
///
/// # Examples
///
/// ```
/// use tenant_schemas_core::schema::SchemaName;
///
/// let name = SchemaName::parse("tenant_acme").unwrap();
/// assert_eq!(name.as_str(), "tenant_acme");
/// assert!(SchemaName::parse("").is_err());
/// assert!(SchemaName::parse("pg_catalog").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    /// Validates `name` and wraps it.
    pub fn parse(name: impl Into<String>) -> Result<Self, TenantError> {
        let name = name.into();
        let reject = |reason: &str| {
            Err(TenantError::InvalidSchemaName {
                name: name.clone(),
                reason: reason.to_string(),
            })
        };

        if name.is_empty() {
            return reject("schema name must not be empty");
        }
        if name.len() > MAX_SCHEMA_NAME_LEN {
            return reject("schema name is longer than 63 characters");
        }
        if !SQL_IDENTIFIER_RE.is_match(&name) {
            return reject("schema name must be a plain SQL identifier");
        }
        if name.to_lowercase().starts_with("pg_") {
            return reject("the pg_ prefix is reserved");
        }
        Ok(Self(name))
    }

    /// The conventional shared schema, `public`.
    pub fn public() -> Self {
        Self(PUBLIC_SCHEMA.to_string())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the name wrapped in double quotes, ready for SQL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SchemaName {
    type Error = TenantError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for SchemaName {
    type Error = TenantError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SchemaName> for String {
    fn from(value: SchemaName) -> Self {
        value.0
    }
}
