//! Configuration file parsing
//!
//! Reads `snapsql.yaml` project configuration. Unknown keys are a hard error
//! (`deny_unknown_fields`) so typos surface at load time instead of silently
//! disabling a section.

use crate::dialect::Dialect;
use crate::error::CompileError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl From<ConfigError> for CompileError {
    fn from(err: ConfigError) -> Self {
        CompileError::schema(err.to_string())
    }
}

/// Generators the toolchain knows how to drive. Anything else in the
/// `generators` section is a configuration error.
const KNOWN_GENERATORS: &[&str] = &["json", "go", "typescript"];

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Target dialect. When absent, the IR carries every dialect variant and
    /// selection happens at runtime.
    #[serde(default)]
    pub dialect: Option<String>,

    /// Directory scanned for `*.snap.sql` templates.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Directory the compiled IR files are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub generators: BTreeMap<String, GeneratorConfig>,

    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub query: QueryConfig,

    /// Build-time constants available to `/*$ name */` directives.
    #[serde(default)]
    pub constants: BTreeMap<String, String>,

    #[serde(default)]
    pub schema: SchemaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialect: None,
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            generators: BTreeMap::new(),
            system: SystemConfig::default(),
            query: QueryConfig::default(),
            constants: BTreeMap::new(),
            schema: SchemaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Output directory override for this generator.
    pub output: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    /// Columns whose values the runtime supplies (timestamps, tenant ids, ...).
    #[serde(default)]
    pub fields: Vec<SystemFieldConfig>,
}

/// One system field and its per-operation behavior. Serialized verbatim into
/// the IR's `system_fields` list.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SystemFieldConfig {
    pub name: String,

    /// Value type used for the implicit parameter ("timestamp", "int", ...).
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,

    #[serde(default)]
    pub exclude_from_select: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_insert: Option<FieldOperationConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<FieldOperationConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldOperationConfig {
    /// Default value the runtime applies when the caller supplies none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    #[serde(
        default,
        deserialize_with = "de_parameter_mode",
        skip_serializing_if = "Option::is_none"
    )]
    pub parameter: Option<ParameterMode>,
}

/// How a system field's value reaches the statement for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterMode {
    /// The template author writes the column and a parameter themselves.
    Explicit,
    /// The compiler injects the column; the runtime binds the value.
    Implicit,
    /// The template MUST set the column itself; omitting it fails compilation.
    Error,
}

/// Accepts `explicit` / `implicit` / `error`, and treats an empty string the
/// same as an absent key.
fn de_parameter_mode<'de, D>(deserializer: D) -> Result<Option<ParameterMode>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some("explicit") => Ok(Some(ParameterMode::Explicit)),
        Some("implicit") => Ok(Some(ParameterMode::Implicit)),
        Some("error") => Ok(Some(ParameterMode::Error)),
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid parameter mode '{other}'. Valid values: explicit, implicit, error"
        ))),
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Per-query execution time budget surfaced to the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,
}

/// Inline table declarations seeding the type-inference schema.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("queries")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("generated")
}

fn default_field_type() -> String {
    "timestamp".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str_validated(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_str_validated(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// The parsed target dialect, if one is pinned.
    pub fn target_dialect(&self) -> Option<Dialect> {
        self.dialect
            .as_deref()
            .and_then(|d| Dialect::from_str(d).ok())
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dialect) = self.dialect.as_deref()
            && Dialect::from_str(dialect).is_err()
        {
            return Err(ConfigError::Validation(format!(
                "invalid dialect '{dialect}'. Valid values: postgres, mysql, sqlite, mariadb"
            )));
        }
        for name in self.generators.keys() {
            if !KNOWN_GENERATORS.contains(&name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "unknown generator '{}'. Valid generators: {}",
                    name,
                    KNOWN_GENERATORS.join(", ")
                )));
            }
        }
        if let Some(timeout) = self.query.timeout_seconds
            && timeout < 0
        {
            return Err(ConfigError::Validation(format!(
                "query.timeout_seconds must not be negative (got {timeout})"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_str_validated("dialect: postgres").unwrap();
        assert_eq!(config.target_dialect(), Some(Dialect::Postgres));
        assert_eq!(config.input_dir, PathBuf::from("queries"));
        assert_eq!(config.output_dir, PathBuf::from("generated"));
        assert!(config.system.fields.is_empty());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::from_str_validated("dialact: postgres").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_dialect_rejected() {
        let err = Config::from_str_validated("dialect: oracle").unwrap_err();
        assert!(err.to_string().contains("invalid dialect"));
    }

    #[test]
    fn test_unknown_generator_rejected() {
        let yaml = "generators:\n  rust:\n    enabled: true";
        let err = Config::from_str_validated(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown generator"));
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let yaml = "query:\n  timeout_seconds: -5";
        let err = Config::from_str_validated(yaml).unwrap_err();
        assert!(err.to_string().contains("must not be negative"));
    }

    #[test]
    fn test_system_fields_parse() {
        let yaml = r#"
system:
  fields:
    - name: created_at
      on_insert:
        default: NOW()
        parameter: implicit
    - name: updated_at
      on_insert:
        parameter: implicit
      on_update:
        parameter: implicit
    - name: tenant_id
      type: int
      exclude_from_select: true
      on_insert:
        parameter: error
"#;
        let config = Config::from_str_validated(yaml).unwrap();
        assert_eq!(config.system.fields.len(), 3);
        let created = &config.system.fields[0];
        assert_eq!(created.field_type, "timestamp");
        assert_eq!(
            created.on_insert.as_ref().unwrap().parameter,
            Some(ParameterMode::Implicit)
        );
        assert_eq!(
            created.on_insert.as_ref().unwrap().default,
            Some(serde_json::Value::String("NOW()".to_string()))
        );
        let tenant = &config.system.fields[2];
        assert_eq!(tenant.field_type, "int");
        assert!(tenant.exclude_from_select);
        assert_eq!(
            tenant.on_insert.as_ref().unwrap().parameter,
            Some(ParameterMode::Error)
        );
    }

    #[test]
    fn test_empty_parameter_mode_is_none() {
        let yaml = r#"
system:
  fields:
    - name: created_at
      on_insert:
        parameter: ""
"#;
        let config = Config::from_str_validated(yaml).unwrap();
        assert_eq!(
            config.system.fields[0].on_insert.as_ref().unwrap().parameter,
            None
        );
    }

    #[test]
    fn test_inline_schema_tables() {
        let yaml = r#"
schema:
  tables:
    - name: users
      columns:
        - { name: id, type: bigint, nullable: false, primary_key: true }
        - { name: name, type: varchar, max_length: 120 }
"#;
        let config = Config::from_str_validated(yaml).unwrap();
        assert_eq!(config.schema.tables.len(), 1);
        let users = &config.schema.tables[0];
        assert!(users.columns[0].primary_key);
        assert!(!users.columns[0].nullable);
        assert_eq!(users.columns[1].max_length, Some(120));
    }
}
