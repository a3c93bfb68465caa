//! Function definition header parsing
//!
//! The `/*# ... */` header carries YAML metadata: function name, description,
//! and the ordered parameter list. Parameter entries are either a bare type
//! (`id: int`) or a structured map (`{type: User, description: ..., optional: true}`).
//! The raw (pre-normalization) type spec is kept so user-defined named types
//! survive to code generation.

use crate::tokenizer::{Directive, Token};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// A parameter's original, pre-normalization specification.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSpec {
    /// Bare type string as written: `int`, `User`, `Department[]`.
    Simple(String),
    Structured {
        type_name: String,
        description: Option<String>,
        optional: bool,
    },
}

impl ParameterSpec {
    pub fn type_name(&self) -> &str {
        match self {
            Self::Simple(t) => t,
            Self::Structured { type_name, .. } => type_name,
        }
    }

    pub fn optional(&self) -> bool {
        matches!(self, Self::Structured { optional: true, .. })
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Structured { description, .. } => description.as_deref(),
            Self::Simple(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionDefinition {
    /// Query name; defaults to the function name when the header has no `name`.
    pub name: String,
    pub function_name: String,
    pub description: String,
    /// Parameter names in declaration order.
    pub parameter_order: Vec<String>,
    /// Normalized types, keyed by parameter name.
    pub parameters: BTreeMap<String, String>,
    /// Original specs, keyed by parameter name.
    pub original_parameters: BTreeMap<String, ParameterSpec>,
}

/// Find the header directive in a token stream and parse it. Returns `None`
/// when the template has no header; a malformed header is treated the same
/// (metadata extraction never fails).
pub fn extract(tokens: &[Token]) -> Option<FunctionDefinition> {
    let body = tokens.iter().find_map(|t| match &t.directive {
        Some(Directive::FunctionHeader { body }) => Some(body.clone()),
        _ => None,
    })?;
    parse_header(&body)
}

fn parse_header(body: &str) -> Option<FunctionDefinition> {
    let value: Value = serde_yaml::from_str(body).ok()?;
    let map = value.as_mapping()?;

    let mut def = FunctionDefinition::default();
    def.function_name = str_key(map, "function_name").unwrap_or_default();
    def.name = str_key(map, "name").unwrap_or_else(|| def.function_name.clone());
    def.description = str_key(map, "description").unwrap_or_default();

    if let Some(params) = map.get(Value::from("parameters")).and_then(Value::as_mapping) {
        for (key, spec) in params {
            let Some(name) = key.as_str() else { continue };
            let parsed = parse_spec(spec);
            let Some(parsed) = parsed else { continue };
            def.parameter_order.push(name.to_string());
            def.parameters
                .insert(name.to_string(), normalize_type(parsed.type_name()));
            def.original_parameters.insert(name.to_string(), parsed);
        }
    }
    Some(def)
}

fn str_key(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    map.get(Value::from(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_spec(value: &Value) -> Option<ParameterSpec> {
    match value {
        Value::String(t) => Some(ParameterSpec::Simple(t.clone())),
        Value::Mapping(m) => {
            let type_name = m.get(Value::from("type"))?.as_str()?.to_string();
            Some(ParameterSpec::Structured {
                type_name,
                description: m
                    .get(Value::from("description"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                optional: m
                    .get(Value::from("optional"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        }
        _ => None,
    }
}

/// Canonicalize a type spec: known scalar spellings collapse to portable
/// names, array suffixes are preserved, user-defined names pass through.
pub fn normalize_type(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(elem) = trimmed.strip_suffix("[]") {
        return format!("{}[]", normalize_type(elem));
    }
    match trimmed.to_lowercase().as_str() {
        "int" | "integer" | "long" | "bigint" | "smallint" => "int".to_string(),
        "str" | "string" | "text" | "varchar" => "string".to_string(),
        "bool" | "boolean" => "bool".to_string(),
        "float" | "double" | "real" => "float".to_string(),
        "decimal" | "numeric" => "decimal".to_string(),
        "timestamp" | "datetime" => "timestamp".to_string(),
        "date" => "date".to_string(),
        "time" => "time".to_string(),
        "any" => "any".to_string(),
        _ => trimmed.to_string(),
    }
}
