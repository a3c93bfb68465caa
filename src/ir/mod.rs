//! Intermediate representation
//!
//! The IR layer decouples the compiler from the runtimes that execute it.
//! A compiled template is a linear instruction stream with structured control
//! flow, a table of CEL expressions with binding environments, and inferred
//! input/output schemas. Everything here is data: the pipeline produces one
//! `IntermediateFormat` per template and never mutates it afterwards.

mod serialize;

pub use serialize::to_pretty_json;

use crate::config::SystemFieldConfig;
use crate::tokenizer::Position;
use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

pub const FORMAT_VERSION: &str = "1";

/// Instruction opcodes. Serialized names are the wire format and must not
/// change between releases.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr,
)]
pub enum Opcode {
    #[serde(rename = "EMIT_STATIC")]
    #[strum(serialize = "EMIT_STATIC")]
    EmitStatic,
    #[serde(rename = "EMIT_EVAL")]
    #[strum(serialize = "EMIT_EVAL")]
    EmitEval,
    #[serde(rename = "EMIT_UNLESS_BOUNDARY")]
    #[strum(serialize = "EMIT_UNLESS_BOUNDARY")]
    EmitUnlessBoundary,
    #[serde(rename = "BOUNDARY")]
    #[strum(serialize = "BOUNDARY")]
    Boundary,
    #[serde(rename = "IF")]
    #[strum(serialize = "IF")]
    If,
    #[serde(rename = "ELSEIF")]
    #[strum(serialize = "ELSEIF")]
    ElseIf,
    #[serde(rename = "ELSE")]
    #[strum(serialize = "ELSE")]
    Else,
    #[serde(rename = "END")]
    #[strum(serialize = "END")]
    End,
    #[serde(rename = "LOOP_START")]
    #[strum(serialize = "LOOP_START")]
    LoopStart,
    #[serde(rename = "LOOP_END")]
    #[strum(serialize = "LOOP_END")]
    LoopEnd,
    #[serde(rename = "EMIT_IF_DIALECT")]
    #[strum(serialize = "EMIT_IF_DIALECT")]
    EmitIfDialect,
    #[serde(rename = "IF_SYSTEM_LIMIT")]
    #[strum(serialize = "IF_SYSTEM_LIMIT")]
    IfSystemLimit,
    #[serde(rename = "IF_SYSTEM_OFFSET")]
    #[strum(serialize = "IF_SYSTEM_OFFSET")]
    IfSystemOffset,
    #[serde(rename = "EMIT_SYSTEM_LIMIT")]
    #[strum(serialize = "EMIT_SYSTEM_LIMIT")]
    EmitSystemLimit,
    #[serde(rename = "EMIT_SYSTEM_OFFSET")]
    #[strum(serialize = "EMIT_SYSTEM_OFFSET")]
    EmitSystemOffset,
    #[serde(rename = "EMIT_SYSTEM_VALUE")]
    #[strum(serialize = "EMIT_SYSTEM_VALUE")]
    EmitSystemValue,
}

/// One IR instruction. `pos` is `"line:column"` of the first significant
/// source token the instruction represents; synthesized LIMIT/OFFSET
/// scaffolding carries `"0:0"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub pos: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(
        rename = "exprIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expr_index: Option<usize>,

    /// Legacy alternative to `exprIndex` for IF/ELSEIF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,

    #[serde(
        rename = "collectionExprIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub collection_expr_index: Option<usize>,

    #[serde(rename = "envIndex", default, skip_serializing_if = "Option::is_none")]
    pub env_index: Option<usize>,

    #[serde(
        rename = "sqlFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sql_fragment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialects: Option<Vec<String>>,

    #[serde(
        rename = "systemField",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub system_field: Option<String>,
}

impl Instruction {
    fn bare(op: Opcode, pos: Position) -> Self {
        Self {
            op,
            pos: pos.to_string(),
            value: None,
            expr_index: None,
            condition: None,
            variable: None,
            collection_expr_index: None,
            env_index: None,
            sql_fragment: None,
            dialects: None,
            system_field: None,
        }
    }

    pub fn emit_static(value: impl Into<String>, pos: Position) -> Self {
        let mut i = Self::bare(Opcode::EmitStatic, pos);
        i.value = Some(value.into());
        i
    }

    pub fn emit_eval(expr_index: usize, pos: Position) -> Self {
        let mut i = Self::bare(Opcode::EmitEval, pos);
        i.expr_index = Some(expr_index);
        i
    }

    pub fn emit_unless_boundary(value: impl Into<String>, pos: Position) -> Self {
        let mut i = Self::bare(Opcode::EmitUnlessBoundary, pos);
        i.value = Some(value.into());
        i
    }

    pub fn boundary(pos: Position) -> Self {
        Self::bare(Opcode::Boundary, pos)
    }

    pub fn if_expr(expr_index: usize, pos: Position) -> Self {
        let mut i = Self::bare(Opcode::If, pos);
        i.expr_index = Some(expr_index);
        i
    }

    pub fn if_condition(condition: impl Into<String>, pos: Position) -> Self {
        let mut i = Self::bare(Opcode::If, pos);
        i.condition = Some(condition.into());
        i
    }

    pub fn elseif_expr(expr_index: usize, pos: Position) -> Self {
        let mut i = Self::bare(Opcode::ElseIf, pos);
        i.expr_index = Some(expr_index);
        i
    }

    pub fn elseif_condition(condition: impl Into<String>, pos: Position) -> Self {
        let mut i = Self::bare(Opcode::ElseIf, pos);
        i.condition = Some(condition.into());
        i
    }

    pub fn else_marker(pos: Position) -> Self {
        Self::bare(Opcode::Else, pos)
    }

    pub fn end(pos: Position) -> Self {
        Self::bare(Opcode::End, pos)
    }

    pub fn loop_start(
        variable: impl Into<String>,
        collection_expr_index: usize,
        pos: Position,
    ) -> Self {
        let mut i = Self::bare(Opcode::LoopStart, pos);
        i.variable = Some(variable.into());
        i.collection_expr_index = Some(collection_expr_index);
        i
    }

    pub fn loop_end(pos: Position) -> Self {
        Self::bare(Opcode::LoopEnd, pos)
    }

    pub fn emit_if_dialect(
        fragment: impl Into<String>,
        dialects: Vec<String>,
        pos: Position,
    ) -> Self {
        let mut i = Self::bare(Opcode::EmitIfDialect, pos);
        i.sql_fragment = Some(fragment.into());
        i.dialects = Some(dialects);
        i
    }

    pub fn if_system_limit() -> Self {
        Self::bare(Opcode::IfSystemLimit, Position::zero())
    }

    pub fn if_system_offset() -> Self {
        Self::bare(Opcode::IfSystemOffset, Position::zero())
    }

    pub fn emit_system_limit() -> Self {
        Self::bare(Opcode::EmitSystemLimit, Position::zero())
    }

    pub fn emit_system_offset() -> Self {
        Self::bare(Opcode::EmitSystemOffset, Position::zero())
    }

    pub fn emit_system_value(field: impl Into<String>, pos: Position) -> Self {
        let mut i = Self::bare(Opcode::EmitSystemValue, pos);
        i.system_field = Some(field.into());
        i
    }
}

/// A CEL expression with the environment it evaluates in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CelExpression {
    pub id: String,
    pub expression: String,
    pub environment_index: usize,
    pub position: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: String,
}

/// One binding environment: the parameter base (index 0) or a loop scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CelEnvironment {
    pub index: usize,
    pub additional_variables: Vec<EnvVar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub name: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub base_type: String,
    pub is_nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
    #[serde(default)]
    pub hierarchy_key_level: u32,
}

/// Runtime-facing handle to a system field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplicitParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResponseAffinity {
    None,
    One,
    #[default]
    Many,
}

/// The emitted IR for one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntermediateFormat {
    pub format_version: String,
    pub name: String,
    pub description: String,
    pub function_name: String,
    pub parameters: Vec<Parameter>,
    pub responses: Vec<Response>,
    pub response_affinity: ResponseAffinity,
    pub instructions: Vec<Instruction>,
    pub cel_expressions: Vec<CelExpression>,
    pub cel_environments: Vec<CelEnvironment>,
    /// Loop environments only: `envs[i]` is the variable set of environment
    /// `i + 1` (the parameter base is implicit).
    pub envs: Vec<Vec<EnvVar>>,
    pub system_fields: Vec<SystemFieldConfig>,
    pub implicit_parameters: Vec<ImplicitParameter>,
    pub has_ordered_result: bool,
}

impl IntermediateFormat {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
