//! Response type inference
//!
//! Primary path: augment the schema with virtual tables derived from CTEs
//! and subqueries, then resolve every output field to a typed response.
//! Fallback path (no schema configured): synthesize responses from the
//! field list alone with `any` types. Unresolvable fields produce
//! deduplicated warnings, never errors; the compile succeeds with
//! best-effort types.

use crate::error::CompileError;
use crate::ir::Response;
use crate::parser::{SelectField, Statement, TableContext};
use crate::pipeline::{ProcessingContext, Stage};
use crate::schema::{ColumnInfo, DatabaseSchema, TableInfo, base_type_of};
use crate::tokenizer::{Directive, Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    pub base_type: String,
    pub is_nullable: bool,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub max_length: Option<u32>,
}

impl FieldType {
    fn any() -> Self {
        Self {
            base_type: "any".to_string(),
            is_nullable: true,
            precision: None,
            scale: None,
            max_length: None,
        }
    }

    fn simple(base_type: &str, is_nullable: bool) -> Self {
        Self {
            base_type: base_type.to_string(),
            is_nullable,
            precision: None,
            scale: None,
            max_length: None,
        }
    }

    fn from_column(column: &ColumnInfo) -> Self {
        Self {
            base_type: column.base_type.clone(),
            is_nullable: column.nullable,
            precision: column.precision,
            scale: column.scale,
            max_length: column.max_length,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferredField {
    pub name: String,
    pub ty: FieldType,
    pub source_table: Option<String>,
    pub source_column: Option<String>,
}

/// The type-inference collaborator seam. The pipeline owns one
/// implementation; tests may substitute their own.
pub trait TypeInference {
    fn infer(
        &self,
        schema: &DatabaseSchema,
        statement: &Statement,
        excluded_columns: &[String],
    ) -> (Vec<InferredField>, Vec<String>);
}

pub struct ResponseTypeInference {
    pub inference: Box<dyn TypeInference>,
}

impl ResponseTypeInference {
    pub fn new() -> Self {
        Self {
            inference: Box::new(DefaultTypeInference),
        }
    }
}

impl Default for ResponseTypeInference {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ResponseTypeInference {
    fn name(&self) -> &'static str {
        "ResponseTypeInference"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<(), CompileError> {
        if ctx.statement.fields.is_empty() {
            return Ok(());
        }
        let excluded: Vec<String> = ctx
            .system_fields
            .iter()
            .filter(|f| f.exclude_from_select)
            .map(|f| f.name.clone())
            .collect();

        let schema = ctx.schema.clone();
        let inferred = match &schema {
            Some(schema) if !schema.is_empty() => {
                let augmented = augment_schema(schema, &ctx.statement);
                let (fields, warnings) =
                    self.inference.infer(&augmented, &ctx.statement, &excluded);
                for warning in warnings {
                    ctx.warnings.push(warning);
                }
                fields
            }
            _ => fallback_fields(&ctx.statement),
        };
        ctx.responses = finalize(inferred);
        Ok(())
    }
}

/// Add virtual tables for CTEs and FROM-clause subqueries. Column types are
/// resolved against the base schema where the derived column traces back to
/// a physical column; everything else defaults to nullable `any`.
pub fn augment_schema(schema: &DatabaseSchema, statement: &Statement) -> DatabaseSchema {
    let mut augmented = schema.clone();
    for derived in &statement.derived_tables {
        let mut info = TableInfo::new(&derived.name);
        info.derived = true;
        for (i, column) in derived.columns.iter().enumerate() {
            let source = derived.column_sources.get(i).and_then(|s| s.as_ref());
            let resolved = source.and_then(|(qualifier, original)| {
                lookup_source_column(schema, qualifier.as_deref(), original)
            });
            match resolved {
                Some(col) => {
                    let mut col = col.clone();
                    col.name = column.clone();
                    info.columns.push(col);
                }
                None => info.columns.push(ColumnInfo::new(column.clone(), "any")),
            }
        }
        augmented.insert(info);
    }
    augmented
}

fn lookup_source_column<'a>(
    schema: &'a DatabaseSchema,
    qualifier: Option<&str>,
    column: &str,
) -> Option<&'a ColumnInfo> {
    if let Some(qualifier) = qualifier
        && let Some(table) = schema.table(qualifier)
    {
        return table.column(column);
    }
    // sorted table iteration keeps this deterministic
    schema.tables().find_map(|t| t.column(column))
}

pub struct DefaultTypeInference;

impl TypeInference for DefaultTypeInference {
    fn infer(
        &self,
        schema: &DatabaseSchema,
        statement: &Statement,
        excluded_columns: &[String],
    ) -> (Vec<InferredField>, Vec<String>) {
        let mut fields = Vec::new();
        let mut warnings = Vec::new();

        for (i, field) in statement.fields.iter().enumerate() {
            if field.is_star {
                expand_star(field, statement, schema, excluded_columns, &mut fields, &mut warnings);
            } else {
                fields.push(infer_field(field, i, statement, schema, &mut warnings));
            }
        }
        (fields, warnings)
    }
}

fn expand_star(
    field: &SelectField,
    statement: &Statement,
    schema: &DatabaseSchema,
    excluded: &[String],
    out: &mut Vec<InferredField>,
    warnings: &mut Vec<String>,
) {
    let refs: Vec<_> = statement
        .table_refs
        .iter()
        .filter(|r| r.query_name.is_none())
        .filter(|r| match &field.qualifier {
            Some(q) => r.name.eq_ignore_ascii_case(q) || r.table_name.eq_ignore_ascii_case(q),
            None => matches!(r.context, TableContext::Main | TableContext::Join),
        })
        .collect();
    for table_ref in refs {
        let Some(table) = schema.table(&table_ref.table_name) else {
            warnings.push(format!(
                "table '{}' not found in schema; '*' expansion skipped",
                table_ref.table_name
            ));
            continue;
        };
        let left_joined = table_ref.join_type.as_deref() == Some("LEFT");
        for column in &table.columns {
            if excluded.iter().any(|e| e.eq_ignore_ascii_case(&column.name)) {
                continue;
            }
            let mut ty = FieldType::from_column(column);
            ty.is_nullable |= left_joined;
            out.push(InferredField {
                name: column.name.clone(),
                ty,
                source_table: Some(table.name.clone()),
                source_column: Some(column.name.clone()),
            });
        }
    }
}

fn infer_field(
    field: &SelectField,
    index: usize,
    statement: &Statement,
    schema: &DatabaseSchema,
    warnings: &mut Vec<String>,
) -> InferredField {
    let name = field
        .alias
        .clone()
        .or_else(|| field.original_name.clone())
        .unwrap_or_else(|| format!("field_{}", index + 1));

    if let Some(original) = &field.original_name {
        let (ty, table_name) =
            resolve_column(field.qualifier.as_deref(), original, statement, schema);
        return match ty {
            Some(ty) => InferredField {
                name,
                ty,
                source_table: table_name,
                source_column: Some(original.clone()),
            },
            None => {
                warnings.push(format!("could not resolve column '{original}'"));
                InferredField {
                    name,
                    ty: FieldType::any(),
                    source_table: table_name,
                    source_column: Some(original.clone()),
                }
            }
        };
    }

    let ty = infer_expression_type(&field.tokens, statement, schema).unwrap_or_else(|| {
        warnings.push(format!("could not infer type for field '{name}'"));
        FieldType::any()
    });
    InferredField {
        name,
        ty,
        source_table: None,
        source_column: None,
    }
}

/// Resolve `[qualifier.]column` against the statement's table references.
fn resolve_column(
    qualifier: Option<&str>,
    column: &str,
    statement: &Statement,
    schema: &DatabaseSchema,
) -> (Option<FieldType>, Option<String>) {
    let candidates: Vec<_> = statement
        .table_refs
        .iter()
        .filter(|r| r.query_name.is_none())
        .filter(|r| match qualifier {
            Some(q) => r.name.eq_ignore_ascii_case(q) || r.table_name.eq_ignore_ascii_case(q),
            None => true,
        })
        .collect();
    for table_ref in &candidates {
        if let Some(table) = schema.table(&table_ref.table_name)
            && let Some(col) = table.column(column)
        {
            let mut ty = FieldType::from_column(col);
            ty.is_nullable |= table_ref.join_type.as_deref() == Some("LEFT");
            return (Some(ty), Some(table.name.clone()));
        }
    }
    let table_name = qualifier.and_then(|q| {
        statement
            .resolve_qualifier(q)
            .map(str::to_string)
            .or_else(|| Some(q.to_string()))
    });
    (None, table_name)
}

/// Best-effort classification of a non-column field expression.
fn infer_expression_type(
    tokens: &[Token],
    statement: &Statement,
    schema: &DatabaseSchema,
) -> Option<FieldType> {
    let sig: Vec<&Token> = tokens.iter().filter(|t| !t.is_trivia()).collect();
    let first = sig.first()?;

    if first.kind == TokenKind::Word {
        let upper = first.value.to_uppercase();
        match upper.as_str() {
            "COUNT" => return Some(FieldType::simple("int", false)),
            "SUM" | "AVG" | "STDDEV" | "VARIANCE" => {
                return Some(FieldType::simple("decimal", true));
            }
            "MIN" | "MAX" => {
                return Some(aggregate_operand_type(&sig, statement, schema));
            }
            "STRING_AGG" | "GROUP_CONCAT" => {
                return Some(FieldType::simple("string", true));
            }
            "CAST" => {
                let as_at = sig.iter().position(|t| t.word_eq("AS"))?;
                let type_tok = sig.get(as_at + 1)?;
                return Some(FieldType::simple(base_type_of(&type_tok.value), true));
            }
            "TRUE" | "FALSE" => return Some(FieldType::simple("bool", false)),
            "NOW" | "CURRENT_TIMESTAMP" => {
                return Some(FieldType::simple("timestamp", false));
            }
            _ => {}
        }
    }
    // expr::type postgres cast at top level
    if let Some(cast_at) = top_level_symbol(&sig, "::") {
        let type_tok = sig.get(cast_at + 1)?;
        return Some(FieldType::simple(base_type_of(&type_tok.value), true));
    }
    match first.kind {
        TokenKind::Number => Some(FieldType::simple(
            if first.value.contains('.') { "decimal" } else { "int" },
            false,
        )),
        TokenKind::String => Some(FieldType::simple("string", false)),
        TokenKind::BlockComment if matches!(first.directive, Some(Directive::Variable { .. })) => {
            Some(FieldType::any())
        }
        _ => None,
    }
}

fn top_level_symbol(sig: &[&Token], symbol: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, tok) in sig.iter().enumerate() {
        if tok.is_open_paren() {
            depth += 1;
        } else if tok.is_close_paren() {
            depth -= 1;
        } else if depth == 0 && tok.is_symbol(symbol) {
            return Some(i);
        }
    }
    None
}

/// `MIN(col)` / `MAX(col)` take the operand's type when it is a simple
/// column reference.
fn aggregate_operand_type(
    sig: &[&Token],
    statement: &Statement,
    schema: &DatabaseSchema,
) -> FieldType {
    let words: Vec<&&Token> = sig
        .iter()
        .filter(|t| t.kind == TokenKind::Word || t.is_symbol("."))
        .collect();
    let (qualifier, column) = match words.as_slice() {
        [_fn, col] => (None, col),
        [_fn, qual, _dot, col] => (Some(qual.value.as_str()), col),
        _ => return FieldType::any(),
    };
    match resolve_column(qualifier, &column.value, statement, schema) {
        (Some(mut ty), _) => {
            ty.is_nullable = true;
            ty
        }
        _ => FieldType::any(),
    }
}

/// Schema-free fallback: names from the field list, `any` types.
fn fallback_fields(statement: &Statement) -> Vec<InferredField> {
    statement
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let name = field
                .alias
                .clone()
                .or_else(|| field.original_name.clone())
                .unwrap_or_else(|| format!("field_{}", i + 1));
            let source_table = field
                .qualifier
                .as_deref()
                .and_then(|q| statement.resolve_qualifier(q))
                .map(str::to_string)
                .or_else(|| field.qualifier.clone());
            InferredField {
                name,
                ty: FieldType::any(),
                source_table,
                source_column: field.original_name.clone(),
            }
        })
        .collect()
}

/// Uniquify names in selection order and produce the response list.
fn finalize(fields: Vec<InferredField>) -> Vec<Response> {
    let mut seen: Vec<String> = Vec::new();
    fields
        .into_iter()
        .map(|field| {
            let mut name = field.name.clone();
            let mut n = 1usize;
            while seen.contains(&name) {
                n += 1;
                name = format!("{}_{}", field.name, n);
            }
            seen.push(name.clone());
            Response {
                name,
                response_type: field.ty.base_type.clone(),
                base_type: field.ty.base_type,
                is_nullable: field.ty.is_nullable,
                precision: field.ty.precision,
                scale: field.ty.scale,
                max_length: field.ty.max_length,
                source_table: field.source_table,
                source_column: field.source_column,
                hierarchy_key_level: 0,
            }
        })
        .collect()
}
