//! System field resolution
//!
//! Consults configuration to pick the system fields applicable to the
//! current statement: INSERT contributes `on_insert` specs, UPDATE
//! `on_update`, SELECT carries fields marked `exclude_from_select` so the
//! type-inference stage can drop them from `*` expansion. Each applicable
//! implicit field yields an `ImplicitParameter`; a `parameter: error` field
//! the template fails to set explicitly aborts compilation.

use crate::config::{FieldOperationConfig, ParameterMode, SystemFieldConfig};
use crate::error::CompileError;
use crate::ir::ImplicitParameter;
use crate::parser::StatementKind;
use crate::pipeline::{ProcessingContext, Stage};

pub struct SystemFieldProcessor;

impl Stage for SystemFieldProcessor {
    fn name(&self) -> &'static str {
        "SystemFieldProcessor"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<(), CompileError> {
        let fields = ctx.config.system.fields.clone();
        match ctx.statement.kind {
            StatementKind::Insert => {
                let explicit = ctx.statement.insert_columns();
                for field in &fields {
                    apply_operation(ctx, field, field.on_insert.as_ref(), &explicit, "INSERT")?;
                }
            }
            StatementKind::Update => {
                let explicit = ctx.statement.set_assignment_columns();
                for field in &fields {
                    apply_operation(ctx, field, field.on_update.as_ref(), &explicit, "UPDATE")?;
                }
            }
            StatementKind::Select => {
                for field in &fields {
                    if field.exclude_from_select {
                        ctx.system_fields.push(field.clone());
                    }
                }
            }
            StatementKind::Delete => {}
        }
        Ok(())
    }
}

fn apply_operation(
    ctx: &mut ProcessingContext,
    field: &SystemFieldConfig,
    operation: Option<&FieldOperationConfig>,
    explicit_columns: &[String],
    statement_name: &str,
) -> Result<(), CompileError> {
    let Some(operation) = operation else {
        return Ok(());
    };
    match operation.parameter {
        Some(ParameterMode::Implicit) => {
            ctx.implicit_parameters.push(ImplicitParameter {
                name: field.name.clone(),
                param_type: field.field_type.clone(),
                default: operation.default.clone(),
            });
            ctx.system_fields.push(field.clone());
        }
        Some(ParameterMode::Explicit) => {
            ctx.system_fields.push(field.clone());
        }
        Some(ParameterMode::Error) => {
            let present = explicit_columns
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&field.name));
            if !present {
                return Err(CompileError::structural_nopos(format!(
                    "system field '{}' must be set explicitly in this {} statement",
                    field.name, statement_name
                )));
            }
            ctx.system_fields.push(field.clone());
        }
        None => {}
    }
    Ok(())
}
