//! Table reference collection and plan descriptions
//!
//! Copies the statement's table references (main, join, CTE, subquery) into
//! the processing context and renders the human-readable descriptions the
//! plan describer shows, e.g. `table 'lists' in 'done_stage'(CTE/subquery)`
//! or `table 'users' (physical table unresolved)`.

use crate::error::CompileError;
use crate::parser::{TableContext, TableReference};
use crate::pipeline::{ProcessingContext, Stage};
use crate::schema::DatabaseSchema;

pub struct TableReferencesProcessor;

impl Stage for TableReferencesProcessor {
    fn name(&self) -> &'static str {
        "TableReferencesProcessor"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<(), CompileError> {
        ctx.table_references = ctx.statement.table_refs.clone();
        Ok(())
    }
}

/// Render one reference for plan output.
pub fn describe(reference: &TableReference, schema: Option<&DatabaseSchema>) -> String {
    if let Some(query) = &reference.query_name {
        return format!("table '{}' in '{}'(CTE/subquery)", reference.table_name, query);
    }
    match reference.context {
        TableContext::Subquery => {
            format!("table '{}' (derived subquery)", reference.table_name)
        }
        _ => {
            let resolved = schema
                .map(|s| s.has_table(&reference.table_name))
                .unwrap_or(false);
            let mut out = format!("table '{}'", reference.table_name);
            if let Some(alias) = &reference.alias {
                out.push_str(&format!(" as '{alias}'"));
            }
            if !resolved {
                out.push_str(" (physical table unresolved)");
            }
            out
        }
    }
}
