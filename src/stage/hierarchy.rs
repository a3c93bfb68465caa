//! Hierarchical key levels for nested-object response shaping
//!
//! Response names follow the `parent__child__column` double-underscore
//! convention. A response that maps to a primary-key column of its source
//! table gets `hierarchy_key_level = depth` (number of `__`-separated
//! segments); everything else stays 0. At least one root key is guaranteed:
//! when nothing lands on level 1, the first root-level PK response is
//! promoted, falling back to the first root-level response in declaration
//! order.

use crate::error::CompileError;
use crate::pipeline::{ProcessingContext, Stage};

pub struct HierarchyKeyLevelProcessor;

impl Stage for HierarchyKeyLevelProcessor {
    fn name(&self) -> &'static str {
        "HierarchyKeyLevelProcessor"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<(), CompileError> {
        if ctx.responses.is_empty() {
            return Ok(());
        }
        let schema = ctx.schema.clone();
        let mut pk_flags = Vec::with_capacity(ctx.responses.len());
        for response in &mut ctx.responses {
            let is_pk = match (&schema, &response.source_table, &response.source_column) {
                (Some(schema), Some(table), Some(column)) => schema
                    .table(table)
                    .and_then(|t| t.column(column))
                    .map(|c| c.primary_key)
                    .unwrap_or(false),
                _ => false,
            };
            pk_flags.push(is_pk);
            response.hierarchy_key_level = if is_pk {
                depth_of(&response.name)
            } else {
                0
            };
        }

        let has_root_key = ctx.responses.iter().any(|r| r.hierarchy_key_level == 1);
        if !has_root_key {
            let promoted = ctx
                .responses
                .iter()
                .enumerate()
                .find(|(i, r)| depth_of(&r.name) == 1 && pk_flags[*i])
                .map(|(i, _)| i)
                .or_else(|| ctx.responses.iter().position(|r| depth_of(&r.name) == 1))
                .unwrap_or(0);
            ctx.responses[promoted].hierarchy_key_level = 1;
        }
        Ok(())
    }
}

fn depth_of(name: &str) -> u32 {
    name.split("__").count() as u32
}
