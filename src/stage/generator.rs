//! Instruction generation stage
//!
//! Thin adapter running the code generator over the processing context's
//! (possibly rewritten) token stream.

use crate::codegen::{self, GeneratorInput};
use crate::error::CompileError;
use crate::pipeline::{ProcessingContext, Stage};

pub struct InstructionGenerator;

impl Stage for InstructionGenerator {
    fn name(&self) -> &'static str {
        "InstructionGenerator"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<(), CompileError> {
        let system_field_names = ctx
            .config
            .system
            .fields
            .iter()
            .map(|f| f.name.clone())
            .collect();
        let input = GeneratorInput {
            tokens: &ctx.tokens,
            statement_kind: ctx.statement.kind,
            expressions: &ctx.expressions,
            dialect: ctx.dialect,
            constants: &ctx.constants,
            system_field_names,
            insert_uses_select: ctx.statement.insert_uses_select(),
        };
        ctx.instructions = codegen::generate(&input)?;
        Ok(())
    }
}
