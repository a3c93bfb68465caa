//! RETURNING clause stripping
//!
//! UPDATE and DELETE support RETURNING only on some engines; when the target
//! dialect lacks it, every token from the top-level RETURNING keyword to the
//! end of input is dropped. INSERT ... RETURNING is kept everywhere, and with
//! no dialect pinned the clause is left for the runtime's dialect to decide.

use crate::error::CompileError;
use crate::parser::split_statement;
use crate::pipeline::{ProcessingContext, Stage};

pub struct ReturningProcessor;

impl Stage for ReturningProcessor {
    fn name(&self) -> &'static str {
        "ReturningProcessor"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<(), CompileError> {
        let Some(dialect) = ctx.dialect else {
            return Ok(());
        };
        if dialect.supports_returning(ctx.statement.kind) {
            return Ok(());
        }
        let mut depth = 0i32;
        let returning_at = ctx.tokens.iter().position(|t| {
            if t.is_open_paren() {
                depth += 1;
            } else if t.is_close_paren() {
                depth -= 1;
            }
            depth == 0 && t.word_eq("RETURNING")
        });
        if let Some(at) = returning_at {
            ctx.tokens.truncate(at);
            // drop the trailing whitespace run the clause left behind
            while ctx.tokens.last().map(|t| t.is_trivia()).unwrap_or(false) {
                ctx.tokens.pop();
            }
            ctx.statement = split_statement(&ctx.tokens)?;
        }
        Ok(())
    }
}
