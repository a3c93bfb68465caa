//! Statement parsing and analysis
//!
//! A deliberately shallow frontend: the pipeline consumes tokens plus
//! clause-level structure, so full SQL grammar is out of scope. `parse`
//! splits the token stream into a statement tree, analyzes the field list
//! and table references, and lifts the function-definition header.

pub mod funcdef;
mod statement;

pub use funcdef::{FunctionDefinition, ParameterSpec, normalize_type};
pub use statement::{
    Clause, ClauseKind, DerivedTable, SelectField, Statement, StatementKind, TableContext,
    TableReference, analyze_fields, split_statement,
};

use crate::error::CompileError;
use crate::tokenizer::Token;

/// Parse a tokenized template into a statement tree plus function metadata.
pub fn parse(tokens: &[Token]) -> Result<(Statement, Option<FunctionDefinition>), CompileError> {
    let statement = split_statement(tokens)?;
    let function_def = funcdef::extract(tokens);
    Ok((statement, function_def))
}
