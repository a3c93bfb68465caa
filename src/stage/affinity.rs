//! Response cardinality classification
//!
//! Claims how many rows a statement returns: `none` for DML without
//! RETURNING, `one` when the shape guarantees at most a single row
//! (aggregates, literal LIMIT 1, full primary-key equality), `many`
//! otherwise. Primary-key matching walks WHERE-clause tokens, so it is
//! word-boundary safe by construction and understands bare, table-qualified,
//! and alias-qualified column references.

use crate::error::CompileError;
use crate::ir::ResponseAffinity;
use crate::parser::{Clause, ClauseKind, Statement, StatementKind, TableReference};
use crate::pipeline::{ProcessingContext, Stage};
use crate::schema::DatabaseSchema;
use crate::tokenizer::{Token, TokenKind};

pub struct ResponseAffinityDetector;

impl Stage for ResponseAffinityDetector {
    fn name(&self) -> &'static str {
        "ResponseAffinityDetector"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<(), CompileError> {
        ctx.response_affinity = detect(&ctx.statement, ctx.schema.as_ref());
        Ok(())
    }
}

const AGGREGATES: &[&str] = &[
    "COUNT",
    "SUM",
    "AVG",
    "MIN",
    "MAX",
    "STDDEV",
    "VARIANCE",
    "GROUP_CONCAT",
    "STRING_AGG",
];

pub fn detect(statement: &Statement, schema: Option<&DatabaseSchema>) -> ResponseAffinity {
    match statement.kind {
        StatementKind::Select => {
            if has_top_level_aggregate(statement)
                || has_literal_limit_one(statement)
                || select_fully_pk_constrained(statement, schema)
            {
                ResponseAffinity::One
            } else {
                ResponseAffinity::Many
            }
        }
        StatementKind::Insert => {
            if statement.returning().is_none() {
                ResponseAffinity::None
            } else if statement.values_tuple_count() == 1 && !statement.insert_uses_select() {
                ResponseAffinity::One
            } else {
                ResponseAffinity::Many
            }
        }
        StatementKind::Update | StatementKind::Delete => {
            if statement.returning().is_none() {
                ResponseAffinity::None
            } else if target_fully_pk_constrained(statement, schema) {
                ResponseAffinity::One
            } else {
                ResponseAffinity::Many
            }
        }
    }
}

fn has_top_level_aggregate(statement: &Statement) -> bool {
    let Some(select) = statement.clause(ClauseKind::Select) else {
        return false;
    };
    let tokens = &select.tokens[1..];
    let mut depth = 0i32;
    for (i, tok) in tokens.iter().enumerate() {
        if tok.is_open_paren() {
            depth += 1;
        } else if tok.is_close_paren() {
            depth -= 1;
        } else if depth == 0
            && tok.kind == TokenKind::Word
            && AGGREGATES.iter().any(|a| tok.word_eq(a))
            && next_significant(tokens, i + 1)
                .map(|t| t.is_open_paren())
                .unwrap_or(false)
        {
            return true;
        }
    }
    false
}

/// `LIMIT 1` with a numeric literal; a `/*= expr */` value does not count.
fn has_literal_limit_one(statement: &Statement) -> bool {
    let Some(limit) = statement.clause(ClauseKind::Limit) else {
        return false;
    };
    limit.tokens[1..]
        .iter()
        .find(|t| !t.is_trivia())
        .map(|t| t.kind == TokenKind::Number && t.value == "1")
        .unwrap_or(false)
}

fn next_significant<'a>(tokens: &'a [Token], from: usize) -> Option<&'a Token> {
    tokens[from..].iter().find(|t| !t.is_trivia())
}

fn select_fully_pk_constrained(
    statement: &Statement,
    schema: Option<&DatabaseSchema>,
) -> bool {
    let Some(schema) = schema else { return false };
    let Some(driving) = statement.driving_table() else {
        return false;
    };
    let Some(table) = schema.table(&driving.table_name) else {
        return false;
    };
    let pks = table.primary_keys();
    if pks.is_empty() {
        return false;
    }

    let joins: Vec<&TableReference> = statement.joins().collect();
    if !joins.is_empty() {
        let shapes_ok = joins.iter().all(|j| {
            matches!(j.join_type.as_deref(), Some("INNER") | Some("LEFT"))
        });
        if !shapes_ok {
            return false;
        }
        // joined-table fields must follow the parent__child naming convention
        for field in &statement.fields {
            let Some(qualifier) = &field.qualifier else {
                continue;
            };
            let resolved = statement.resolve_qualifier(qualifier);
            if resolved.is_some_and(|t| !t.eq_ignore_ascii_case(&driving.table_name)) {
                let aliased_ok = field
                    .alias
                    .as_deref()
                    .map(|a| a.contains("__"))
                    .unwrap_or(false);
                if !aliased_ok {
                    return false;
                }
            }
        }
    }

    let mut qualifiers = vec![driving.table_name.clone()];
    if let Some(alias) = &driving.alias {
        qualifiers.push(alias.clone());
    }
    where_has_pk_equality(statement.clause(ClauseKind::Where), &pks, &qualifiers)
}

fn target_fully_pk_constrained(
    statement: &Statement,
    schema: Option<&DatabaseSchema>,
) -> bool {
    let Some(schema) = schema else { return false };
    let Some(target) = statement.target_table() else {
        return false;
    };
    let Some(table) = schema.table(&target) else {
        return false;
    };
    let pks = table.primary_keys();
    if pks.is_empty() {
        return false;
    }
    where_has_pk_equality(
        statement.clause(ClauseKind::Where),
        &pks,
        &[target.clone()],
    )
}

/// Every primary-key column appears in an `= value` comparison at paren
/// depth 0, with no top-level OR undermining the conjunction.
fn where_has_pk_equality(clause: Option<&Clause>, pks: &[&str], qualifiers: &[String]) -> bool {
    let Some(clause) = clause else { return false };
    let sig: Vec<&Token> = clause.tokens[1..].iter().filter(|t| !t.is_trivia()).collect();

    let mut depth = 0i32;
    for tok in &sig {
        if tok.is_open_paren() {
            depth += 1;
        } else if tok.is_close_paren() {
            depth -= 1;
        } else if depth == 0 && tok.word_eq("OR") {
            return false;
        }
    }

    pks.iter().all(|pk| {
        let mut depth = 0i32;
        for (i, tok) in sig.iter().enumerate() {
            if tok.is_open_paren() {
                depth += 1;
                continue;
            }
            if tok.is_close_paren() {
                depth -= 1;
                continue;
            }
            if depth != 0 || !tok.word_eq(pk) {
                continue;
            }
            // equality on the right
            if !sig.get(i + 1).map(|t| t.is_symbol("=")).unwrap_or(false) {
                continue;
            }
            // bare, or qualified by the driving table / its alias
            let qualified = i >= 2 && sig[i - 1].is_symbol(".");
            if qualified {
                let qualifier = &sig[i - 2];
                if qualifiers.iter().any(|q| qualifier.word_eq(q)) {
                    return true;
                }
            } else if i == 0 || !sig[i - 1].is_symbol(".") {
                return true;
            }
        }
        false
    })
}
