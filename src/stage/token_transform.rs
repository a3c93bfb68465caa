//! System-field token injection
//!
//! Rewrites the token stream of INSERT and UPDATE statements to add system
//! columns. The parsed statement tree is never mutated in place; the stage
//! produces a fresh stream and re-splits it so downstream stages see the
//! rewritten statement. CTEs and subqueries are respected via paren/keyword
//! depth tracking.

use crate::error::CompileError;
use crate::ir::ImplicitParameter;
use crate::parser::{StatementKind, split_statement};
use crate::pipeline::{ProcessingContext, Stage};
use crate::tokenizer::{Directive, Position, Token, TokenKind};

pub struct TokenTransformer;

impl Stage for TokenTransformer {
    fn name(&self) -> &'static str {
        "TokenTransformer"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<(), CompileError> {
        if ctx.implicit_parameters.is_empty() {
            return Ok(());
        }
        let rewritten = match ctx.statement.kind {
            StatementKind::Insert => transform_insert(&ctx.tokens, &ctx.implicit_parameters),
            StatementKind::Update => transform_update(&ctx.tokens, &ctx.implicit_parameters),
            StatementKind::Select | StatementKind::Delete => return Ok(()),
        };
        if let Some(tokens) = rewritten {
            ctx.statement = split_statement(&tokens)?;
            ctx.tokens = tokens;
        }
        Ok(())
    }
}

fn system_value_token(field: &str, pos: Position) -> Token {
    let mut token = Token::new(
        TokenKind::BlockComment,
        format!("/*# EMIT_SYSTEM_VALUE: {field} */"),
        pos,
    );
    token.directive = Some(Directive::SystemValue {
        field: field.to_string(),
    });
    token
}

fn word(value: &str, pos: Position) -> Token {
    Token::new(TokenKind::Word, value, pos)
}

fn symbol(value: &str, pos: Position) -> Token {
    Token::new(TokenKind::Symbol, value, pos)
}

fn space(pos: Position) -> Token {
    Token::new(TokenKind::Whitespace, " ", pos)
}

/// Index of the next token at paren depth 0 matching the predicate.
fn find_top_level(
    tokens: &[Token],
    from: usize,
    pred: impl Fn(&Token) -> bool,
) -> Option<usize> {
    let mut depth = 0i32;
    for (i, tok) in tokens.iter().enumerate().skip(from) {
        if tok.is_open_paren() {
            depth += 1;
        } else if tok.is_close_paren() {
            depth -= 1;
        } else if depth == 0 && pred(tok) {
            return Some(i);
        }
    }
    None
}

fn find_matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, tok) in tokens.iter().enumerate().skip(open) {
        if tok.is_open_paren() {
            depth += 1;
        } else if tok.is_close_paren() {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// INSERT path: extend the explicit column list and the first VALUES tuple
/// (or, for INSERT ... SELECT, drop the placeholders after the column list
/// for the post-generation normalization to relocate).
fn transform_insert(tokens: &[Token], params: &[ImplicitParameter]) -> Option<Vec<Token>> {
    let into = find_top_level(tokens, 0, |t| t.word_eq("INTO"))?;
    let col_open = {
        let mut found = None;
        for (i, tok) in tokens.iter().enumerate().skip(into + 1) {
            if tok.is_open_paren() {
                found = Some(i);
                break;
            }
            // no explicit column list: positional INSERT, nothing to extend
            if tok.word_eq("VALUES") || tok.word_eq("SELECT") {
                return None;
            }
        }
        found?
    };
    let col_close = find_matching_paren(tokens, col_open)?;

    let existing: Vec<String> = tokens[col_open + 1..col_close]
        .iter()
        .filter(|t| t.kind == TokenKind::Word)
        .map(|t| t.value.clone())
        .collect();
    let missing: Vec<&ImplicitParameter> = params
        .iter()
        .filter(|p| !existing.iter().any(|c| c.eq_ignore_ascii_case(&p.name)))
        .collect();
    if missing.is_empty() {
        return None;
    }

    let mut out = tokens.to_vec();
    let values_at = find_top_level(tokens, col_close + 1, |t| t.word_eq("VALUES"));

    // later edit first so earlier indices stay valid
    match values_at {
        Some(values_at) => {
            let tuple_open = tokens[values_at + 1..]
                .iter()
                .position(|t| t.is_open_paren())
                .map(|o| values_at + 1 + o)?;
            let tuple_close = find_matching_paren(tokens, tuple_open)?;
            let anchor = tokens[tuple_close].position;
            let mut injected = Vec::new();
            for param in &missing {
                injected.push(symbol(",", anchor));
                injected.push(space(anchor));
                injected.push(system_value_token(&param.name, anchor));
            }
            out.splice(tuple_close..tuple_close, injected);
        }
        None => {
            // INSERT ... SELECT: placeholders go after the column list and
            // are moved into the field list after instruction generation
            let anchor = tokens[col_close].position;
            let mut injected = Vec::new();
            for param in &missing {
                injected.push(space(anchor));
                injected.push(system_value_token(&param.name, anchor));
            }
            out.splice(col_close + 1..col_close + 1, injected);
        }
    }

    let anchor = tokens[col_close].position;
    let mut columns = Vec::new();
    for param in &missing {
        columns.push(symbol(",", anchor));
        columns.push(space(anchor));
        columns.push(word(&param.name, anchor));
    }
    out.splice(col_close..col_close, columns);
    Some(out)
}

/// UPDATE path: replace existing assignments to system columns, append the
/// rest before the end of the SET region.
fn transform_update(tokens: &[Token], params: &[ImplicitParameter]) -> Option<Vec<Token>> {
    let set_at = find_top_level(tokens, 0, |t| t.word_eq("SET"))?;
    let set_end = find_top_level(tokens, set_at + 1, |t| {
        t.word_eq("WHERE") || t.word_eq("RETURNING") || t.is_symbol(";")
    })
    .unwrap_or(tokens.len());

    // assignment segments at depth 0: (lhs index, eq index, segment end)
    let mut assignments: Vec<(usize, usize, usize)> = Vec::new();
    let mut depth = 0i32;
    let mut segment_start = set_at + 1;
    let mut i = set_at + 1;
    while i <= set_end {
        let at_end = i == set_end;
        let is_split = at_end
            || (depth == 0 && tokens[i].is_symbol(","));
        if !at_end {
            if tokens[i].is_open_paren() {
                depth += 1;
            } else if tokens[i].is_close_paren() {
                depth -= 1;
            }
        }
        if is_split {
            if let Some(assignment) = parse_assignment(tokens, segment_start, i) {
                assignments.push(assignment);
            }
            segment_start = i + 1;
        }
        i += 1;
    }

    let mut replacements: Vec<(usize, usize, &ImplicitParameter)> = Vec::new();
    let mut appends: Vec<&ImplicitParameter> = Vec::new();
    for param in params {
        match assignments.iter().find(|(lhs, _, _)| {
            tokens[*lhs].value.eq_ignore_ascii_case(&param.name)
        }) {
            Some((_, eq, end)) => replacements.push((*eq + 1, *end, param)),
            None => appends.push(param),
        }
    }
    if replacements.is_empty() && appends.is_empty() {
        return None;
    }

    let mut out = tokens.to_vec();
    if !appends.is_empty() {
        let anchor = tokens
            .get(set_end)
            .map(|t| t.position)
            .unwrap_or_else(Position::zero);
        let mut injected = Vec::new();
        for param in &appends {
            injected.push(symbol(",", anchor));
            injected.push(space(anchor));
            injected.push(word(&param.name, anchor));
            injected.push(space(anchor));
            injected.push(symbol("=", anchor));
            injected.push(space(anchor));
            injected.push(system_value_token(&param.name, anchor));
        }
        // keep the appended assignments clear of the WHERE keyword
        injected.push(space(anchor));
        out.splice(set_end..set_end, injected);
    }
    replacements.sort_by(|a, b| b.0.cmp(&a.0));
    for (start, end, param) in replacements {
        let anchor = tokens[start.min(tokens.len() - 1)].position;
        out.splice(
            start..end,
            vec![space(anchor), system_value_token(&param.name, anchor), space(anchor)],
        );
    }
    Some(out)
}

/// `lhs = value` within `tokens[start..end]`, tolerating leading trivia.
fn parse_assignment(tokens: &[Token], start: usize, end: usize) -> Option<(usize, usize, usize)> {
    let lhs = (start..end).find(|&i| !tokens[i].is_trivia())?;
    if tokens[lhs].kind != TokenKind::Word {
        return None;
    }
    let eq = (lhs + 1..end).find(|&i| !tokens[i].is_trivia())?;
    if !tokens[eq].is_symbol("=") {
        return None;
    }
    Some((lhs, eq, end))
}
