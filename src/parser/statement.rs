//! Clause-level statement tree
//!
//! The pipeline consumes tokens and clause-level structure only, so the
//! statement tree stays deliberately shallow: a statement kind, an ordered
//! clause list with raw token runs, and the analysis results downstream
//! stages need (SELECT fields, table references, derived tables). Directive
//! comments ride along inside clause token runs; keywords inside dummy
//! regions or nested parens never start a clause.

use crate::error::CompileError;
use crate::tokenizer::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    With,
    Select,
    From,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    Offset,
    InsertInto,
    Values,
    Update,
    Set,
    DeleteFrom,
    OnConflict,
    Returning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub kind: ClauseKind,
    pub tokens: Vec<Token>,
}

impl Clause {
    /// Significant (non-trivia) tokens of the clause.
    pub fn significant(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| !t.is_trivia())
    }
}

/// One entry of the SELECT (or RETURNING) field list.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectField {
    pub tokens: Vec<Token>,
    /// Explicit (`AS x`) or implicit (`expr x`) alias.
    pub alias: Option<String>,
    /// Column name for simple `[qual.]col` references.
    pub original_name: Option<String>,
    /// Table or alias qualifier of a simple reference.
    pub qualifier: Option<String>,
    pub is_star: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableContext {
    Main,
    Join,
    Cte,
    Subquery,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableReference {
    /// Exposed name: the alias when present, the table name otherwise.
    pub name: String,
    pub alias: Option<String>,
    pub table_name: String,
    /// Enclosing CTE or subquery name; `None` for top-level references.
    pub query_name: Option<String>,
    pub context: TableContext,
    /// JOIN modifier ("INNER", "LEFT", ...) for `Join` references.
    pub join_type: Option<String>,
}

/// A virtual table synthesized from a CTE or FROM-clause subquery.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedTable {
    pub name: String,
    /// Output column names in selection order; empty when the body selects `*`.
    pub columns: Vec<String>,
    /// Per-column `(qualifier, column)` source hints where resolvable.
    pub column_sources: Vec<Option<(Option<String>, String)>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub clauses: Vec<Clause>,
    /// SELECT-list fields, or RETURNING-list fields for DML statements.
    pub fields: Vec<SelectField>,
    pub table_refs: Vec<TableReference>,
    pub derived_tables: Vec<DerivedTable>,
}

impl Statement {
    pub fn clause(&self, kind: ClauseKind) -> Option<&Clause> {
        self.clauses.iter().find(|c| c.kind == kind)
    }

    /// The WITH clause, when the statement has CTEs.
    pub fn cte(&self) -> Option<&Clause> {
        self.clause(ClauseKind::With)
    }

    pub fn has_order_by(&self) -> bool {
        self.clause(ClauseKind::OrderBy).is_some()
    }

    pub fn returning(&self) -> Option<&Clause> {
        self.clause(ClauseKind::Returning)
    }

    /// Target table of an INSERT / UPDATE / DELETE.
    pub fn target_table(&self) -> Option<String> {
        let (clause, keyword) = match self.kind {
            StatementKind::Insert => (self.clause(ClauseKind::InsertInto)?, "INTO"),
            StatementKind::Update => (self.clause(ClauseKind::Update)?, "UPDATE"),
            StatementKind::Delete => (self.clause(ClauseKind::DeleteFrom)?, "FROM"),
            StatementKind::Select => return None,
        };
        let sig: Vec<&Token> = clause.significant().collect();
        let at = sig.iter().position(|t| t.word_eq(keyword))?;
        sig.get(at + 1)
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| t.value.clone())
    }

    /// The driving (first FROM) table reference.
    pub fn driving_table(&self) -> Option<&TableReference> {
        self.table_refs
            .iter()
            .find(|r| r.context == TableContext::Main && r.query_name.is_none())
    }

    /// Top-level JOIN references.
    pub fn joins(&self) -> impl Iterator<Item = &TableReference> {
        self.table_refs
            .iter()
            .filter(|r| r.context == TableContext::Join && r.query_name.is_none())
    }

    /// Resolve a qualifier (alias or table name) to the underlying table name.
    pub fn resolve_qualifier(&self, qualifier: &str) -> Option<&str> {
        self.table_refs
            .iter()
            .filter(|r| r.query_name.is_none())
            .find(|r| {
                r.name.eq_ignore_ascii_case(qualifier)
                    || r.table_name.eq_ignore_ascii_case(qualifier)
            })
            .map(|r| r.table_name.as_str())
    }

    /// Number of top-level tuples in the VALUES clause.
    pub fn values_tuple_count(&self) -> usize {
        let Some(values) = self.clause(ClauseKind::Values) else {
            return 0;
        };
        let mut depth = 0usize;
        let mut count = 0usize;
        for tok in &values.tokens {
            if tok.is_open_paren() {
                if depth == 0 {
                    count += 1;
                }
                depth += 1;
            } else if tok.is_close_paren() {
                depth = depth.saturating_sub(1);
            }
        }
        count
    }

    /// True for INSERT ... SELECT statements.
    pub fn insert_uses_select(&self) -> bool {
        self.kind == StatementKind::Insert && self.clause(ClauseKind::Select).is_some()
    }

    /// Column names of an INSERT's explicit column list, in source order.
    pub fn insert_columns(&self) -> Vec<String> {
        let Some(clause) = self.clause(ClauseKind::InsertInto) else {
            return Vec::new();
        };
        let mut depth = 0i32;
        let mut columns = Vec::new();
        for tok in &clause.tokens {
            if tok.is_open_paren() {
                depth += 1;
            } else if tok.is_close_paren() {
                if depth == 1 {
                    break;
                }
                depth -= 1;
            } else if depth == 1 && tok.kind == TokenKind::Word {
                columns.push(tok.value.clone());
            }
        }
        columns
    }

    /// Left-hand-side column names of an UPDATE's SET assignments.
    pub fn set_assignment_columns(&self) -> Vec<String> {
        let Some(clause) = self.clause(ClauseKind::Set) else {
            return Vec::new();
        };
        let sig: Vec<&Token> = clause.significant().collect();
        let mut columns = Vec::new();
        let mut depth = 0i32;
        let mut expect_column = true;
        for (i, tok) in sig.iter().enumerate().skip(1) {
            if tok.is_open_paren() {
                depth += 1;
            } else if tok.is_close_paren() {
                depth -= 1;
            } else if depth == 0 && tok.is_symbol(",") {
                expect_column = true;
            } else if depth == 0
                && expect_column
                && tok.kind == TokenKind::Word
                && sig.get(i + 1).map(|t| t.is_symbol("=")).unwrap_or(false)
            {
                columns.push(tok.value.clone());
                expect_column = false;
            }
        }
        columns
    }
}

/// Split a token stream into a clause-level statement tree.
pub fn split_statement(tokens: &[Token]) -> Result<Statement, CompileError> {
    let kind = detect_kind(tokens)?;

    let mut clauses: Vec<Clause> = Vec::new();
    let mut current: Option<(ClauseKind, Vec<Token>)> = None;
    let mut depth = 0i32;
    let mut in_dummy = false;
    let mut seen_main_keyword = false;

    let sig_words = significant_words(tokens);

    for (idx, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::DummyStart => in_dummy = true,
            TokenKind::DummyEnd => in_dummy = false,
            _ => {}
        }

        let starts = if !in_dummy && depth == 0 && tok.kind == TokenKind::Word {
            clause_start(kind, tok, &current, seen_main_keyword, &sig_words, idx)
        } else {
            None
        };

        if tok.is_open_paren() {
            depth += 1;
        } else if tok.is_close_paren() {
            depth -= 1;
        }

        if let Some(new_kind) = starts {
            if matches!(
                new_kind,
                ClauseKind::Select
                    | ClauseKind::InsertInto
                    | ClauseKind::Update
                    | ClauseKind::DeleteFrom
            ) {
                seen_main_keyword = true;
            }
            if let Some((k, toks)) = current.take() {
                clauses.push(Clause { kind: k, tokens: toks });
            }
            current = Some((new_kind, vec![tok.clone()]));
        } else if let Some((_, toks)) = current.as_mut() {
            toks.push(tok.clone());
        } else if !tok.is_trivia() {
            // Significant content before any clause keyword: only the header
            // directive is expected there.
            if tok.directive.is_none() {
                return Err(CompileError::structural(
                    format!("unexpected token '{}' before statement keyword", tok.value),
                    tok.position,
                ));
            }
        }
    }
    if let Some((k, toks)) = current.take() {
        clauses.push(Clause { kind: k, tokens: toks });
    }

    let mut statement = Statement {
        kind,
        clauses,
        fields: Vec::new(),
        table_refs: Vec::new(),
        derived_tables: Vec::new(),
    };
    analyze(&mut statement);
    Ok(statement)
}

/// Indices of significant `Word` tokens, for two-word lookahead (`ON CONFLICT`).
fn significant_words(tokens: &[Token]) -> Vec<(usize, String)> {
    tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| t.kind == TokenKind::Word)
        .map(|(i, t)| (i, t.value.to_uppercase()))
        .collect()
}

fn next_word_after(sig_words: &[(usize, String)], idx: usize) -> Option<&str> {
    sig_words
        .iter()
        .find(|(i, _)| *i > idx)
        .map(|(_, w)| w.as_str())
}

fn detect_kind(tokens: &[Token]) -> Result<StatementKind, CompileError> {
    let mut depth = 0i32;
    let mut in_dummy = false;
    for tok in tokens {
        match tok.kind {
            TokenKind::DummyStart => in_dummy = true,
            TokenKind::DummyEnd => in_dummy = false,
            _ => {}
        }
        if tok.is_open_paren() {
            depth += 1;
        } else if tok.is_close_paren() {
            depth -= 1;
        }
        if in_dummy || depth != 0 || tok.kind != TokenKind::Word {
            continue;
        }
        if tok.word_eq("SELECT") {
            return Ok(StatementKind::Select);
        }
        if tok.word_eq("INSERT") {
            return Ok(StatementKind::Insert);
        }
        if tok.word_eq("UPDATE") {
            return Ok(StatementKind::Update);
        }
        if tok.word_eq("DELETE") {
            return Ok(StatementKind::Delete);
        }
        if tok.word_eq("WITH") {
            continue;
        }
    }
    let pos = tokens
        .iter()
        .find(|t| !t.is_trivia())
        .map(|t| t.position)
        .unwrap_or_else(crate::tokenizer::Position::zero);
    Err(CompileError::structural(
        "template contains no SELECT, INSERT, UPDATE, or DELETE statement",
        pos,
    ))
}

fn clause_start(
    kind: StatementKind,
    tok: &Token,
    current: &Option<(ClauseKind, Vec<Token>)>,
    seen_main_keyword: bool,
    sig_words: &[(usize, String)],
    idx: usize,
) -> Option<ClauseKind> {
    let current_kind = current.as_ref().map(|(k, _)| *k);
    let upper = tok.value.to_uppercase();
    match upper.as_str() {
        "WITH" if current_kind.is_none() => Some(ClauseKind::With),
        "SELECT" if !seen_main_keyword || kind == StatementKind::Insert => {
            Some(ClauseKind::Select)
        }
        "INSERT" if !seen_main_keyword => Some(ClauseKind::InsertInto),
        "UPDATE" if !seen_main_keyword => Some(ClauseKind::Update),
        "DELETE" if !seen_main_keyword => Some(ClauseKind::DeleteFrom),
        // DELETE FROM keeps FROM inside its own clause
        "FROM" if current_kind != Some(ClauseKind::DeleteFrom) => Some(ClauseKind::From),
        "WHERE" => Some(ClauseKind::Where),
        "GROUP" => Some(ClauseKind::GroupBy),
        "HAVING" => Some(ClauseKind::Having),
        "ORDER" => Some(ClauseKind::OrderBy),
        "LIMIT" => Some(ClauseKind::Limit),
        "OFFSET" => Some(ClauseKind::Offset),
        "RETURNING" => Some(ClauseKind::Returning),
        "VALUES" if kind == StatementKind::Insert => Some(ClauseKind::Values),
        "SET" if kind == StatementKind::Update => Some(ClauseKind::Set),
        "ON" if kind == StatementKind::Insert
            && next_word_after(sig_words, idx) == Some("CONFLICT") =>
        {
            Some(ClauseKind::OnConflict)
        }
        _ => None,
    }
}

/// Populate fields, table references, and derived tables.
fn analyze(statement: &mut Statement) {
    // Field list: SELECT list for queries, RETURNING list for DML.
    let field_tokens: Option<Vec<Token>> = match statement.kind {
        StatementKind::Select => statement.clause(ClauseKind::Select),
        _ => statement.clause(ClauseKind::Returning),
    }
    .map(|clause| clause.tokens[1..].to_vec());
    if let Some(tokens) = field_tokens {
        statement.fields = analyze_fields(&tokens);
    }

    let mut refs = Vec::new();
    let mut derived = Vec::new();
    if let Some(from) = statement.clause(ClauseKind::From) {
        collect_from_refs(&from.tokens[1..], None, &mut refs, &mut derived);
    }
    match statement.kind {
        StatementKind::Insert | StatementKind::Update | StatementKind::Delete => {
            if let Some(table) = statement.target_table() {
                refs.push(TableReference {
                    name: table.clone(),
                    alias: None,
                    table_name: table,
                    query_name: None,
                    context: TableContext::Main,
                    join_type: None,
                });
            }
        }
        StatementKind::Select => {}
    }

    if let Some(with) = statement.clause(ClauseKind::With) {
        analyze_ctes(&with.tokens, &mut refs, &mut derived);
    }
    statement.table_refs = refs;
    statement.derived_tables = derived;
}

/// Split a field-list token run on top-level commas and analyze each entry.
pub fn analyze_fields(tokens: &[Token]) -> Vec<SelectField> {
    // Skip a leading DISTINCT / ALL quantifier.
    let tokens = match tokens.iter().position(|t| !t.is_trivia()) {
        Some(first)
            if tokens[first].word_eq("DISTINCT") || tokens[first].word_eq("ALL") =>
        {
            &tokens[first + 1..]
        }
        _ => tokens,
    };
    let mut fields = Vec::new();
    let mut depth = 0i32;
    let mut in_dummy = false;
    let mut start = 0usize;
    for (i, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::DummyStart => in_dummy = true,
            TokenKind::DummyEnd => in_dummy = false,
            _ => {}
        }
        if tok.is_open_paren() {
            depth += 1;
        } else if tok.is_close_paren() {
            depth -= 1;
        } else if tok.is_symbol(",") && depth == 0 && !in_dummy {
            fields.push(analyze_field(&tokens[start..i]));
            start = i + 1;
        }
    }
    if start < tokens.len() {
        fields.push(analyze_field(&tokens[start..]));
    }
    fields.retain(|f| !f.tokens.is_empty());
    fields
}

fn analyze_field(tokens: &[Token]) -> SelectField {
    let trimmed: Vec<Token> = tokens.iter().filter(|t| !t.is_trivia()).cloned().collect();
    let mut field = SelectField {
        tokens: tokens.to_vec(),
        alias: None,
        original_name: None,
        qualifier: None,
        is_star: false,
    };
    if trimmed.is_empty() {
        field.tokens = Vec::new();
        return field;
    }

    // Explicit alias: ... AS name (at paren depth 0 only)
    let mut expr_end = trimmed.len();
    let mut depth = 0i32;
    let mut as_at = None;
    for (i, t) in trimmed.iter().enumerate() {
        if t.is_open_paren() {
            depth += 1;
        } else if t.is_close_paren() {
            depth -= 1;
        } else if depth == 0 && t.word_eq("AS") {
            as_at = Some(i);
            break;
        }
    }
    if let Some(at) = as_at {
        if let Some(alias_tok) = trimmed.get(at + 1)
            && alias_tok.kind == TokenKind::Word
        {
            field.alias = Some(alias_tok.value.clone());
        }
        expr_end = at;
    } else if trimmed.len() >= 2 {
        // Implicit alias: expression followed by a bare word, where the word
        // cannot be part of the expression (previous token ends a value).
        let last = &trimmed[trimmed.len() - 1];
        let prev = &trimmed[trimmed.len() - 2];
        let prev_ends_value = matches!(
            prev.kind,
            TokenKind::Number | TokenKind::String | TokenKind::DummyEnd
        ) || prev.is_close_paren()
            || (prev.kind == TokenKind::Word && trimmed.len() == 2);
        if last.kind == TokenKind::Word && prev_ends_value && !prev.is_symbol(".") {
            field.alias = Some(last.value.clone());
            expr_end = trimmed.len() - 1;
        }
    }

    let expr = &trimmed[..expr_end];
    match expr {
        [t] if t.is_symbol("*") => field.is_star = true,
        [q, dot, t] if dot.is_symbol(".") && t.is_symbol("*") => {
            field.is_star = true;
            field.qualifier = Some(q.value.clone());
        }
        [t] if t.kind == TokenKind::Word => {
            field.original_name = Some(t.value.clone());
        }
        [q, dot, t] if dot.is_symbol(".") && q.kind == TokenKind::Word && t.kind == TokenKind::Word => {
            field.qualifier = Some(q.value.clone());
            field.original_name = Some(t.value.clone());
        }
        _ => {}
    }
    field
}

/// Collect table references from a FROM-clause token run (the run excludes
/// the FROM keyword itself). Subqueries contribute both a reference and a
/// derived-table entry.
fn collect_from_refs(
    tokens: &[Token],
    query_name: Option<&str>,
    refs: &mut Vec<TableReference>,
    derived: &mut Vec<DerivedTable>,
) {
    let sig: Vec<&Token> = tokens.iter().filter(|t| !t.is_trivia()).collect();
    let mut i = 0usize;
    let mut first = true;
    let mut depth = 0i32;
    let mut pending_join: Option<String> = None;

    while i < sig.len() {
        let tok = sig[i];
        if tok.is_open_paren() {
            // FROM-clause subquery: ( SELECT ... ) alias
            if depth == 0
                && sig.get(i + 1).map(|t| t.word_eq("SELECT")).unwrap_or(false)
                && (first || pending_join.is_some())
            {
                let (inner, after) = balanced_range(&sig, i);
                let alias = find_alias(&sig, after);
                if let Some(alias) = alias.clone() {
                    refs.push(TableReference {
                        name: alias.clone(),
                        alias: None,
                        table_name: alias.clone(),
                        query_name: query_name.map(str::to_string),
                        context: TableContext::Subquery,
                        join_type: pending_join.take(),
                    });
                    derived.push(derive_table(&alias, &inner));
                    // references inside the subquery body
                    collect_inner_refs(&inner, &alias, refs, derived);
                }
                first = false;
                i = after;
                continue;
            }
            depth += 1;
            i += 1;
            continue;
        }
        if tok.is_close_paren() {
            depth -= 1;
            i += 1;
            continue;
        }
        if depth > 0 {
            i += 1;
            continue;
        }

        if tok.word_eq("JOIN") {
            let modifier = pending_join.take().unwrap_or_else(|| "INNER".to_string());
            // table name follows
            if let Some(name_tok) = sig.get(i + 1).filter(|t| t.kind == TokenKind::Word) {
                let alias = find_alias(&sig, i + 2);
                refs.push(TableReference {
                    name: alias.clone().unwrap_or_else(|| name_tok.value.clone()),
                    alias,
                    table_name: name_tok.value.clone(),
                    query_name: query_name.map(str::to_string),
                    context: TableContext::Join,
                    join_type: Some(modifier),
                });
            }
            i += 2;
            continue;
        }
        if tok.word_eq("INNER")
            || tok.word_eq("LEFT")
            || tok.word_eq("RIGHT")
            || tok.word_eq("FULL")
            || tok.word_eq("CROSS")
        {
            pending_join = Some(tok.value.to_uppercase());
            i += 1;
            continue;
        }
        if tok.word_eq("OUTER") {
            i += 1;
            continue;
        }
        if tok.is_symbol(",") {
            // comma-separated FROM list: the next name is another base table
            first = true;
            i += 1;
            continue;
        }
        if first && tok.kind == TokenKind::Word {
            let alias = find_alias(&sig, i + 1);
            refs.push(TableReference {
                name: alias.clone().unwrap_or_else(|| tok.value.clone()),
                alias,
                table_name: tok.value.clone(),
                query_name: query_name.map(str::to_string),
                context: TableContext::Main,
                join_type: None,
            });
            first = false;
        }
        i += 1;
    }
}

/// `(start..)` must begin at an open paren within `sig`; returns the inner
/// token range and the index just past the matching close paren.
fn balanced_range<'a>(sig: &[&'a Token], start: usize) -> (Vec<&'a Token>, usize) {
    let mut depth = 0i32;
    let mut inner = Vec::new();
    let mut i = start;
    while i < sig.len() {
        let tok = sig[i];
        if tok.is_open_paren() {
            depth += 1;
            if depth > 1 {
                inner.push(tok);
            }
        } else if tok.is_close_paren() {
            depth -= 1;
            if depth == 0 {
                return (inner, i + 1);
            }
            inner.push(tok);
        } else {
            inner.push(tok);
        }
        i += 1;
    }
    (inner, i)
}

/// An optional `AS`-or-bare alias at `sig[at]`.
fn find_alias(sig: &[&Token], at: usize) -> Option<String> {
    let mut i = at;
    if sig.get(i).map(|t| t.word_eq("AS")).unwrap_or(false) {
        i += 1;
    }
    let tok = sig.get(i)?;
    if tok.kind != TokenKind::Word {
        return None;
    }
    // Words that follow a table reference without being an alias.
    const STOP: &[&str] = &[
        "ON", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "WHERE", "GROUP",
        "HAVING", "ORDER", "LIMIT", "OFFSET", "UNION", "SET", "USING",
    ];
    if STOP.iter().any(|s| tok.word_eq(s)) {
        return None;
    }
    Some(tok.value.clone())
}

/// References inside a subquery body, attributed to the derived table's name.
fn collect_inner_refs(
    inner: &[&Token],
    query_name: &str,
    refs: &mut Vec<TableReference>,
    derived: &mut Vec<DerivedTable>,
) {
    if let Some(from_at) = inner.iter().position(|t| t.word_eq("FROM")) {
        let owned: Vec<Token> = inner[from_at + 1..].iter().map(|t| (*t).clone()).collect();
        let mut nested = Vec::new();
        collect_from_refs(&owned, Some(query_name), &mut nested, derived);
        // Inner references are reported as CTE/subquery context.
        for mut r in nested {
            if r.context == TableContext::Main || r.context == TableContext::Join {
                r.context = if r.join_type.is_some() {
                    TableContext::Join
                } else {
                    TableContext::Cte
                };
            }
            refs.push(r);
        }
    }
}

/// Parse `WITH name AS ( body ) [, name2 AS ( body2 )]` entries.
fn analyze_ctes(
    tokens: &[Token],
    refs: &mut Vec<TableReference>,
    derived: &mut Vec<DerivedTable>,
) {
    let sig: Vec<&Token> = tokens.iter().filter(|t| !t.is_trivia()).collect();
    let mut i = 0usize;
    // skip WITH [RECURSIVE]
    if sig.get(i).map(|t| t.word_eq("WITH")).unwrap_or(false) {
        i += 1;
    }
    if sig.get(i).map(|t| t.word_eq("RECURSIVE")).unwrap_or(false) {
        i += 1;
    }
    while i < sig.len() {
        let Some(name_tok) = sig.get(i).filter(|t| t.kind == TokenKind::Word) else {
            break;
        };
        let name = name_tok.value.clone();
        i += 1;
        if sig.get(i).map(|t| t.word_eq("AS")).unwrap_or(false) {
            i += 1;
        }
        if !sig.get(i).map(|t| t.is_open_paren()).unwrap_or(false) {
            break;
        }
        let (body, after) = balanced_range(&sig, i);
        derived.push(derive_table(&name, &body));
        collect_inner_refs(&body, &name, refs, derived);
        i = after;
        if sig.get(i).map(|t| t.is_symbol(",")).unwrap_or(false) {
            i += 1;
        } else {
            break;
        }
    }
}

/// Build the derived-table column list from a CTE/subquery body.
fn derive_table(name: &str, body: &[&Token]) -> DerivedTable {
    let mut columns = Vec::new();
    let mut sources = Vec::new();
    if let Some(select_at) = body.iter().position(|t| t.word_eq("SELECT")) {
        let end = body
            .iter()
            .enumerate()
            .skip(select_at + 1)
            .scan(0i32, |depth, (i, t)| {
                if t.is_open_paren() {
                    *depth += 1;
                } else if t.is_close_paren() {
                    *depth -= 1;
                }
                Some((i, *depth, t))
            })
            .find(|(_, depth, t)| *depth == 0 && t.word_eq("FROM"))
            .map(|(i, _, _)| i)
            .unwrap_or(body.len());
        let list: Vec<Token> = body[select_at + 1..end]
            .iter()
            .map(|t| (*t).clone())
            .collect();
        for field in analyze_fields(&list) {
            if field.is_star {
                // Star projection: column set unknowable without the schema.
                return DerivedTable {
                    name: name.to_string(),
                    columns: Vec::new(),
                    column_sources: Vec::new(),
                };
            }
            let column = field
                .alias
                .clone()
                .or_else(|| field.original_name.clone());
            if let Some(column) = column {
                columns.push(column);
                sources.push(
                    field
                        .original_name
                        .map(|orig| (field.qualifier.clone(), orig)),
                );
            }
        }
    }
    DerivedTable {
        name: name.to_string(),
        columns,
        column_sources: sources,
    }
}
