//! Instruction generation
//!
//! Converts the (possibly rewritten) token stream into the IR instruction
//! list in a single left-to-right pass: static text buffering with whitespace
//! collapsing, directive dispatch over a typed block stack, boundary
//! delimiter handling, LIMIT/OFFSET scaffolding, and dialect pattern
//! expansion. Post-passes consolidate boundary pairs, assign loop environment
//! indices, and normalize time functions for a pinned dialect.

pub mod optimizer;
pub mod patterns;

use crate::dialect::Dialect;
use crate::error::CompileError;
use crate::ir::{CelExpression, Instruction, Opcode};
use crate::parser::StatementKind;
use crate::tokenizer::{Directive, Position, Token, TokenKind, parse_for_binding};
use std::collections::BTreeMap;

/// Everything the generator needs from the processing context.
pub struct GeneratorInput<'a> {
    pub tokens: &'a [Token],
    pub statement_kind: StatementKind,
    pub expressions: &'a [CelExpression],
    pub dialect: Option<Dialect>,
    pub constants: &'a BTreeMap<String, String>,
    /// Configured system field names, for `system_value` validation.
    pub system_field_names: Vec<String>,
    /// True for INSERT ... SELECT statements, which need system values moved
    /// into the SELECT field list after generation.
    pub insert_uses_select: bool,
}

/// Run the full generation pipeline: base pass, INSERT...SELECT
/// normalization, boundary optimization, environment assignment, and
/// time-function normalization.
pub fn generate(input: &GeneratorInput) -> Result<Vec<Instruction>, CompileError> {
    let mut generator = Generator::new(input);
    generator.run()?;
    let mut instructions = generator.out;

    if input.statement_kind == StatementKind::Insert && input.insert_uses_select {
        move_system_values_into_select(&mut instructions);
    }

    let mut instructions = optimizer::optimize(instructions);
    assign_env_indices(&mut instructions);

    if let Some(dialect) = input.dialect {
        for ins in &mut instructions {
            if ins.op == Opcode::EmitStatic
                && let Some(value) = ins.value.take()
            {
                ins.value = Some(patterns::normalize_time_functions(&value, dialect));
            }
        }
    }
    Ok(instructions)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    If,
    ElseIf,
    Else,
    For,
}

#[derive(Debug)]
struct Block {
    kind: BlockKind,
    /// Paren depth at which the block opened; boundary delimiters only count
    /// at this depth.
    paren_depth: usize,
    /// No significant content seen yet (leading-delimiter detection).
    awaiting_first: bool,
    pos: Position,
}

/// Open-paren frames. Cast/Concat frames carry the state of a split dialect
/// pattern whose inner expression flows through the normal pipeline.
#[derive(Debug)]
enum Frame {
    Plain,
    Cast {
        as_idx: usize,
        close: usize,
        type_text: String,
    },
    Concat {
        close: usize,
    },
}

struct Generator<'a> {
    input: &'a GeneratorInput<'a>,
    out: Vec<Instruction>,
    buf: String,
    buf_pos: Option<Position>,
    blocks: Vec<Block>,
    frames: Vec<Frame>,
    /// Block-stack depth at which a conditional block closed, awaiting a
    /// clause-start token to anchor a BOUNDARY marker.
    pending_boundary: Option<usize>,
    has_limit: bool,
    has_offset: bool,
}

const CLAUSE_WORDS: &[&str] = &[
    "FROM", "WHERE", "GROUP", "HAVING", "LIMIT", "OFFSET", "UNION", "ORDER", "EXCEPT",
    "INTERSECT",
];

impl<'a> Generator<'a> {
    fn new(input: &'a GeneratorInput<'a>) -> Self {
        Self {
            input,
            out: Vec::new(),
            buf: String::new(),
            buf_pos: None,
            blocks: Vec::new(),
            frames: Vec::new(),
            pending_boundary: None,
            has_limit: false,
            has_offset: false,
        }
    }

    fn run(&mut self) -> Result<(), CompileError> {
        let tokens = self.input.tokens;
        let mut i = 0usize;

        while i < tokens.len() {
            let tok = &tokens[i];

            // Split-pattern frame interceptions are index-anchored.
            enum Intercept {
                CastClose { close: usize, type_text: String },
                ConcatClose,
            }
            let intercept = match self.frames.last() {
                Some(Frame::Cast { as_idx, close, type_text }) if i == *as_idx => {
                    Some(Intercept::CastClose {
                        close: *close,
                        type_text: type_text.clone(),
                    })
                }
                Some(Frame::Concat { close }) if i == *close => Some(Intercept::ConcatClose),
                _ => None,
            };
            match intercept {
                Some(Intercept::CastClose { close, type_text }) => {
                    self.emit_variants(patterns::cast_close_variants(&type_text), tok.position)?;
                    self.frames.pop();
                    i = close + 1;
                    continue;
                }
                Some(Intercept::ConcatClose) => {
                    self.append_text(")", tok.position);
                    self.frames.pop();
                    i += 1;
                    continue;
                }
                None => {}
            }

            match tok.kind {
                TokenKind::DummyStart => {
                    while i < tokens.len() && tokens[i].kind != TokenKind::DummyEnd {
                        i += 1;
                    }
                    i += 1;
                    continue;
                }
                TokenKind::DummyEnd => {
                    i += 1;
                    continue;
                }
                TokenKind::Whitespace | TokenKind::LineComment => {
                    self.space();
                    i += 1;
                    continue;
                }
                TokenKind::Newline => {
                    self.newline();
                    i += 1;
                    continue;
                }
                TokenKind::BlockComment => {
                    if let Some(directive) = tok.directive.clone() {
                        i = self.handle_directive(directive, tok.position, i)?;
                    } else {
                        self.space();
                        i += 1;
                    }
                    continue;
                }
                _ => {}
            }

            // Clause-start token after a closed conditional block: the
            // BOUNDARY marker goes in before the static buffer flushes.
            if self.is_clause_boundary(tok) && self.pending_boundary == Some(self.blocks.len()) {
                self.out.push(Instruction::boundary(tok.position));
                self.pending_boundary = None;
            }

            // Top-level LIMIT / OFFSET rewriting (SELECT only).
            if self.input.statement_kind == StatementKind::Select
                && self.frames.is_empty()
                && (tok.word_eq("LIMIT") || tok.word_eq("OFFSET"))
            {
                i = self.handle_limit_offset(i, tok.word_eq("LIMIT"))?;
                continue;
            }

            if let Some(next) = self.try_boundary_delimiter(i) {
                i = next;
                continue;
            }

            if let Some(next) = self.try_pattern(i)? {
                i = next;
                continue;
            }

            self.default_append(tok)?;
            i += 1;
        }

        self.flush();
        if let Some(block) = self.blocks.last() {
            let what = match block.kind {
                BlockKind::For => "for",
                _ => "if",
            };
            return Err(CompileError::structural(
                format!("unclosed '{what}' directive"),
                block.pos,
            ));
        }

        if self.input.statement_kind == StatementKind::Select {
            if !self.has_limit {
                self.out.push(Instruction::if_system_limit());
                self.out
                    .push(Instruction::emit_static(" LIMIT ", Position::zero()));
                self.out.push(Instruction::emit_system_limit());
                self.out.push(Instruction::end(Position::zero()));
            }
            if !self.has_offset {
                self.out.push(Instruction::if_system_offset());
                self.out
                    .push(Instruction::emit_static(" OFFSET ", Position::zero()));
                self.out.push(Instruction::emit_system_offset());
                self.out.push(Instruction::end(Position::zero()));
            }
        }
        Ok(())
    }

    // --- static buffer -----------------------------------------------------

    fn space(&mut self) {
        if !self.buf.is_empty() && !self.buf.ends_with(' ') && !self.buf.ends_with('\n') {
            self.buf.push(' ');
        }
    }

    fn newline(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        if self.buf.ends_with(' ') {
            self.buf.pop();
        }
        self.buf.push('\n');
    }

    fn append_text(&mut self, text: &str, pos: Position) {
        self.mark_content();
        if self.buf.is_empty() {
            self.buf_pos = Some(pos);
        }
        self.buf.push_str(text);
    }

    fn flush(&mut self) {
        let trimmed = self.buf.trim_end();
        if !trimmed.is_empty() {
            let pos = self.buf_pos.unwrap_or_else(Position::zero);
            self.out.push(Instruction::emit_static(trimmed, pos));
        }
        self.buf.clear();
        self.buf_pos = None;
    }

    fn mark_content(&mut self) {
        if let Some(block) = self.blocks.last_mut() {
            block.awaiting_first = false;
        }
    }

    // --- token helpers -----------------------------------------------------

    fn next_sig(&self, from: usize) -> Option<usize> {
        self.input.tokens[from..]
            .iter()
            .position(|t| !t.is_trivia())
            .map(|offset| from + offset)
    }

    fn find_matching_paren(&self, open: usize) -> Option<usize> {
        let mut depth = 0i32;
        for (j, tok) in self.input.tokens.iter().enumerate().skip(open) {
            if tok.is_open_paren() {
                depth += 1;
            } else if tok.is_close_paren() {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
        }
        None
    }

    fn range_has_directive(&self, start: usize, end: usize) -> bool {
        self.input.tokens[start..end]
            .iter()
            .any(|t| t.directive.is_some())
    }

    /// Collapse a token range into normalized static text.
    fn collapse_range(&self, start: usize, end: usize) -> String {
        let mut text = String::new();
        for tok in &self.input.tokens[start..end] {
            if tok.is_trivia() || tok.kind == TokenKind::Newline {
                if !text.is_empty() && !text.ends_with(' ') {
                    text.push(' ');
                }
            } else if !matches!(tok.kind, TokenKind::DummyStart | TokenKind::DummyEnd) {
                text.push_str(&tok.value);
            }
        }
        text.trim().to_string()
    }

    fn is_clause_boundary(&self, tok: &Token) -> bool {
        if tok.is_close_paren() {
            return true;
        }
        tok.kind == TokenKind::Word && CLAUSE_WORDS.iter().any(|w| tok.word_eq(w))
    }

    fn expr_index(&self, expression: &str) -> Option<usize> {
        let wanted = expression.trim();
        self.input
            .expressions
            .iter()
            .position(|e| e.expression == wanted)
    }

    // --- directives --------------------------------------------------------

    fn handle_directive(
        &mut self,
        directive: Directive,
        pos: Position,
        i: usize,
    ) -> Result<usize, CompileError> {
        match directive {
            Directive::FunctionHeader { .. } => Ok(i + 1),
            Directive::If { condition } => {
                if condition.is_empty() {
                    return Err(CompileError::structural(
                        "'if' directive requires a condition",
                        pos,
                    ));
                }
                self.mark_content();
                self.flush();
                let ins = match self.expr_index(&condition) {
                    Some(idx) => Instruction::if_expr(idx, pos),
                    None => Instruction::if_condition(condition, pos),
                };
                self.out.push(ins);
                self.blocks.push(Block {
                    kind: BlockKind::If,
                    paren_depth: self.frames.len(),
                    awaiting_first: true,
                    pos,
                });
                self.pending_boundary = None;
                Ok(i + 1)
            }
            Directive::ElseIf { condition } => {
                let Some(top) = self.blocks.last_mut() else {
                    return Err(CompileError::structural("'elseif' without 'if'", pos));
                };
                if !matches!(top.kind, BlockKind::If | BlockKind::ElseIf) {
                    return Err(CompileError::structural("'elseif' without 'if'", pos));
                }
                top.kind = BlockKind::ElseIf;
                top.awaiting_first = true;
                self.flush();
                let ins = match self.expr_index(&condition) {
                    Some(idx) => Instruction::elseif_expr(idx, pos),
                    None => Instruction::elseif_condition(condition, pos),
                };
                self.out.push(ins);
                Ok(i + 1)
            }
            Directive::Else => {
                let Some(top) = self.blocks.last_mut() else {
                    return Err(CompileError::structural("'else' without 'if'", pos));
                };
                if !matches!(top.kind, BlockKind::If | BlockKind::ElseIf) {
                    return Err(CompileError::structural("'else' without 'if'", pos));
                }
                top.kind = BlockKind::Else;
                top.awaiting_first = true;
                self.flush();
                self.out.push(Instruction::else_marker(pos));
                Ok(i + 1)
            }
            Directive::End => {
                self.flush();
                let Some(block) = self.blocks.pop() else {
                    return Err(CompileError::structural(
                        "'end' without matching 'if' or 'for'",
                        pos,
                    ));
                };
                match block.kind {
                    BlockKind::For => self.out.push(Instruction::loop_end(pos)),
                    _ => self.out.push(Instruction::end(pos)),
                }
                self.pending_boundary = Some(self.blocks.len());
                Ok(i + 1)
            }
            Directive::For { binding } => {
                let Some((variable, collection)) = parse_for_binding(&binding) else {
                    return Err(CompileError::structural(
                        format!("malformed for binding '{binding}' (expected 'var : collection')"),
                        pos,
                    ));
                };
                self.mark_content();
                self.flush();
                let idx = self.expr_index(&collection).ok_or_else(|| {
                    CompileError::reference(
                        format!("no expression entry for loop collection '{collection}'"),
                        pos,
                    )
                })?;
                self.out.push(Instruction::loop_start(variable, idx, pos));
                self.blocks.push(Block {
                    kind: BlockKind::For,
                    paren_depth: self.frames.len(),
                    awaiting_first: true,
                    pos,
                });
                self.pending_boundary = None;
                Ok(i + 1)
            }
            Directive::Variable { expression } => {
                self.mark_content();
                self.flush();
                let idx = self.expr_index(&expression).ok_or_else(|| {
                    CompileError::reference(
                        format!("no expression entry for '{expression}'"),
                        pos,
                    )
                })?;
                self.out.push(Instruction::emit_eval(idx, pos));
                Ok(i + 1)
            }
            Directive::Const { expression } => {
                let name = expression.trim();
                let Some(value) = self.input.constants.get(name) else {
                    return Err(CompileError::reference(
                        format!("unknown constant '{name}'"),
                        pos,
                    ));
                };
                let value = value.clone();
                self.append_text(&value, pos);
                Ok(i + 1)
            }
            Directive::SystemValue { field } => {
                if !self
                    .input
                    .system_field_names
                    .iter()
                    .any(|f| f.eq_ignore_ascii_case(&field))
                {
                    return Err(CompileError::reference(
                        format!("unknown system field '{field}'"),
                        pos,
                    ));
                }
                self.mark_content();
                self.flush();
                self.out.push(Instruction::emit_system_value(field, pos));
                Ok(i + 1)
            }
        }
    }

    // --- boundary delimiters -----------------------------------------------

    fn try_boundary_delimiter(&mut self, i: usize) -> Option<usize> {
        let tok = &self.input.tokens[i];
        let is_delimiter =
            tok.is_symbol(",") || tok.word_eq("AND") || tok.word_eq("OR");
        if !is_delimiter {
            return None;
        }
        let block = self.blocks.last()?;
        if block.paren_depth != self.frames.len() {
            return None;
        }
        let (kind, awaiting) = (block.kind, block.awaiting_first);

        let trailing = self
            .next_sig(i + 1)
            .map(|j| {
                matches!(
                    self.input.tokens[j].directive,
                    Some(Directive::End) | Some(Directive::Else) | Some(Directive::ElseIf { .. })
                )
            })
            .unwrap_or(false);

        let emit = match kind {
            BlockKind::If | BlockKind::ElseIf | BlockKind::Else => awaiting || trailing,
            // In a loop only the final trailing delimiter is conditional;
            // everything else is plain static.
            BlockKind::For => trailing,
        };
        if !emit {
            return None;
        }
        self.flush();
        self.out
            .push(Instruction::emit_unless_boundary(tok.value.clone(), tok.position));
        self.mark_content();
        Some(i + 1)
    }

    // --- LIMIT / OFFSET ----------------------------------------------------

    fn handle_limit_offset(&mut self, i: usize, is_limit: bool) -> Result<usize, CompileError> {
        let tokens = self.input.tokens;
        let kw_pos = tokens[i].position;
        let keyword = if is_limit { "LIMIT " } else { "OFFSET " };

        self.mark_content();
        self.flush();
        self.out.push(Instruction::emit_static(keyword, kw_pos));
        self.out.push(if is_limit {
            Instruction::if_system_limit()
        } else {
            Instruction::if_system_offset()
        });
        self.out.push(if is_limit {
            Instruction::emit_system_limit()
        } else {
            Instruction::emit_system_offset()
        });
        self.out.push(Instruction::else_marker(Position::zero()));

        let value_idx = self.next_sig(i + 1).ok_or_else(|| {
            CompileError::structural(format!("{} requires a value", keyword.trim()), kw_pos)
        })?;
        let value_tok = &tokens[value_idx];
        let after = match value_tok.kind {
            TokenKind::Number => {
                self.out
                    .push(Instruction::emit_static(value_tok.value.clone(), value_tok.position));
                value_idx + 1
            }
            TokenKind::Word if value_tok.word_eq("ALL") => {
                self.out
                    .push(Instruction::emit_static(value_tok.value.clone(), value_tok.position));
                value_idx + 1
            }
            TokenKind::BlockComment => {
                let Some(Directive::Variable { expression }) = value_tok.directive.clone() else {
                    return Err(CompileError::structural(
                        format!("{} requires a literal or /*= expr */ value", keyword.trim()),
                        value_tok.position,
                    ));
                };
                let idx = self.expr_index(&expression).ok_or_else(|| {
                    CompileError::reference(
                        format!("no expression entry for '{expression}'"),
                        value_tok.position,
                    )
                })?;
                self.out
                    .push(Instruction::emit_eval(idx, value_tok.position));
                // skip the dummy literal that follows the directive
                let mut j = value_idx + 1;
                if let Some(d) = self.next_sig(j)
                    && tokens[d].kind == TokenKind::DummyStart
                {
                    j = d + 1;
                    while j < tokens.len() && tokens[j].kind != TokenKind::DummyEnd {
                        j += 1;
                    }
                    j += 1;
                }
                j
            }
            _ => {
                return Err(CompileError::structural(
                    format!("{} requires a literal or /*= expr */ value", keyword.trim()),
                    value_tok.position,
                ));
            }
        };
        // the closing END carries the keyword's position
        self.out.push(Instruction::end(kw_pos));
        if is_limit {
            self.has_limit = true;
        } else {
            self.has_offset = true;
        }
        Ok(after)
    }

    // --- dialect patterns --------------------------------------------------

    fn emit_variants(
        &mut self,
        variants: Vec<patterns::Variant>,
        pos: Position,
    ) -> Result<(), CompileError> {
        self.mark_content();
        match self.input.dialect {
            Some(dialect) => {
                let Some(text) = patterns::select_variant(&variants, dialect) else {
                    return Err(CompileError::Dialect {
                        message: format!(
                            "construct has no defined variant for dialect '{dialect}'"
                        ),
                        position: Some(pos),
                    });
                };
                self.append_text(&text, pos);
            }
            None => {
                self.flush();
                for (fragment, dialects) in variants {
                    self.out.push(Instruction::emit_if_dialect(
                        fragment,
                        patterns::dialect_names(dialects),
                        pos,
                    ));
                }
            }
        }
        Ok(())
    }

    fn try_pattern(&mut self, i: usize) -> Result<Option<usize>, CompileError> {
        let tok = &self.input.tokens[i];
        match tok.kind {
            TokenKind::Word => {
                let upper = tok.value.to_uppercase();
                match upper.as_str() {
                    "CAST" => self.try_cast(i),
                    "CONCAT" => self.try_concat(i),
                    "NOW" => self.try_call_pattern(i, patterns::now_variants()),
                    "RAND" | "RANDOM" => {
                        self.try_call_pattern(i, patterns::random_variants())
                    }
                    "CURRENT_TIMESTAMP" => {
                        // CURRENT_TIMESTAMP(6) is a different construct
                        let called = self
                            .next_sig(i + 1)
                            .map(|j| self.input.tokens[j].is_open_paren())
                            .unwrap_or(false);
                        if called {
                            return Ok(None);
                        }
                        self.emit_variants(
                            patterns::current_timestamp_variants(),
                            tok.position,
                        )?;
                        Ok(Some(i + 1))
                    }
                    "TRUE" | "FALSE" => {
                        self.emit_variants(
                            patterns::bool_variants(&tok.value, upper == "TRUE"),
                            tok.position,
                        )?;
                        Ok(Some(i + 1))
                    }
                    _ => Ok(None),
                }
            }
            TokenKind::Symbol if tok.value == "::" => self.try_pg_cast(i),
            _ => Ok(None),
        }
    }

    /// Zero-argument call patterns: NOW(), RAND(), RANDOM().
    fn try_call_pattern(
        &mut self,
        i: usize,
        variants: Vec<patterns::Variant>,
    ) -> Result<Option<usize>, CompileError> {
        let Some(open) = self.next_sig(i + 1) else {
            return Ok(None);
        };
        if !self.input.tokens[open].is_open_paren() {
            return Ok(None);
        }
        let Some(close) = self.next_sig(open + 1) else {
            return Ok(None);
        };
        if !self.input.tokens[close].is_close_paren() {
            return Ok(None);
        }
        self.emit_variants(variants, self.input.tokens[i].position)?;
        Ok(Some(close + 1))
    }

    fn try_cast(&mut self, i: usize) -> Result<Option<usize>, CompileError> {
        let tokens = self.input.tokens;
        let Some(open) = self.next_sig(i + 1) else {
            return Ok(None);
        };
        if !tokens[open].is_open_paren() {
            return Ok(None);
        }
        let Some(close) = self.find_matching_paren(open) else {
            return Ok(None);
        };
        // locate AS at depth 1
        let mut depth = 0i32;
        let mut as_idx = None;
        for (j, t) in tokens.iter().enumerate().take(close).skip(open) {
            if t.is_open_paren() {
                depth += 1;
            } else if t.is_close_paren() {
                depth -= 1;
            } else if depth == 1 && t.word_eq("AS") {
                as_idx = Some(j);
                break;
            }
        }
        let Some(as_idx) = as_idx else {
            return Ok(None);
        };
        let pos = tokens[i].position;
        let type_text = self.collapse_range(as_idx + 1, close);

        if !self.range_has_directive(open + 1, close) {
            let expr = self.collapse_range(open + 1, as_idx);
            self.emit_variants(patterns::cast_variants(&expr, &type_text), pos)?;
            Ok(Some(close + 1))
        } else if self.range_has_directive(as_idx, close) {
            // dynamic type text: leave the construct alone
            Ok(None)
        } else {
            self.emit_variants(patterns::cast_open_variants(), pos)?;
            self.frames.push(Frame::Cast {
                as_idx,
                close,
                type_text,
            });
            Ok(Some(open + 1))
        }
    }

    fn try_concat(&mut self, i: usize) -> Result<Option<usize>, CompileError> {
        let tokens = self.input.tokens;
        let Some(open) = self.next_sig(i + 1) else {
            return Ok(None);
        };
        if !tokens[open].is_open_paren() {
            return Ok(None);
        }
        let Some(close) = self.find_matching_paren(open) else {
            return Ok(None);
        };
        let pos = tokens[i].position;

        if !self.range_has_directive(open + 1, close) {
            let mut args = Vec::new();
            let mut depth = 0i32;
            let mut start = open + 1;
            for j in open + 1..close {
                let t = &tokens[j];
                if t.is_open_paren() {
                    depth += 1;
                } else if t.is_close_paren() {
                    depth -= 1;
                } else if depth == 0 && t.is_symbol(",") {
                    args.push(self.collapse_range(start, j));
                    start = j + 1;
                }
            }
            args.push(self.collapse_range(start, close));
            self.emit_variants(patterns::concat_variants(&args), pos)?;
            Ok(Some(close + 1))
        } else {
            self.emit_variants(patterns::concat_open_variants(), pos)?;
            self.frames.push(Frame::Concat { close });
            Ok(Some(open + 1))
        }
    }

    fn try_pg_cast(&mut self, i: usize) -> Result<Option<usize>, CompileError> {
        let tokens = self.input.tokens;
        let pos = tokens[i].position;
        let Some(type_idx) = self.next_sig(i + 1) else {
            return Ok(None);
        };
        if tokens[type_idx].kind != TokenKind::Word {
            return Ok(None);
        }
        // optional type modifiers: ::varchar(10)
        let mut type_end = type_idx;
        if let Some(p) = self.next_sig(type_idx + 1)
            && tokens[p].is_open_paren()
            && let Some(c) = self.find_matching_paren(p)
            && tokens[p + 1..c].iter().all(|t| {
                t.is_trivia() || t.kind == TokenKind::Number || t.is_symbol(",")
            })
        {
            type_end = c;
        }
        let type_text = self.collapse_range(type_idx, type_end + 1);
        let Some(operand_start) = split_operand(&self.buf) else {
            return Ok(None);
        };
        let operand_end = self.buf.trim_end().len();
        let operand = self.buf[operand_start..operand_end].to_string();

        match self.input.dialect.map(Dialect::family) {
            Some(Dialect::Postgres) => {
                self.buf.truncate(operand_end);
                self.append_text(&format!("::{type_text}"), pos);
            }
            Some(_) => {
                self.buf.truncate(operand_start);
                self.append_text(&format!("CAST({operand} AS {type_text})"), pos);
            }
            None => {
                self.buf.truncate(operand_start);
                self.flush();
                self.emit_variants(patterns::pg_cast_variants(&operand, &type_text), pos)?;
            }
        }
        Ok(Some(type_end + 1))
    }

    // --- default token handling --------------------------------------------

    fn default_append(&mut self, tok: &Token) -> Result<(), CompileError> {
        if tok.is_open_paren() {
            self.frames.push(Frame::Plain);
            self.append_text("(", tok.position);
            return Ok(());
        }
        if tok.is_close_paren() {
            self.frames.pop();
            self.append_text(")", tok.position);
            return Ok(());
        }
        if tok.is_symbol(",")
            && matches!(self.frames.last(), Some(Frame::Concat { .. }))
        {
            return self.emit_variants(patterns::concat_separator_variants(), tok.position);
        }
        self.append_text(&tok.value, tok.position);
        Ok(())
    }
}

/// INSERT ... SELECT normalization: system-value placeholders synthesized
/// after the column list move into the SELECT field list, immediately before
/// FROM, each preceded by `, `.
fn move_system_values_into_select(instructions: &mut Vec<Instruction>) {
    let Some(select_idx) = instructions.iter().position(|ins| {
        ins.op == Opcode::EmitStatic
            && ins
                .value
                .as_deref()
                .map(|v| contains_top_level_word(v, "SELECT"))
                .unwrap_or(false)
    }) else {
        return;
    };

    let misplaced: Vec<usize> = instructions
        .iter()
        .enumerate()
        .take(select_idx)
        .filter(|(_, ins)| ins.op == Opcode::EmitSystemValue)
        .map(|(i, _)| i)
        .collect();
    if misplaced.is_empty() {
        return;
    }
    let mut moved = Vec::with_capacity(misplaced.len());
    for idx in misplaced.into_iter().rev() {
        moved.push(instructions.remove(idx));
    }
    moved.reverse();
    let select_idx = instructions
        .iter()
        .position(|ins| {
            ins.op == Opcode::EmitStatic
                && ins
                    .value
                    .as_deref()
                    .map(|v| contains_top_level_word(v, "SELECT"))
                    .unwrap_or(false)
        })
        .unwrap_or(0);

    // find the static containing a top-level FROM, at or after the SELECT
    let from_target = instructions
        .iter()
        .enumerate()
        .skip(select_idx)
        .find(|(_, ins)| {
            ins.op == Opcode::EmitStatic
                && ins
                    .value
                    .as_deref()
                    .map(|v| find_top_level_word(v, "FROM").is_some())
                    .unwrap_or(false)
        })
        .map(|(i, _)| i);

    match from_target {
        Some(target) => {
            let original = instructions[target].clone();
            let value = original.value.clone().unwrap_or_default();
            let split_at = find_top_level_word(&value, "FROM").unwrap_or(0);
            let prefix = value[..split_at].trim_end().to_string();
            let suffix = value[split_at..].to_string();

            let mut replacement = Vec::new();
            if !prefix.is_empty() {
                replacement.push(Instruction::emit_static(prefix, parse_pos(&original.pos)));
            }
            for ins in &moved {
                replacement.push(Instruction::emit_static(", ", parse_pos(&ins.pos)));
                replacement.push(ins.clone());
            }
            replacement.push(Instruction::emit_static(
                format!(" {suffix}"),
                parse_pos(&original.pos),
            ));
            instructions.splice(target..=target, replacement);
        }
        None => {
            // SELECT without FROM: append to the end of the field list
            let insert_at = select_idx + 1;
            let mut replacement = Vec::new();
            for ins in &moved {
                replacement.push(Instruction::emit_static(", ", parse_pos(&ins.pos)));
                replacement.push(ins.clone());
            }
            instructions.splice(insert_at..insert_at, replacement);
        }
    }
}

fn parse_pos(pos: &str) -> Position {
    let (line, column) = pos.split_once(':').unwrap_or(("0", "0"));
    Position::new(line.parse().unwrap_or(0), column.parse().unwrap_or(0))
}

fn contains_top_level_word(value: &str, word: &str) -> bool {
    find_top_level_word(value, word).is_some()
}

/// Byte offset of a word occurrence at paren depth 0, word-boundary safe.
fn find_top_level_word(value: &str, word: &str) -> Option<usize> {
    let bytes = value.as_bytes();
    let mut depth = 0i32;
    let mut i = 0usize;
    while i < value.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
        let end = i + word.len();
        if depth == 0
            && end <= value.len()
            && value.is_char_boundary(end)
            && value[i..end].eq_ignore_ascii_case(word)
        {
            let before_ok = i == 0 || !bytes[i - 1].is_ascii_alphanumeric() && bytes[i - 1] != b'_';
            let after_ok = end >= value.len()
                || (!bytes[end].is_ascii_alphanumeric() && bytes[end] != b'_');
            if before_ok && after_ok {
                return Some(i);
            }
        }
        i += value[i..].chars().next().map(char::len_utf8).unwrap_or(1);
    }
    None
}

/// Walk environment indices onto loop instructions: each LOOP_START gets the
/// creation-order index of its environment, each LOOP_END the enclosing
/// scope's index (0 at the outermost level).
pub fn assign_env_indices(instructions: &mut [Instruction]) {
    let mut counter = 0usize;
    let mut stack: Vec<usize> = vec![0];
    for ins in instructions {
        match ins.op {
            Opcode::LoopStart => {
                counter += 1;
                ins.env_index = Some(counter);
                stack.push(counter);
            }
            Opcode::LoopEnd => {
                stack.pop();
                ins.env_index = Some(*stack.last().unwrap_or(&0));
            }
            _ => {}
        }
    }
}

/// Locate the start of the `::` cast operand at the end of the static buffer:
/// an identifier chain, a string literal, or a balanced paren group with an
/// optional function name.
fn split_operand(buf: &str) -> Option<usize> {
    let end = buf.trim_end().len();
    if end == 0 {
        return None;
    }
    let bytes = buf.as_bytes();
    let mut i = end;
    match bytes[end - 1] {
        b')' => {
            let mut depth = 0i32;
            while i > 0 {
                i -= 1;
                match bytes[i] {
                    b')' => depth += 1,
                    b'(' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            if depth != 0 {
                return None;
            }
            while i > 0 && is_ident_byte(bytes[i - 1]) {
                i -= 1;
            }
        }
        b'\'' => {
            i -= 1;
            loop {
                if i == 0 {
                    return None;
                }
                i -= 1;
                if bytes[i] == b'\'' {
                    break;
                }
            }
        }
        b if is_ident_byte(b) => {
            while i > 0 && (is_ident_byte(bytes[i - 1]) || bytes[i - 1] == b'.') {
                i -= 1;
            }
        }
        _ => return None,
    }
    (i < end).then_some(i)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'"' || b == b'$'
}

#[cfg(test)]
mod tests;
