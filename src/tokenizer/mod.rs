//! Directive-aware SQL template tokenizer
//!
//! Produces the position-tagged token sequence the compiler pipeline consumes.
//! SnapSQL directives ride inside ordinary SQL comments: `/*# ... */` carries
//! control flow and the function header, `/*= expr */` substitutes a value,
//! `/*$ name */` substitutes a build-time constant. The placeholder literal
//! that follows a substitution directive (there so the template parses as real
//! SQL) is bracketed in `DUMMY_START`/`DUMMY_END` markers and dropped by the
//! instruction generator.

use crate::error::CompileError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 1-based source location. `0:0` marks compiler-synthesized tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// The synthesized-token position.
    pub fn zero() -> Self {
        Self { line: 0, column: 0 }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Identifiers and keywords, including double-quoted identifiers.
    Word,
    Number,
    /// Single-quoted string literal, quotes included in `value`.
    String,
    /// Operators and punctuation: `,`, `(`, `)`, `=`, `::`, `||`, ...
    Symbol,
    Whitespace,
    Newline,
    LineComment,
    /// Block comment; carries a directive when it is SnapSQL-annotated.
    BlockComment,
    /// Opens a placeholder-literal region following a substitution directive.
    DummyStart,
    /// Closes a placeholder-literal region.
    DummyEnd,
}

/// A SnapSQL directive attached to a block comment token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    If { condition: String },
    ElseIf { condition: String },
    Else,
    End,
    /// Raw `var : collection` binding; split with [`parse_for_binding`].
    For { binding: String },
    Variable { expression: String },
    SystemValue { field: String },
    Const { expression: String },
    /// `/*# ... */` header carrying YAML function metadata.
    FunctionHeader { body: String },
}

/// Split a `for` binding into `(variable, collection)` on the first `:`.
///
/// Returns `None` when either side is empty; the caller turns that into a
/// structural error with the directive's position.
pub fn parse_for_binding(binding: &str) -> Option<(String, String)> {
    let (var, coll) = binding.split_once(':')?;
    let var = var.trim();
    let coll = coll.trim();
    if var.is_empty() || coll.is_empty() {
        return None;
    }
    Some((var.to_string(), coll.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub position: Position,
    pub directive: Option<Directive>,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            value: value.into(),
            position,
            directive: None,
        }
    }

    /// Whitespace, newlines, and comments that carry no directive.
    pub fn is_trivia(&self) -> bool {
        match self.kind {
            TokenKind::Whitespace | TokenKind::Newline | TokenKind::LineComment => true,
            TokenKind::BlockComment => self.directive.is_none(),
            _ => false,
        }
    }

    /// Case-insensitive keyword comparison for `Word` tokens.
    pub fn word_eq(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.value.eq_ignore_ascii_case(keyword)
    }

    pub fn is_symbol(&self, sym: &str) -> bool {
        self.kind == TokenKind::Symbol && self.value == sym
    }

    pub fn is_open_paren(&self) -> bool {
        self.is_symbol("(")
    }

    pub fn is_close_paren(&self) -> bool {
        self.is_symbol(")")
    }
}

/// Keywords that never act as the placeholder literal after a substitution
/// directive. Guards against swallowing a clause keyword when a template
/// omits its dummy.
const NON_DUMMY_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AND", "OR", "ORDER", "GROUP", "BY", "HAVING", "LIMIT", "OFFSET",
    "UNION", "EXCEPT", "INTERSECT", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "ON", "AS",
    "SET", "VALUES", "INSERT", "UPDATE", "DELETE", "INTO", "RETURNING", "WITH",
];

/// Tokenize a template source string.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    i: usize,
    line: u32,
    column: u32,
    tokens: Vec<Token>,
    /// Set after a `Variable`/`Const` directive: the next literal is a dummy.
    pending_dummy: bool,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            i: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            pending_dummy: false,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, CompileError> {
        while self.i < self.chars.len() {
            let token = self.next_token()?;
            self.push(token);
        }
        Ok(self.tokens)
    }

    fn pos(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.i + offset).copied()
    }

    fn bump(&mut self) -> char {
        let c = self.chars[self.i];
        self.i += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    /// Push a token, wrapping the placeholder literal after a substitution
    /// directive in dummy markers.
    fn push(&mut self, token: Token) {
        if self.pending_dummy && !token.is_trivia() {
            self.pending_dummy = false;
            if self.is_dummy_literal(&token) {
                let pos = token.position;
                self.tokens
                    .push(Token::new(TokenKind::DummyStart, "", pos));
                let parenthesized = token.is_open_paren();
                self.tokens.push(token);
                if parenthesized {
                    self.consume_balanced_group();
                }
                let end_pos = self
                    .tokens
                    .last()
                    .map(|t| t.position)
                    .unwrap_or(pos);
                self.tokens.push(Token::new(TokenKind::DummyEnd, "", end_pos));
                return;
            }
        }
        match &token.directive {
            Some(Directive::Variable { .. }) | Some(Directive::Const { .. }) => {
                self.pending_dummy = true;
            }
            _ => {}
        }
        self.tokens.push(token);
    }

    fn is_dummy_literal(&self, token: &Token) -> bool {
        match token.kind {
            TokenKind::Number | TokenKind::String => true,
            TokenKind::Word => !NON_DUMMY_KEYWORDS
                .iter()
                .any(|kw| token.value.eq_ignore_ascii_case(kw)),
            TokenKind::Symbol => token.value == "(",
            _ => false,
        }
    }

    /// Consume tokens through the `)` matching an already-pushed `(`.
    fn consume_balanced_group(&mut self) {
        let mut depth = 1usize;
        while self.i < self.chars.len() && depth > 0 {
            let token = match self.next_token() {
                Ok(t) => t,
                Err(_) => break,
            };
            if token.is_open_paren() {
                depth += 1;
            } else if token.is_close_paren() {
                depth -= 1;
            }
            self.tokens.push(token);
        }
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        let pos = self.pos();
        let c = self.chars[self.i];

        if c == '\n' {
            self.bump();
            return Ok(Token::new(TokenKind::Newline, "\n", pos));
        }
        if c == '\r' {
            self.bump();
            if self.peek(0) == Some('\n') {
                self.bump();
            }
            return Ok(Token::new(TokenKind::Newline, "\n", pos));
        }
        if c == ' ' || c == '\t' {
            let mut value = String::new();
            while matches!(self.peek(0), Some(' ') | Some('\t')) {
                value.push(self.bump());
            }
            return Ok(Token::new(TokenKind::Whitespace, value, pos));
        }
        if c == '-' && self.peek(1) == Some('-') {
            let mut value = String::new();
            while let Some(ch) = self.peek(0) {
                if ch == '\n' {
                    break;
                }
                value.push(self.bump());
            }
            return Ok(Token::new(TokenKind::LineComment, value, pos));
        }
        if c == '/' && self.peek(1) == Some('*') {
            return self.block_comment(pos);
        }
        if c == '\'' {
            return self.string_literal(pos);
        }
        if c == '"' {
            return self.quoted_identifier(pos);
        }
        if c.is_ascii_digit() {
            return Ok(self.number(pos));
        }
        if c.is_alphabetic() || c == '_' {
            let mut value = String::new();
            while let Some(ch) = self.peek(0) {
                if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                    value.push(self.bump());
                } else {
                    break;
                }
            }
            return Ok(Token::new(TokenKind::Word, value, pos));
        }

        // Multi-character operators first.
        for op in ["::", "||", "<=", ">=", "<>", "!="] {
            if self.src_starts_with(op) {
                for _ in 0..op.len() {
                    self.bump();
                }
                return Ok(Token::new(TokenKind::Symbol, op, pos));
            }
        }
        let single = self.bump();
        Ok(Token::new(TokenKind::Symbol, single.to_string(), pos))
    }

    fn src_starts_with(&self, s: &str) -> bool {
        self.chars[self.i..]
            .iter()
            .take(s.len())
            .collect::<String>()
            == s
    }

    fn string_literal(&mut self, pos: Position) -> Result<Token, CompileError> {
        let mut value = String::new();
        value.push(self.bump()); // opening quote
        loop {
            match self.peek(0) {
                None => {
                    return Err(CompileError::Lexical {
                        message: "unterminated string literal".to_string(),
                        position: pos,
                    });
                }
                Some('\'') => {
                    value.push(self.bump());
                    // '' escapes a quote inside the literal
                    if self.peek(0) == Some('\'') {
                        value.push(self.bump());
                    } else {
                        break;
                    }
                }
                Some(_) => value.push(self.bump()),
            }
        }
        Ok(Token::new(TokenKind::String, value, pos))
    }

    fn quoted_identifier(&mut self, pos: Position) -> Result<Token, CompileError> {
        let mut value = String::new();
        value.push(self.bump());
        loop {
            match self.peek(0) {
                None => {
                    return Err(CompileError::Lexical {
                        message: "unterminated quoted identifier".to_string(),
                        position: pos,
                    });
                }
                Some('"') => {
                    value.push(self.bump());
                    break;
                }
                Some(_) => value.push(self.bump()),
            }
        }
        Ok(Token::new(TokenKind::Word, value, pos))
    }

    fn number(&mut self, pos: Position) -> Token {
        let mut value = String::new();
        while let Some(ch) = self.peek(0) {
            if ch.is_ascii_digit() || ch == '.' {
                value.push(self.bump());
            } else if (ch == 'e' || ch == 'E')
                && self
                    .peek(1)
                    .map(|n| n.is_ascii_digit() || n == '+' || n == '-')
                    .unwrap_or(false)
            {
                value.push(self.bump());
                value.push(self.bump());
            } else {
                break;
            }
        }
        Token::new(TokenKind::Number, value, pos)
    }

    fn block_comment(&mut self, pos: Position) -> Result<Token, CompileError> {
        let mut value = String::new();
        value.push(self.bump()); // '/'
        value.push(self.bump()); // '*'
        loop {
            match self.peek(0) {
                None => {
                    return Err(CompileError::Lexical {
                        message: "unterminated block comment".to_string(),
                        position: pos,
                    });
                }
                Some('*') if self.peek(1) == Some('/') => {
                    value.push(self.bump());
                    value.push(self.bump());
                    break;
                }
                Some(_) => value.push(self.bump()),
            }
        }
        let mut token = Token::new(TokenKind::BlockComment, value.clone(), pos);
        token.directive = parse_directive(&value);
        Ok(token)
    }
}

/// Recognize a SnapSQL directive inside a block comment body, if any.
fn parse_directive(comment: &str) -> Option<Directive> {
    let inner = comment
        .strip_prefix("/*")
        .and_then(|s| s.strip_suffix("*/"))?;

    if let Some(expr) = inner.strip_prefix('=') {
        return Some(Directive::Variable {
            expression: expr.trim().to_string(),
        });
    }
    if let Some(expr) = inner.strip_prefix('$') {
        return Some(Directive::Const {
            expression: expr.trim().to_string(),
        });
    }
    let body = inner.strip_prefix('#')?.trim();

    let (head, rest) = match body.split_once(|c: char| c.is_whitespace() || c == ':') {
        Some((h, r)) => (h, r.trim()),
        None => (body, ""),
    };
    match head {
        "if" => Some(Directive::If {
            condition: rest.to_string(),
        }),
        "elseif" => Some(Directive::ElseIf {
            condition: rest.to_string(),
        }),
        "else" if rest.is_empty() => Some(Directive::Else),
        // `else if cond` is accepted as a spelling of elseif
        "else" => rest.strip_prefix("if").map(|r| Directive::ElseIf {
            condition: r.trim().to_string(),
        }),
        "end" => Some(Directive::End),
        "for" => Some(Directive::For {
            binding: rest.to_string(),
        }),
        "system_value" | "EMIT_SYSTEM_VALUE" => Some(Directive::SystemValue {
            field: rest.trim_start_matches(':').trim().to_string(),
        }),
        _ => Some(Directive::FunctionHeader {
            body: body.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn significant(tokens: &[Token]) -> Vec<&Token> {
        tokens.iter().filter(|t| !t.is_trivia()).collect()
    }

    #[test]
    fn test_positions_are_one_based() {
        let tokens = tokenize("SELECT id\nFROM users").unwrap();
        assert_eq!(tokens[0].position, Position::new(1, 1));
        let from = tokens.iter().find(|t| t.word_eq("FROM")).unwrap();
        assert_eq!(from.position, Position::new(2, 1));
    }

    #[test]
    fn test_variable_directive_and_dummy() {
        let tokens = tokenize("WHERE id = /*= id */0").unwrap();
        let sig = significant(&tokens);
        let directive = sig
            .iter()
            .find(|t| t.directive.is_some())
            .expect("directive token");
        assert_eq!(
            directive.directive,
            Some(Directive::Variable {
                expression: "id".to_string()
            })
        );
        let kinds: Vec<TokenKind> = sig.iter().map(|t| t.kind).collect();
        assert!(kinds.contains(&TokenKind::DummyStart));
        assert!(kinds.contains(&TokenKind::DummyEnd));
        // dummy literal sits between the markers
        let start = kinds.iter().position(|k| *k == TokenKind::DummyStart).unwrap();
        assert_eq!(kinds[start + 1], TokenKind::Number);
        assert_eq!(kinds[start + 2], TokenKind::DummyEnd);
    }

    #[test]
    fn test_parenthesized_dummy_consumed_whole() {
        let tokens = tokenize("WHERE id IN /*= ids */(1, 2, 3)").unwrap();
        let start = tokens
            .iter()
            .position(|t| t.kind == TokenKind::DummyStart)
            .unwrap();
        let end = tokens
            .iter()
            .position(|t| t.kind == TokenKind::DummyEnd)
            .unwrap();
        let inner: Vec<_> = tokens[start + 1..end].iter().collect();
        assert!(inner.first().unwrap().is_open_paren());
        assert!(inner.last().unwrap().is_close_paren());
    }

    #[test]
    fn test_clause_keyword_never_swallowed_as_dummy() {
        let tokens = tokenize("SELECT /*= expr */ FROM t").unwrap();
        assert!(!tokens.iter().any(|t| t.kind == TokenKind::DummyStart));
        assert!(tokens.iter().any(|t| t.word_eq("FROM")));
    }

    #[test]
    fn test_control_flow_directives() {
        let tokens =
            tokenize("/*# if active */x/*# elseif archived */y/*# else */z/*# end */").unwrap();
        let directives: Vec<_> = tokens.iter().filter_map(|t| t.directive.clone()).collect();
        assert_eq!(
            directives,
            vec![
                Directive::If {
                    condition: "active".to_string()
                },
                Directive::ElseIf {
                    condition: "archived".to_string()
                },
                Directive::Else,
                Directive::End,
            ]
        );
    }

    #[test]
    fn test_for_binding_split() {
        let tokens = tokenize("/*# for uid : user_ids */").unwrap();
        let Some(Directive::For { binding }) = &tokens[0].directive else {
            panic!("expected for directive");
        };
        assert_eq!(
            parse_for_binding(binding),
            Some(("uid".to_string(), "user_ids".to_string()))
        );
        assert_eq!(parse_for_binding("oops"), None);
        assert_eq!(parse_for_binding(" : xs"), None);
    }

    #[test]
    fn test_function_header_directive() {
        let src = "/*# function_name: getUser\nparameters: { id: int } */SELECT 1";
        let tokens = tokenize(src).unwrap();
        let Some(Directive::FunctionHeader { body }) = &tokens[0].directive else {
            panic!("expected header");
        };
        assert!(body.contains("function_name: getUser"));
    }

    #[test]
    fn test_system_value_directive() {
        let tokens = tokenize("/*# EMIT_SYSTEM_VALUE: created_at */").unwrap();
        assert_eq!(
            tokens[0].directive,
            Some(Directive::SystemValue {
                field: "created_at".to_string()
            })
        );
    }

    #[test]
    fn test_plain_comment_is_not_a_directive() {
        let tokens = tokenize("/* just a note */ SELECT 1").unwrap();
        assert!(tokens[0].directive.is_none());
        assert!(tokens[0].is_trivia());
    }

    #[test]
    fn test_string_escape() {
        let tokens = tokenize("SELECT 'it''s'").unwrap();
        let s = tokens.iter().find(|t| t.kind == TokenKind::String).unwrap();
        assert_eq!(s.value, "'it''s'");
    }

    #[test]
    fn test_unterminated_comment_is_lexical_error() {
        let err = tokenize("SELECT /* oops").unwrap_err();
        assert!(matches!(err, CompileError::Lexical { .. }));
    }

    #[test]
    fn test_double_colon_operator() {
        let tokens = tokenize("age::integer").unwrap();
        assert!(tokens.iter().any(|t| t.is_symbol("::")));
    }

    #[test]
    fn test_const_directive() {
        let tokens = tokenize("SELECT * FROM /*$ table_prefix */users_dev").unwrap();
        assert_eq!(
            tokens[0..]
                .iter()
                .find_map(|t| t.directive.clone()),
            Some(Directive::Const {
                expression: "table_prefix".to_string()
            })
        );
    }
}
