//! Cross-dialect SQL pattern table
//!
//! Each pattern the generator detects maps to one fragment per dialect
//! family. MariaDB follows MySQL for every construct here, so variant lists
//! name the three canonical families and cover them without overlap.

use crate::dialect::Dialect;

pub const MYSQL_SQLITE: &[Dialect] = &[Dialect::Mysql, Dialect::Sqlite];
pub const POSTGRES: &[Dialect] = &[Dialect::Postgres];
pub const POSTGRES_SQLITE: &[Dialect] = &[Dialect::Postgres, Dialect::Sqlite];
pub const MYSQL: &[Dialect] = &[Dialect::Mysql];

/// A fragment alternative: the SQL text and the dialects it applies to.
pub type Variant = (String, &'static [Dialect]);

pub fn dialect_names(dialects: &[Dialect]) -> Vec<String> {
    dialects.iter().map(|d| d.to_string()).collect()
}

/// Pick the variant matching a pinned dialect. Pattern tables cover every
/// family, so a miss is a programming error and handled by the caller.
pub fn select_variant(variants: &[Variant], dialect: Dialect) -> Option<String> {
    let family = dialect.family();
    variants
        .iter()
        .find(|(_, dialects)| dialects.contains(&family))
        .map(|(text, _)| text.clone())
}

/// `NOW()` — MySQL spelling; standard elsewhere.
pub fn now_variants() -> Vec<Variant> {
    vec![
        ("NOW()".to_string(), MYSQL),
        ("CURRENT_TIMESTAMP".to_string(), POSTGRES_SQLITE),
    ]
}

/// `CURRENT_TIMESTAMP` — standard spelling; MySQL prefers `NOW()`.
pub fn current_timestamp_variants() -> Vec<Variant> {
    vec![
        ("CURRENT_TIMESTAMP".to_string(), POSTGRES_SQLITE),
        ("NOW()".to_string(), MYSQL),
    ]
}

/// Boolean literals: real booleans on postgres, 1/0 on the MySQL family and
/// SQLite. The postgres variant keeps the source spelling.
pub fn bool_variants(source: &str, value: bool) -> Vec<Variant> {
    vec![
        (source.to_string(), POSTGRES),
        ((if value { "1" } else { "0" }).to_string(), MYSQL_SQLITE),
    ]
}

/// `RAND()` / `RANDOM()`.
pub fn random_variants() -> Vec<Variant> {
    vec![
        ("RANDOM()".to_string(), POSTGRES),
        ("RAND()".to_string(), MYSQL_SQLITE),
    ]
}

/// Whole-fragment `CAST(expr AS type)` alternatives for a directive-free
/// expression.
pub fn cast_variants(expr: &str, cast_type: &str) -> Vec<Variant> {
    vec![
        (format!("CAST({expr} AS {cast_type})"), MYSQL_SQLITE),
        (format!("({expr})::{cast_type}"), POSTGRES),
    ]
}

/// Opening fragments of a split CAST whose inner expression carries
/// directives and flows through the normal pipeline.
pub fn cast_open_variants() -> Vec<Variant> {
    vec![
        ("CAST(".to_string(), MYSQL_SQLITE),
        ("(".to_string(), POSTGRES),
    ]
}

/// Closing fragments of a split CAST.
pub fn cast_close_variants(cast_type: &str) -> Vec<Variant> {
    vec![
        (format!(" AS {cast_type})"), MYSQL_SQLITE),
        (format!(")::{cast_type}"), POSTGRES),
    ]
}

/// Whole-fragment CONCAT alternatives for directive-free arguments.
pub fn concat_variants(args: &[String]) -> Vec<Variant> {
    vec![
        (format!("CONCAT({})", args.join(", ")), MYSQL_SQLITE),
        (args.join(" || "), POSTGRES),
    ]
}

/// Opening fragments of a split CONCAT. The postgres side wraps the operand
/// chain in parens so the piecewise form stays precedence-safe.
pub fn concat_open_variants() -> Vec<Variant> {
    vec![
        ("CONCAT(".to_string(), MYSQL_SQLITE),
        ("(".to_string(), POSTGRES),
    ]
}

/// Argument separators of a split CONCAT.
pub fn concat_separator_variants() -> Vec<Variant> {
    vec![
        (", ".to_string(), MYSQL_SQLITE),
        (" || ".to_string(), POSTGRES),
    ]
}

/// Whole-fragment `expr::type` alternatives.
pub fn pg_cast_variants(expr: &str, cast_type: &str) -> Vec<Variant> {
    vec![
        (format!("{expr}::{cast_type}"), POSTGRES),
        (format!("CAST({expr} AS {cast_type})"), MYSQL_SQLITE),
    ]
}

/// Rewrite time functions inside a static payload for a pinned dialect.
/// Word-boundary safe: `NOW()` inside an identifier is left alone.
pub fn normalize_time_functions(value: &str, dialect: Dialect) -> String {
    match dialect.family() {
        Dialect::Mysql => replace_word(value, "CURRENT_TIMESTAMP", "NOW()"),
        _ => replace_word(value, "NOW()", "CURRENT_TIMESTAMP"),
    }
}

fn replace_word(value: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0usize;
    while i < value.len() {
        let end = i + from.len();
        if end <= value.len()
            && value.is_char_boundary(end)
            && value[i..end].eq_ignore_ascii_case(from)
        {
            let before_ok = i == 0 || !is_word_char(bytes[i - 1]);
            let after_ok = end >= value.len() || !is_word_char(bytes[end]);
            // a function spelling must not swallow a call's open paren
            let call_ok = from.ends_with(')') || end >= value.len() || bytes[end] != b'(';
            if before_ok && after_ok && call_ok {
                out.push_str(to);
                i = end;
                continue;
            }
        }
        let ch = value[i..].chars().next().unwrap_or('\0');
        out.push(ch);
        i += ch.len_utf8().max(1);
    }
    out
}

fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
