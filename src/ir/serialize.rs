//! IR JSON serialization
//!
//! Two-space indented JSON with one twist: small, leaf-only objects inside
//! arrays are rendered on a single line so instruction lists stay compact
//! and diffable. Output is deterministic: struct field order is fixed by the
//! serde derives and `serde_json`'s order-preserving map keeps it.

use super::IntermediateFormat;
use serde_json::Value;
use std::fmt::Write;

/// Maximum rendered width for an inlined array element.
const INLINE_WIDTH: usize = 100;

/// Serialize the IR to its canonical pretty JSON form.
pub fn to_pretty_json(ir: &IntermediateFormat) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(ir)?;
    let mut out = String::new();
    write_value(&mut out, &value, 0);
    out.push('\n');
    Ok(out)
}

fn write_value(out: &mut String, value: &Value, indent: usize) {
    match value {
        Value::Object(map) => {
            if map.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{\n");
            for (i, (key, val)) in map.iter().enumerate() {
                push_indent(out, indent + 1);
                let _ = write!(out, "{}: ", scalar(&Value::String(key.clone())));
                write_value(out, val, indent + 1);
                if i + 1 < map.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            push_indent(out, indent);
            out.push('}');
        }
        Value::Array(items) => {
            if items.is_empty() {
                out.push_str("[]");
                return;
            }
            out.push_str("[\n");
            for (i, item) in items.iter().enumerate() {
                push_indent(out, indent + 1);
                if let Some(inline) = inline_object(item) {
                    out.push_str(&inline);
                } else {
                    write_value(out, item, indent + 1);
                }
                if i + 1 < items.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            push_indent(out, indent);
            out.push(']');
        }
        scalar_value => out.push_str(&scalar(scalar_value)),
    }
}

/// Render an array element on one line when it is a small object whose
/// values are scalars or arrays of scalars.
fn inline_object(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    let mut parts = Vec::with_capacity(map.len());
    for (key, val) in map {
        let rendered = match val {
            Value::Array(items) => {
                let inner: Option<Vec<String>> = items
                    .iter()
                    .map(|v| (!v.is_object() && !v.is_array()).then(|| scalar(v)))
                    .collect();
                format!("[{}]", inner?.join(", "))
            }
            Value::Object(_) => return None,
            other => scalar(other),
        };
        parts.push(format!("{}: {}", scalar(&Value::String(key.clone())), rendered));
    }
    let line = format!("{{{}}}", parts.join(", "));
    (line.len() <= INLINE_WIDTH).then_some(line)
}

fn scalar(value: &Value) -> String {
    // serde_json handles escaping; scalars never fail to serialize.
    serde_json::to_string(value).unwrap_or_default()
}

fn push_indent(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}
