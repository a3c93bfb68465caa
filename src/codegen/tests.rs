use super::*;
use crate::ir::CelExpression;
use crate::parser::split_statement;
use crate::tokenizer::tokenize;

fn expressions(list: &[&str]) -> Vec<CelExpression> {
    list.iter()
        .enumerate()
        .map(|(i, e)| CelExpression {
            id: format!("e{i}"),
            expression: e.to_string(),
            environment_index: 0,
            position: "0:0".to_string(),
        })
        .collect()
}

fn r#generate_with(
    src: &str,
    exprs: &[&str],
    dialect: Option<Dialect>,
    system_fields: &[&str],
) -> Result<Vec<Instruction>, CompileError> {
    let tokens = tokenize(src).unwrap();
    let statement = split_statement(&tokens).unwrap();
    let expressions = expressions(exprs);
    let constants = BTreeMap::new();
    let input = GeneratorInput {
        tokens: &tokens,
        statement_kind: statement.kind,
        expressions: &expressions,
        dialect,
        constants: &constants,
        system_field_names: system_fields.iter().map(|s| s.to_string()).collect(),
        insert_uses_select: statement.insert_uses_select(),
    };
    generate(&input)
}

fn r#gen(src: &str, exprs: &[&str]) -> Vec<Instruction> {
    generate_with(src, exprs, None, &[]).unwrap()
}

fn ops(instructions: &[Instruction]) -> Vec<Opcode> {
    instructions.iter().map(|i| i.op).collect()
}

/// The system LIMIT/OFFSET scaffold appended to every SELECT without
/// explicit LIMIT/OFFSET.
const SELECT_SCAFFOLD: &[Opcode] = &[
    Opcode::IfSystemLimit,
    Opcode::EmitStatic,
    Opcode::EmitSystemLimit,
    Opcode::End,
    Opcode::IfSystemOffset,
    Opcode::EmitStatic,
    Opcode::EmitSystemOffset,
    Opcode::End,
];

#[test]
fn test_simple_select_with_parameter() {
    let out = r#gen("SELECT id, name FROM users WHERE id = /*= id */0", &["id"]);
    assert_eq!(out[0].op, Opcode::EmitStatic);
    assert_eq!(
        out[0].value.as_deref(),
        Some("SELECT id, name FROM users WHERE id =")
    );
    assert_eq!(out[0].pos, "1:1");
    assert_eq!(out[1].op, Opcode::EmitEval);
    assert_eq!(out[1].expr_index, Some(0));
    assert_eq!(&ops(&out)[2..], SELECT_SCAFFOLD);
}

#[test]
fn test_conditional_field_with_boundary() {
    let out = r#gen(
        "SELECT id, name\n/*# if include_email */, email/*# end */\nFROM users",
        &["include_email"],
    );
    let expected = [
        Opcode::EmitStatic,         // SELECT id, name
        Opcode::If,
        Opcode::EmitUnlessBoundary, // ,
        Opcode::EmitStatic,         // email
        Opcode::End,
        Opcode::Boundary,
        Opcode::EmitStatic,         // FROM users
    ];
    assert_eq!(&ops(&out)[..expected.len()], &expected);
    assert_eq!(out[0].value.as_deref(), Some("SELECT id, name"));
    assert_eq!(out[1].expr_index, Some(0));
    assert_eq!(out[2].value.as_deref(), Some(","));
    assert_eq!(out[3].value.as_deref(), Some("email"));
    assert_eq!(out[6].value.as_deref(), Some("FROM users"));
    assert_eq!(&ops(&out)[expected.len()..], SELECT_SCAFFOLD);
}

#[test]
fn test_update_with_conditional_set() {
    let out = r#gen(
        "UPDATE users SET name = /*= name */''\n/*# if email != \"\" */, email = /*= email */''/*# end */\nWHERE id = /*= id */0",
        &["name", "email != \"\"", "email", "id"],
    );
    let expected = [
        Opcode::EmitStatic,         // UPDATE users SET name =
        Opcode::EmitEval,
        Opcode::If,
        Opcode::EmitUnlessBoundary, // ,
        Opcode::EmitStatic,         // email =
        Opcode::EmitEval,
        Opcode::End,
        Opcode::Boundary,
        Opcode::EmitStatic,         // WHERE id =
        Opcode::EmitEval,
    ];
    assert_eq!(ops(&out), expected);
    assert_eq!(out[0].value.as_deref(), Some("UPDATE users SET name ="));
    assert_eq!(out[2].expr_index, Some(1));
    assert_eq!(out[3].value.as_deref(), Some(","));
    assert_eq!(out[8].value.as_deref(), Some("WHERE id ="));
    assert_eq!(out[9].expr_index, Some(3));
}

#[test]
fn test_bulk_loop_trailing_boundary() {
    let out = r#gen(
        "INSERT INTO inbox (notification_id, user_id) VALUES\n/*# for uid : user_ids */\n(/*= notification_id */0, /*= uid */''),\n/*# end */",
        &["user_ids", "uid", "notification_id"],
    );
    let expected = [
        Opcode::EmitStatic, // INSERT ... VALUES
        Opcode::LoopStart,
        Opcode::EmitStatic, // (
        Opcode::EmitEval,   // notification_id
        Opcode::EmitStatic, // ,
        Opcode::EmitEval,   // uid
        Opcode::EmitStatic, // )
        Opcode::EmitUnlessBoundary,
        Opcode::LoopEnd,
    ];
    assert_eq!(ops(&out), expected);
    // only the final trailing comma is conditional
    assert_eq!(out[4].value.as_deref(), Some(","));
    assert_eq!(out[7].value.as_deref(), Some(","));
    assert_eq!(out[1].variable.as_deref(), Some("uid"));
    assert_eq!(out[1].collection_expr_index, Some(0));
    assert_eq!(out[1].env_index, Some(1));
    assert_eq!(out[8].env_index, Some(0));
}

#[test]
fn test_nested_loop_env_indices() {
    let out = r#gen(
        "SELECT 1 FROM t WHERE a IN (/*# for x : xs */\n/*# for y : x */ /*= y */0, /*# end */\n/*# end */ 0)",
        &["xs", "x", "y"],
    );
    let loops: Vec<&Instruction> = out
        .iter()
        .filter(|i| matches!(i.op, Opcode::LoopStart | Opcode::LoopEnd))
        .collect();
    assert_eq!(loops[0].env_index, Some(1)); // outer start
    assert_eq!(loops[1].env_index, Some(2)); // inner start
    assert_eq!(loops[2].env_index, Some(1)); // inner end returns to outer
    assert_eq!(loops[3].env_index, Some(0)); // outer end returns to base
}

#[test]
fn test_limit_present_unconditional() {
    let out = r#gen("SELECT id FROM users LIMIT 10", &[]);
    let expected = [
        Opcode::EmitStatic, // SELECT id FROM users
        Opcode::EmitStatic, // "LIMIT "
        Opcode::IfSystemLimit,
        Opcode::EmitSystemLimit,
        Opcode::Else,
        Opcode::EmitStatic, // 10
        Opcode::End,
        // OFFSET scaffold still appended
        Opcode::IfSystemOffset,
        Opcode::EmitStatic,
        Opcode::EmitSystemOffset,
        Opcode::End,
    ];
    assert_eq!(ops(&out), expected);
    assert_eq!(out[1].value.as_deref(), Some("LIMIT "));
    assert_eq!(out[5].value.as_deref(), Some("10"));
    // scaffold carries synthesized positions, END the keyword's
    assert_eq!(out[2].pos, "0:0");
    assert_eq!(out[4].pos, "0:0");
    assert_eq!(out[6].pos, "1:22");
}

#[test]
fn test_limit_with_variable_value() {
    let out = r#gen(
        "SELECT id FROM users LIMIT /*= page_size */10",
        &["page_size"],
    );
    assert_eq!(out[5].op, Opcode::EmitEval);
    assert_eq!(out[5].expr_index, Some(0));
}

#[test]
fn test_limit_inside_conditional_suppresses_scaffold() {
    let out = r#gen(
        "SELECT id FROM users\n/*# if paged */LIMIT /*= page_size */10/*# end */",
        &["paged", "page_size"],
    );
    let all = ops(&out);
    // user's IF wraps the system-limit alternative
    let if_at = all.iter().position(|o| *o == Opcode::If).unwrap();
    assert_eq!(all[if_at + 1], Opcode::EmitStatic); // "LIMIT "
    assert_eq!(all[if_at + 2], Opcode::IfSystemLimit);
    // no second IF_SYSTEM_LIMIT from a scaffold
    assert_eq!(
        all.iter().filter(|o| **o == Opcode::IfSystemLimit).count(),
        1
    );
    // OFFSET scaffold still present
    assert_eq!(
        all.iter().filter(|o| **o == Opcode::IfSystemOffset).count(),
        1
    );
}

#[test]
fn test_offset_rewritten_independently() {
    let out = r#gen("SELECT id FROM users LIMIT 10 OFFSET 20", &[]);
    let all = ops(&out);
    assert!(all.contains(&Opcode::IfSystemLimit));
    assert!(all.contains(&Opcode::IfSystemOffset));
    assert!(all.contains(&Opcode::EmitSystemOffset));
    let offset_value = out
        .iter()
        .find(|i| i.value.as_deref() == Some("20"))
        .unwrap();
    assert_eq!(offset_value.op, Opcode::EmitStatic);
}

#[test]
fn test_cast_pinned_postgres() {
    let out = generate_with(
        "SELECT CAST(age AS INTEGER) FROM users",
        &[],
        Some(Dialect::Postgres),
        &[],
    )
    .unwrap();
    assert_eq!(
        out[0].value.as_deref(),
        Some("SELECT (age)::INTEGER FROM users")
    );
}

#[test]
fn test_cast_unpinned_emits_two_variants() {
    let out = r#gen("SELECT CAST(age AS INTEGER) FROM users", &[]);
    let dialect_ops: Vec<&Instruction> = out
        .iter()
        .filter(|i| i.op == Opcode::EmitIfDialect)
        .collect();
    assert_eq!(dialect_ops.len(), 2);
    assert_eq!(
        dialect_ops[0].sql_fragment.as_deref(),
        Some("CAST(age AS INTEGER)")
    );
    assert_eq!(
        dialect_ops[0].dialects.as_deref(),
        Some(&["mysql".to_string(), "sqlite".to_string()][..])
    );
    assert_eq!(dialect_ops[1].sql_fragment.as_deref(), Some("(age)::INTEGER"));
    assert_eq!(
        dialect_ops[1].dialects.as_deref(),
        Some(&["postgres".to_string()][..])
    );
}

#[test]
fn test_cast_with_inner_directive_is_split() {
    let out = r#gen(
        "SELECT CAST(/*= raw_age */0 AS INTEGER) FROM users",
        &["raw_age"],
    );
    let all = ops(&out);
    // open variants, the evaluated inner expression, close variants
    let eval_at = all.iter().position(|o| *o == Opcode::EmitEval).unwrap();
    assert_eq!(all[eval_at - 2], Opcode::EmitIfDialect);
    assert_eq!(all[eval_at - 1], Opcode::EmitIfDialect);
    assert_eq!(all[eval_at + 1], Opcode::EmitIfDialect);
    assert_eq!(all[eval_at + 2], Opcode::EmitIfDialect);
    let close_pg = &out[eval_at + 2];
    assert_eq!(close_pg.sql_fragment.as_deref(), Some(")::INTEGER"));
}

#[test]
fn test_pg_cast_unpinned() {
    let out = r#gen("SELECT age::INTEGER FROM users", &[]);
    assert_eq!(out[0].value.as_deref(), Some("SELECT"));
    assert_eq!(out[1].op, Opcode::EmitIfDialect);
    assert_eq!(out[1].sql_fragment.as_deref(), Some("age::INTEGER"));
    assert_eq!(out[2].sql_fragment.as_deref(), Some("CAST(age AS INTEGER)"));
    assert_eq!(out[3].value.as_deref(), Some("FROM users"));
}

#[test]
fn test_pg_cast_pinned_mysql_rewrites() {
    let out = generate_with(
        "SELECT age::INTEGER FROM users",
        &[],
        Some(Dialect::Mysql),
        &[],
    )
    .unwrap();
    assert_eq!(
        out[0].value.as_deref(),
        Some("SELECT CAST(age AS INTEGER) FROM users")
    );
}

#[test]
fn test_now_pinned_by_family() {
    let out = generate_with("SELECT NOW() FROM t", &[], Some(Dialect::Mariadb), &[]).unwrap();
    assert_eq!(out[0].value.as_deref(), Some("SELECT NOW() FROM t"));
    let out = generate_with("SELECT NOW() FROM t", &[], Some(Dialect::Sqlite), &[]).unwrap();
    assert_eq!(
        out[0].value.as_deref(),
        Some("SELECT CURRENT_TIMESTAMP FROM t")
    );
}

#[test]
fn test_boolean_literal_variants() {
    let out = r#gen("SELECT id FROM users WHERE active = TRUE", &[]);
    let dialect_ops: Vec<&Instruction> = out
        .iter()
        .filter(|i| i.op == Opcode::EmitIfDialect)
        .collect();
    assert_eq!(dialect_ops.len(), 2);
    assert_eq!(dialect_ops[0].sql_fragment.as_deref(), Some("TRUE"));
    assert_eq!(dialect_ops[1].sql_fragment.as_deref(), Some("1"));
}

#[test]
fn test_dummy_boolean_is_not_rewritten() {
    let out = r#gen(
        "SELECT id FROM users WHERE active = /*= active */TRUE",
        &["active"],
    );
    assert!(!ops(&out).contains(&Opcode::EmitIfDialect));
    assert!(ops(&out).contains(&Opcode::EmitEval));
}

#[test]
fn test_concat_whole_fragment() {
    let out = r#gen("SELECT CONCAT(first, last) FROM users", &[]);
    let dialect_ops: Vec<&Instruction> = out
        .iter()
        .filter(|i| i.op == Opcode::EmitIfDialect)
        .collect();
    assert_eq!(
        dialect_ops[0].sql_fragment.as_deref(),
        Some("CONCAT(first, last)")
    );
    assert_eq!(dialect_ops[1].sql_fragment.as_deref(), Some("first || last"));
}

#[test]
fn test_system_value_directive() {
    let out = generate_with(
        "INSERT INTO t (a, created_at) VALUES (1, /*# EMIT_SYSTEM_VALUE: created_at */)",
        &[],
        None,
        &["created_at"],
    )
    .unwrap();
    let sv = out
        .iter()
        .find(|i| i.op == Opcode::EmitSystemValue)
        .unwrap();
    assert_eq!(sv.system_field.as_deref(), Some("created_at"));
}

#[test]
fn test_unknown_system_field_is_reference_error() {
    let err = generate_with(
        "INSERT INTO t (a) VALUES (/*# EMIT_SYSTEM_VALUE: nope */)",
        &[],
        None,
        &["created_at"],
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::Reference { .. }));
}

#[test]
fn test_unclosed_if_is_structural_error() {
    let err = generate_with("SELECT 1 /*# if x */", &["x"], None, &[]).unwrap_err();
    assert!(matches!(err, CompileError::Structural { .. }));
    assert!(err.to_string().contains("unclosed"));
}

#[test]
fn test_end_without_open_is_structural_error() {
    let err = generate_with("SELECT 1 /*# end */", &[], None, &[]).unwrap_err();
    assert!(matches!(err, CompileError::Structural { .. }));
}

#[test]
fn test_malformed_for_binding() {
    let err =
        generate_with("SELECT 1 /*# for x user_ids */ /*# end */", &[], None, &[]).unwrap_err();
    assert!(err.to_string().contains("malformed for binding"));
}

#[test]
fn test_missing_expression_is_reference_error() {
    let err = generate_with("SELECT /*= ghost */0 FROM t", &[], None, &[]).unwrap_err();
    assert!(matches!(err, CompileError::Reference { .. }));
}

#[test]
fn test_elseif_chain() {
    let out = r#gen(
        "SELECT id FROM t WHERE /*# if a */x = 1/*# elseif b */x = 2/*# else */x = 3/*# end */",
        &["a", "b"],
    );
    let all = ops(&out);
    let if_at = all.iter().position(|o| *o == Opcode::If).unwrap();
    assert!(all[if_at..].starts_with(&[
        Opcode::If,
        Opcode::EmitStatic,
        Opcode::ElseIf,
        Opcode::EmitStatic,
        Opcode::Else,
        Opcode::EmitStatic,
        Opcode::End,
    ]));
}

#[test]
fn test_insert_select_system_values_move_before_from() {
    let out = generate_with(
        "INSERT INTO archive (id, created_at) /*# EMIT_SYSTEM_VALUE: created_at */ SELECT id FROM events",
        &[],
        None,
        &["created_at"],
    )
    .unwrap();
    let all = ops(&out);
    assert_eq!(
        all,
        vec![
            Opcode::EmitStatic, // INSERT INTO archive (id, created_at)
            Opcode::EmitStatic, // SELECT id
            Opcode::EmitStatic, // ", "
            Opcode::EmitSystemValue,
            Opcode::EmitStatic, // " FROM events"
        ]
    );
    assert_eq!(out[1].value.as_deref(), Some("SELECT id"));
    assert_eq!(out[2].value.as_deref(), Some(", "));
    assert_eq!(out[4].value.as_deref(), Some(" FROM events"));
}

#[test]
fn test_constant_substitution() {
    let tokens = tokenize("SELECT * FROM /*$ table_prefix */users_x").unwrap();
    let statement = split_statement(&tokens).unwrap();
    let mut constants = BTreeMap::new();
    constants.insert("table_prefix".to_string(), "prod_".to_string());
    let expressions = vec![];
    let input = GeneratorInput {
        tokens: &tokens,
        statement_kind: statement.kind,
        expressions: &expressions,
        dialect: None,
        constants: &constants,
        system_field_names: vec![],
        insert_uses_select: false,
    };
    let out = generate(&input).unwrap();
    assert_eq!(out[0].value.as_deref(), Some("SELECT * FROM prod_"));
}

#[test]
fn test_whitespace_collapsing_preserves_newlines() {
    let out = r#gen("SELECT   id,\n       name\nFROM users", &[]);
    assert_eq!(
        out[0].value.as_deref(),
        Some("SELECT id,\nname\nFROM users")
    );
}
