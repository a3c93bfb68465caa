//! End-to-end tests that invoke the compiled `snapsql` binary as a subprocess.
//!
//! These tests exercise the full toolchain: CLI argument parsing, config
//! loading, template discovery, IR file generation, and exit codes.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Locate the compiled binary built by `cargo test`.
fn binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_snapsql"))
}

/// Run the binary with the given arguments in `dir`, returning the Output.
fn run_snapsql(dir: &Path, args: &[&str]) -> Output {
    Command::new(binary_path())
        .current_dir(dir)
        .args(args)
        .output()
        .expect("failed to execute snapsql binary")
}

/// Lay out a workspace: a config file, plus templates under `queries/`.
fn write_workspace(config: &str, templates: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("snapsql.yaml"), config).unwrap();
    let queries = dir.path().join("queries");
    std::fs::create_dir_all(&queries).unwrap();
    for (name, body) in templates {
        std::fs::write(queries.join(name), body).unwrap();
    }
    dir
}

const GET_USER: &str = "/*# function_name: getUser\nparameters: { id: int }\n*/\nSELECT id, name FROM users WHERE id = /*= id */0\n";

#[test]
fn test_compile_writes_ir_json() {
    let dir = write_workspace(
        "dialect: postgres\n",
        &[("get_user.snap.sql", GET_USER)],
    );
    let output = run_snapsql(dir.path(), &["compile"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let out_path = dir.path().join("generated/get_user.json");
    assert!(out_path.exists());
    let json = std::fs::read_to_string(&out_path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["format_version"], "1");
    assert_eq!(value["function_name"], "getUser");
    assert_eq!(value["response_affinity"], "many");
    assert!(value["instructions"].as_array().unwrap().len() >= 2);
}

#[test]
fn test_check_does_not_write_output() {
    let dir = write_workspace("{}\n", &[("get_user.snap.sql", GET_USER)]);
    let output = run_snapsql(dir.path(), &["check"]);
    assert!(output.status.success());
    assert!(!dir.path().join("generated").exists());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_compile_error_exits_nonzero_with_stage_name() {
    let dir = write_workspace(
        "{}\n",
        &[("broken.snap.sql", "SELECT id FROM users /*# if x */\n")],
    );
    let output = run_snapsql(dir.path(), &["compile"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("InstructionGenerator"), "stderr: {stderr}");
}

#[test]
fn test_unknown_config_key_is_rejected() {
    let dir = write_workspace(
        "dialect: postgres\nqery_timeout: 3\n",
        &[("get_user.snap.sql", GET_USER)],
    );
    let output = run_snapsql(dir.path(), &["compile"]);
    assert!(!output.status.success());
}

#[test]
fn test_invalid_dialect_flag_is_rejected() {
    let dir = write_workspace("{}\n", &[("get_user.snap.sql", GET_USER)]);
    let output = run_snapsql(dir.path(), &["--dialect", "oracle", "compile"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid dialect"));
}

#[test]
fn test_dialect_flag_pins_variants() {
    let template = "SELECT CAST(age AS INTEGER) FROM users\n";
    let dir = write_workspace("{}\n", &[("ages.snap.sql", template)]);
    let output = run_snapsql(dir.path(), &["--dialect", "postgres", "compile"]);
    assert!(output.status.success());
    let json =
        std::fs::read_to_string(dir.path().join("generated/ages.json")).unwrap();
    assert!(json.contains("(age)::INTEGER"));
    assert!(!json.contains("EMIT_IF_DIALECT"));
}

#[test]
fn test_missing_config_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let queries = dir.path().join("queries");
    std::fs::create_dir_all(&queries).unwrap();
    std::fs::write(queries.join("q.snap.sql"), GET_USER).unwrap();
    let output = run_snapsql(dir.path(), &["compile"]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found, using defaults"));
}

#[test]
fn test_template_without_header_uses_file_stem() {
    let dir = write_workspace(
        "{}\n",
        &[("list_users.snap.sql", "SELECT id FROM users\n")],
    );
    let output = run_snapsql(dir.path(), &["compile"]);
    assert!(output.status.success());
    let json = std::fs::read_to_string(dir.path().join("generated/list_users.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["name"], "list_users");
}

#[test]
fn test_explain_prints_summary() {
    let dir = write_workspace(
        "dialect: postgres\nschema:\n  tables:\n    - name: users\n      columns:\n        - { name: id, type: bigint, primary_key: true, nullable: false }\n        - { name: name, type: varchar }\n",
        &[("get_user.snap.sql", GET_USER)],
    );
    let output = run_snapsql(dir.path(), &["explain", "queries/get_user.snap.sql"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Function: getUser"));
    assert!(stdout.contains("Affinity: one"));
    assert!(stdout.contains("table 'users'"));
    assert!(stdout.contains("id: int not null"));
}

#[test]
fn test_output_is_stable_across_runs() {
    let dir = write_workspace("{}\n", &[("get_user.snap.sql", GET_USER)]);
    assert!(run_snapsql(dir.path(), &["compile"]).status.success());
    let first = std::fs::read_to_string(dir.path().join("generated/get_user.json")).unwrap();
    assert!(run_snapsql(dir.path(), &["compile"]).status.success());
    let second = std::fs::read_to_string(dir.path().join("generated/get_user.json")).unwrap();
    assert_eq!(first, second);
}
