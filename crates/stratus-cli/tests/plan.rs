//! End-to-end runs of the `stratus` binary: output format, idempotence,
//! and exit codes.

use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

const CONSTRUCTS: &str = r#"
resources:
  - provider: abstract
    type: execution_unit
    name: api
  - provider: abstract
    type: persist-orm
    name: db
edges:
  - source: abstract:execution_unit::api
    destination: abstract:persist-orm::db
"#;

const CONSTRAINTS: &str = r#"
constraints:
  - scope: construct
    operator: equals
    target: abstract:execution_unit::api
    type: lambda_function
  - scope: construct
    operator: equals
    target: abstract:persist-orm::db
    type: rds_instance
"#;

fn stratus() -> Command {
    Command::new(env!("CARGO_BIN_EXE_stratus"))
}

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn plan(input: &PathBuf, constraints: Option<&PathBuf>, output: &PathBuf) -> std::process::Output {
    let mut cmd = stratus();
    cmd.arg("plan").arg("--input").arg(input);
    if let Some(constraints) = constraints {
        cmd.arg("--constraints").arg(constraints);
    }
    cmd.arg("--output").arg(output);
    cmd.output().unwrap()
}

#[test]
fn plan_emits_a_resource_graph() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "constructs.yaml", CONSTRUCTS);
    let constraints = write(&dir, "constraints.yaml", CONSTRAINTS);
    let output = dir.path().join("out.yaml");

    let result = plan(&input, Some(&constraints), &output);
    assert_eq!(result.status.code(), Some(0), "{result:?}");

    let emitted = std::fs::read_to_string(&output).unwrap();
    assert!(emitted.contains("aws:lambda_function::api"));
    assert!(emitted.contains("aws:rds_instance::db"));
    assert!(emitted.contains("aws:vpc::vpc"));
    // Constructs never reach the output.
    assert!(!emitted.contains("abstract:"));
}

#[test]
fn emitted_graphs_are_stable_under_replanning() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "constructs.yaml", CONSTRUCTS);
    let constraints = write(&dir, "constraints.yaml", CONSTRAINTS);
    let first = dir.path().join("first.yaml");
    assert_eq!(
        plan(&input, Some(&constraints), &first).status.code(),
        Some(0)
    );

    // Feed the emitted graph back with no constraints: nothing abstract
    // remains, so nothing expands and the output reproduces the input.
    let emitted = std::fs::read_to_string(&first).unwrap();
    let replan_input = write(&dir, "replan.yaml", &emitted);
    let second = dir.path().join("second.yaml");
    assert_eq!(plan(&replan_input, None, &second).status.code(), Some(0));

    let replanned = std::fs::read_to_string(&second).unwrap();
    assert_eq!(emitted, replanned);
}

#[test]
fn identical_runs_serialize_identically() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "constructs.yaml", CONSTRUCTS);
    let constraints = write(&dir, "constraints.yaml", CONSTRAINTS);
    let a = dir.path().join("a.yaml");
    let b = dir.path().join("b.yaml");
    assert_eq!(plan(&input, Some(&constraints), &a).status.code(), Some(0));
    assert_eq!(plan(&input, Some(&constraints), &b).status.code(), Some(0));
    assert_eq!(
        std::fs::read_to_string(&a).unwrap(),
        std::fs::read_to_string(&b).unwrap()
    );
}

#[test]
fn unsatisfied_constraints_exit_2_with_partial_output() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "constructs.yaml", CONSTRUCTS);
    let constraints = write(
        &dir,
        "constraints.yaml",
        r#"
constraints:
  - scope: construct
    operator: equals
    target: abstract:execution_unit::api
    type: lambda_function
  - scope: construct
    operator: equals
    target: abstract:persist-orm::db
    type: rds_instance
  - scope: resource
    operator: equals
    target: aws:lambda_function::ghost
    property: MemorySize
    value: 128
"#,
    );
    let output = dir.path().join("out.yaml");
    let result = plan(&input, Some(&constraints), &output);
    assert_eq!(result.status.code(), Some(2));
    // The partial graph still lands for inspection.
    assert!(output.exists());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("constraint-unsatisfied"), "{stderr}");
}

#[test]
fn missing_input_exits_4() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("does-not-exist.yaml");
    let output = dir.path().join("out.yaml");
    let result = plan(&input, None, &output);
    assert_eq!(result.status.code(), Some(4));
}

#[test]
fn malformed_constraints_exit_4() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "constructs.yaml", CONSTRUCTS);
    let constraints = write(
        &dir,
        "constraints.yaml",
        "constraints:\n  - scope: resource\n    operator: must_not_exist\n",
    );
    let output = dir.path().join("out.yaml");
    let result = plan(&input, Some(&constraints), &output);
    assert_eq!(result.status.code(), Some(4));
}
