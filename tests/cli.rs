use std::{
    io::Write,
    process::{Command, Output, Stdio},
};

use tempfile::NamedTempFile;

fn script(src: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".lox")
        .tempfile()
        .expect("failed to create script");
    file.write_all(src.as_bytes())
        .expect("failed to write script");
    file
}

fn loxvm(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_loxvm"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute loxvm")
}

fn run_script(src: &str, flags: &[&str]) -> Output {
    let file = script(src);
    let path = file.path().to_str().expect("temp path is not UTF-8");
    let mut args = vec![path];
    args.extend_from_slice(flags);
    loxvm(&args)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn runs_a_script() {
    let out = run_script("print 1 + 2;\nprint \"done\";", &[]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "3\ndone\n");
}

#[test]
fn compile_error_exits_65() {
    let out = run_script("print 1 +;", &[]);
    assert_eq!(out.status.code(), Some(65));
    assert!(stderr(&out).contains("[line 1] Error at ';': Expect expression."));
}

#[test]
fn runtime_error_exits_70() {
    let out = run_script("print \"before\";\nprint -nil;", &[]);
    assert_eq!(out.status.code(), Some(70));
    assert_eq!(stdout(&out), "before\n");
    assert!(stderr(&out).contains("Operand must be a number.\n[line 2] in script"));
}

#[test]
fn unreadable_file_exits_74() {
    let dir = tempfile::tempdir().expect("failed to create directory");
    let missing = dir.path().join("missing.lox");
    let out = loxvm(&[missing.to_str().expect("temp path is not UTF-8")]);
    assert_eq!(out.status.code(), Some(74));
}

#[test]
fn too_many_arguments_exits_64() {
    let out = loxvm(&["one.lox", "two.lox"]);
    assert_eq!(out.status.code(), Some(64));
}

#[test]
fn debug_flags_keep_program_output() {
    let out = run_script(
        "fun f(x) { return x * 2; } print f(21);",
        &["--stress-gc", "--print-code"],
    );
    assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "42\n");
    assert!(stderr(&out).contains("OP_MULTIPLY"));
}

#[test]
fn repl_keeps_state_between_lines() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_loxvm"))
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to execute loxvm");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(b"var a = 1;\nprint a + 1;\nprint nope;\nprint a;\n")
        .expect("failed to write to the REPL");
    let out = child.wait_with_output().expect("failed to wait for loxvm");

    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "> > 2\n> > 1\n> \n");
    assert!(stderr(&out).contains("Undefined variable 'nope'."));
}
