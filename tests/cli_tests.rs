//! Integration tests for the CLI interface

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn sandbox_exec(root: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sandbox-exec").unwrap();
    cmd.env("SANDBOX_EXEC_ROOT", root.path());
    cmd
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = Command::cargo_bin("sandbox-exec").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("Commands:"));
}

#[test]
fn test_serve_help() {
    let mut cmd = Command::cargo_bin("sandbox-exec").unwrap();
    cmd.arg("serve")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Start the HTTP API server"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("sandbox-exec").unwrap();
    cmd.arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_run_echo_prints_logs_and_summary() {
    let root = TempDir::new().unwrap();
    sandbox_exec(&root)
        .args(["run", "echo", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[stdout] hello"))
        .stdout(predicate::str::contains(
            "The command `echo hello` has finished with exit code 0.",
        ));
}

#[test]
fn test_run_passes_hyphenated_args_through() {
    let root = TempDir::new().unwrap();
    sandbox_exec(&root)
        .args(["run", "ls", "-a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[stdout] ."))
        .stdout(predicate::str::contains("The command `ls -a` has finished"));
}

#[test]
fn test_run_exits_with_the_command_status() {
    let root = TempDir::new().unwrap();
    sandbox_exec(&root)
        .args(["run", "false"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "The command `false ` has finished with exit code 1.",
        ));
}

#[test]
fn test_run_in_unknown_sandbox_fails() {
    let root = TempDir::new().unwrap();
    sandbox_exec(&root)
        .args(["run", "--sandbox-id", "nope", "echo", "hi"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "Failed to run command `echo hi` in sandbox `nope`",
        ));
}

#[test]
fn test_missing_config_file_exits_with_config_code() {
    let root = TempDir::new().unwrap();
    sandbox_exec(&root)
        .args(["-c", "/definitely/not/here.toml", "run", "echo", "hi"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let root = TempDir::new().unwrap();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[server\nport = ").unwrap();

    sandbox_exec(&root)
        .arg("-c")
        .arg(file.path())
        .args(["run", "echo", "hi"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to parse"));
}
