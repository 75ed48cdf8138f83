//! Exit codes and the informational flags.

use assert_cmd::Command;
use predicates::prelude::*;

fn lookout() -> Command {
    Command::cargo_bin("lookout").expect("binary builds")
}

#[test]
fn help_prints_usage_and_exits_zero() {
    lookout()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("--workers"));
}

#[test]
fn info_prints_the_tool_matrix_and_exits_zero() {
    lookout()
        .arg("--info")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tools for every file"))
        .stdout(predicate::str::contains("python_syntax"))
        .stdout(predicate::str::contains(".py:"));
}

#[test]
fn a_missing_directory_is_a_usage_error() {
    lookout()
        .assert()
        .code(1)
        .stderr(predicate::str::contains("directory"));
}

#[test]
fn a_nonexistent_directory_is_a_usage_error() {
    lookout()
        .arg("/definitely/not/a/real/path")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn an_unknown_flag_is_a_usage_error() {
    lookout().arg("--frobnicate").assert().code(1);
}

#[test]
fn an_unknown_theme_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    lookout()
        .arg("--theme")
        .arg("solarized")
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("theme"));
}

#[test]
fn zero_workers_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    lookout()
        .arg("--workers")
        .arg("0")
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("at least one worker"));
}

#[test]
fn an_out_of_range_compression_level_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    lookout()
        .arg("--compression")
        .arg("12")
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("between 0 and 9"));
}
