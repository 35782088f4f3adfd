//! CLI integration tests for forum-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! the offline transform command and exit codes for configuration errors.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Environment variables that would override the test configuration.
const CONFIG_ENV: [&str; 13] = [
    "FLARUM_HOST",
    "FLARUM_PORT",
    "FLARUM_DB",
    "FLARUM_USER",
    "FLARUM_PW",
    "TABLE_PREFIX",
    "FLARUM_UPLOADS_DIR",
    "BATCH_SIZE",
    "TARGET_HOST",
    "TARGET_PORT",
    "TARGET_DB",
    "TARGET_USER",
    "TARGET_PW",
];

/// Get a command for the forum-migrate binary with a clean environment.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("forum-migrate").unwrap();
    for key in CONFIG_ENV {
        cmd.env_remove(key);
    }
    cmd
}

fn config_file(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("transform"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--pass"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("forum-migrate"));
}

#[test]
fn test_global_flags() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("--progress"))
        .stdout(predicate::str::contains("--shutdown-timeout"))
        .stdout(predicate::str::contains("[default: 60]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_no_subcommand_fails() {
    cmd().assert().failure();
}

// =============================================================================
// Argument Validation Tests
// =============================================================================

#[test]
fn test_invalid_pass_is_rejected() {
    cmd()
        .args(["run", "--pass", "attachments"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid pass 'attachments'"));
}

// =============================================================================
// Configuration Error Tests
// =============================================================================

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let file = config_file("source: [unclosed");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_required_fields_exits_with_code_1() {
    let file = config_file("source:\n  host: flarum.local\n");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("source.database is required"));
}

#[test]
fn test_zero_batch_size_exits_with_code_1() {
    let file = config_file(
        "source:\n  database: flarum\n  user: flarum\ntarget:\n  database: discourse\n  user: discourse\n",
    );
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "run",
            "--batch-size",
            "0",
        ])
        .assert()
        .code(1);
}

// =============================================================================
// Transform Tests
// =============================================================================

#[test]
fn test_transform_from_stdin() {
    cmd()
        .arg("transform")
        .write_stdin("<r><p>Hello <i>world</i></p></r>")
        .assert()
        .success()
        .stdout("Hello *world*\n");
}

#[test]
fn test_transform_from_file_with_known_user() {
    let file = config_file(
        r##"<r><p><USERMENTION displayname="Toby T." id="4">@"Toby T."#4</USERMENTION> and <USERMENTION displayname="Ghost" id="9">@Ghost</USERMENTION></p></r>"##,
    );
    cmd()
        .args([
            "transform",
            file.path().to_str().unwrap(),
            "--user",
            "toby=Toby T.",
            "--guest",
            "anon",
        ])
        .assert()
        .success()
        .stdout("@toby and @anon\n");
}

#[test]
fn test_transform_missing_file_exits_with_code_7() {
    cmd()
        .args(["transform", "no_such_post.xml"])
        .assert()
        .code(7);
}
