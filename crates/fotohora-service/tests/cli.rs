//! CLI integration tests.
//!
//! These run the `fotohora` binary with an empty configuration directory, so
//! every command sees the default configuration:
//! `cargo test --package fotohora-service --test cli`

use std::path::Path;
use std::process::{Command, Output};

fn run_fotohora(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fotohora"))
        .args(args)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run fotohora binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_lists_viewer_commands() {
    let home = tempfile::tempdir().unwrap();
    let output = run_fotohora(home.path(), &["--help"]);

    assert!(output.status.success());
    let help = stdout(&output);
    for command in ["run", "set-interval", "devices", "history", "check"] {
        assert!(help.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_set_interval_refused_without_shared_store() {
    let home = tempfile::tempdir().unwrap();
    let output = run_fotohora(home.path(), &["set-interval", "5"]);

    assert!(!output.status.success());
    assert!(!stdout(&output).contains("Reporting interval set"));
    assert!(stderr(&output).contains("not shared"));
}

#[test]
fn test_viewer_commands_refused_without_shared_store() {
    let home = tempfile::tempdir().unwrap();
    let cases: [&[&str]; 6] = [
        &["check"],
        &["devices"],
        &["devices", "--follow"],
        &["history", "dev"],
        &["color", "dev", "#ff0000"],
        &["name", "dev", "Moto"],
    ];

    for args in cases {
        let output = run_fotohora(home.path(), args);
        assert!(!output.status.success(), "{:?} should fail", args);
        assert!(stderr(&output).contains("--store-url"), "{:?}", args);
    }
}

#[test]
fn test_config_prints_defaults() {
    let home = tempfile::tempdir().unwrap();
    let output = run_fotohora(home.path(), &["config"]);

    assert!(output.status.success());
    let config = stdout(&output);
    assert!(config.contains("backend = \"memory\""));
    assert!(config.contains("default_interval_ms = 30000"));
}
