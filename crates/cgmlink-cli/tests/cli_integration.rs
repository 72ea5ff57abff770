//! CLI integration tests.
//!
//! These run the built `cgmlink` binary. Everything here works without
//! Bluetooth hardware; the scan test needs an adapter and is ignored.
//!
//! ```
//! cargo test --package cgmlink-cli --test cli_integration
//! ```

use std::path::Path;
use std::process::{Command, Output};

fn cgmlink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cgmlink"))
        .args(args)
        .env_remove("CGMLINK_USER")
        .env_remove("CGMLINK_DATABASE")
        .env_remove("CGMLINK_MAX_ATTEMPTS")
        .output()
        .expect("Failed to run cgmlink binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn run_demo(db: &Path, extra: &[&str]) -> Output {
    let db = db.to_str().unwrap();
    let mut args = vec![
        "--no-color",
        "--quiet",
        "--database",
        db,
        "--user",
        "alice",
        "demo",
        "--readings",
        "6",
        "--interval-ms",
        "20",
        "--drop-every",
        "2",
        "--backfill",
        "3",
    ];
    args.extend_from_slice(extra);
    cgmlink(&args)
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help() {
    let output = cgmlink(&["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["scan", "demo", "readings", "pairing", "config", "completions"] {
        assert!(text.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_version() {
    let output = cgmlink(&["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_completions() {
    let output = cgmlink(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("cgmlink"));
}

#[test]
fn test_unknown_command_fails() {
    let output = cgmlink(&["teleport"]);
    assert!(!output.status.success());
}

// =============================================================================
// Simulated Session Tests
// =============================================================================

#[test]
fn test_demo_stores_readings_and_pairing() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data.db");

    let output = run_demo(&db, &[]);
    assert!(
        output.status.success(),
        "demo failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let text = stdout(&output);
    assert!(text.contains("(backfill)"));
    assert!(text.contains("State:       Connected"));
    assert!(text.contains("reading(s) for alice"));

    let db_arg = db.to_str().unwrap();
    let pairing = cgmlink(&["--database", db_arg, "pairing", "show"]);
    assert!(pairing.status.success());
    let pairing = stdout(&pairing);
    assert!(pairing.contains("8G1234"));
    assert!(pairing.contains("SIM-8G-0001"));

    let readings = cgmlink(&[
        "--database",
        db_arg,
        "--user",
        "alice",
        "readings",
        "list",
        "--format",
        "json",
        "-n",
        "0",
    ]);
    assert!(readings.status.success());
    let rows: serde_json::Value = serde_json::from_str(&stdout(&readings)).unwrap();
    let rows = rows.as_array().unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|r| r["scope"] == "alice"));
}

#[test]
fn test_second_demo_reconnects_from_pairing() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data.db");

    assert!(run_demo(&db, &[]).status.success());
    let output = run_demo(&db, &[]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("State:       Connected"));
}

#[test]
fn test_pairing_clear() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data.db");
    let db_arg = db.to_str().unwrap();

    assert!(run_demo(&db, &[]).status.success());
    let cleared = cgmlink(&["--database", db_arg, "pairing", "clear"]);
    assert!(cleared.status.success());
    assert!(stdout(&cleared).contains("Pairing cleared"));

    let shown = cgmlink(&["--database", db_arg, "pairing", "show"]);
    assert!(stdout(&shown).contains("No transmitter paired"));
}

#[test]
fn test_readings_on_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("empty.db");
    let db_arg = db.to_str().unwrap();

    let list = cgmlink(&["--database", db_arg, "readings", "list"]);
    assert!(list.status.success());
    assert!(stdout(&list).contains("No readings stored"));

    let stats = cgmlink(&["--database", db_arg, "readings", "stats"]);
    assert!(stats.status.success());
    assert!(stdout(&stats).contains("No readings in range"));
}

#[test]
fn test_readings_rejects_bad_time() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data.db");
    let output = cgmlink(&[
        "--database",
        db.to_str().unwrap(),
        "readings",
        "list",
        "--since",
        "soon",
    ]);
    assert!(!output.status.success());
}

// =============================================================================
// Hardware Tests
// =============================================================================

#[test]
#[ignore = "requires BLE hardware"]
fn test_scan_json() {
    let output = cgmlink(&["scan", "--timeout", "5", "--format", "json"]);
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert!(parsed.is_array());
}
