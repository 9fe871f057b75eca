//! Runs the `kiosk` binary against the simulated reader

use std::process::{Command, Output};

use serde_json::Value;

fn kiosk(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kiosk"))
        .args(["--transport", "sim"])
        .args(args)
        .env_remove("KIOSK_API_URL")
        .env_remove("KIOSK_TRANSPORT")
        .env("RUST_LOG", "warn")
        .output()
        .expect("kiosk binary should run")
}

fn json_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap_or_else(|e| panic!("not JSON: {:?} ({})", line, e)))
        .collect()
}

#[test]
fn test_read_json_output_is_pure_json() {
    let output = kiosk(&["--format", "json", "read", "--wait", "1"]);
    assert!(output.status.success());

    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["uid"], "DEADBEEF");
    assert_eq!(lines[0]["token"], "100200300");
    assert_eq!(lines[0]["cvc"], "4242");
    assert!(String::from_utf8_lossy(&output.stderr).contains("Waiting for a card"));
}

#[test]
fn test_erase_json_output() {
    let output = kiosk(&["--format", "json", "erase", "--wait", "1"]);
    assert!(output.status.success());

    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["cleared"], true);
    assert_eq!(lines[0]["deactivation_status"], Value::Null);
}

#[test]
fn test_overlong_token_rejected_before_touching_the_card() {
    let output = kiosk(&["write", "--token", "12345678901234567890", "--cvc", "1", "--no-register"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("at most 16"));
}
