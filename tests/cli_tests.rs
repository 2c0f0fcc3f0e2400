//! Integration tests for the tunwarp binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::{BufRead, BufReader, Read};
use std::process::Stdio;

/// Helper to create a tunwarp command
fn tunwarp() -> Command {
    Command::cargo_bin("tunwarp").unwrap()
}

#[test]
fn test_help_command() {
    tunwarp()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("supervised WireGuard-over-SOCKS"));
}

#[test]
fn test_check_prints_defaults() {
    tunwarp()
        .arg("--check")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"bind_address\": \"127.0.0.1:8086\""))
        .stdout(predicate::str::contains("\"rtt_threshold_ms\": 1000"));
}

#[test]
fn test_check_resolves_quoted_values() {
    tunwarp()
        .args(["--check", "--args", r#"-e "10.0.0.1 backup" -gool"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"endpoint\": \"10.0.0.1 backup\""))
        .stdout(predicate::str::contains("\"gool\": true"));
}

#[test]
fn test_unknown_flag_fails() {
    tunwarp()
        .args(["--args", "-bogus"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown flag: -bogus"));
}

#[test]
fn test_invalid_rtt_fails() {
    tunwarp()
        .args(["--check", "--args", "-rtt abc"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("flag -rtt"));
}

#[test]
fn test_session_flag_help_prints_usage() {
    tunwarp()
        .args(["--args", "-help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage of tunwarp"))
        .stdout(predicate::str::contains("-country string"));
}

#[cfg(unix)]
#[test]
fn test_sigterm_stops_session() {
    let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_tunwarp"))
        .args([
            "--args",
            "-v -b 127.0.0.1:18086",
            "--no-capture",
            "--log-interval",
            "20",
            "--cleanup-timeout",
            "2000",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn tunwarp");

    let mut stderr = BufReader::new(child.stderr.take().unwrap());
    let mut seen = String::new();

    // Signal handlers are registered before this line is logged
    let mut line = String::new();
    while stderr.read_line(&mut line).unwrap() > 0 {
        seen.push_str(&line);
        if line.contains("Starting tunnel session") {
            break;
        }
        line.clear();
    }
    assert!(seen.contains("Starting tunnel session"), "output: {}", seen);

    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }

    stderr.read_to_string(&mut seen).unwrap();
    let status = child.wait().unwrap();

    assert!(status.success(), "output: {}", seen);
    assert!(seen.contains("Received SIGTERM"));
    assert!(seen.contains("Idle forwarding engine stopped"));
    assert!(seen.contains("Cleanup done"));
    assert!(seen.contains("stopped (Signal(\"SIGTERM\"), cleanup Completed)"));
}
