//! Black-box tests for the `stagehand` worker binary.
//!
//! Each test spawns the real binary with a fully controlled environment
//! (`env_clear` plus exactly the variables the contract cares about) and a
//! temp directory as cwd so marker files land somewhere disposable.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use catwalk_types::{checkpoint_line, ContractLevel};

const BADGE_VAR: &str = "CATWALK_BADGE";
const BADGE_VALUE: &str = "crew";
const STOWAWAY_VAR: &str = "CATWALK_STOWAWAY";

fn stagehand() -> &'static str {
    env!("CARGO_BIN_EXE_stagehand")
}

/// Spawn the worker with exactly `envs` as its environment, feed it
/// `input` on stdin, and collect the outcome.
fn run_stagehand(flag: &str, input: &[u8], envs: &[(&str, &str)], cwd: &Path) -> Output {
    let mut child = Command::new(stagehand())
        .arg(flag)
        .env_clear()
        .envs(envs.iter().copied())
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn stagehand");

    let mut stdin = child.stdin.take().expect("stdin is piped");
    stdin.write_all(input).expect("failed to write stdin");
    drop(stdin); // EOF

    child.wait_with_output().expect("failed to wait for stagehand")
}

/// The environment that satisfies the badge/path/home checks, with the
/// home expectation pinned so the test does not depend on the passwd
/// entry of whoever runs it.
fn credentialed_env() -> Vec<(&'static str, &'static str)> {
    vec![
        (BADGE_VAR, BADGE_VALUE),
        ("PATH", "/home/amy:/usr/bin"),
        ("HOME", "/home/amy"),
        ("CATWALK_EXPECT_HOME", "/home/amy"),
    ]
}

// ============================================================================
// Level 0 and 1: plain copy
// ============================================================================

#[test]
fn level_0_copies_stdin_to_stdout() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = run_stagehand("-0", b"alpha\nbeta\n", &[], dir.path());
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"alpha\nbeta\n");
}

#[test]
fn level_0_copies_binary_payloads() {
    let dir = tempfile::TempDir::new().unwrap();
    let data: Vec<u8> = (0u8..=255).cycle().take(100_000).collect();
    let out = run_stagehand("-0", &data, &[], dir.path());
    assert!(out.status.success());
    assert_eq!(out.stdout, data);
}

#[test]
fn level_1_passes_with_clean_descriptors() {
    // a freshly spawned process only has stdin/stdout/stderr open
    let dir = tempfile::TempDir::new().unwrap();
    let out = run_stagehand("-1", b"hello\n", &[], dir.path());
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"hello\n");
    assert!(dir.path().join("stagehand-1.descriptors").exists());
}

// ============================================================================
// Level 2: credentials and the checkpoint announcement
// ============================================================================

#[test]
fn level_2_emits_checkpoint_and_markers() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = run_stagehand("-2", b"hello\n", &credentialed_env(), dir.path());
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let expected = format!("{}\nhello\n", checkpoint_line(ContractLevel::Badged));
    assert_eq!(out.stdout, expected.as_bytes());

    for check in ["descriptors", "badge", "path", "home"] {
        let marker = dir.path().join(format!("stagehand-2.{check}"));
        assert!(marker.exists(), "missing marker {marker:?}");
    }
}

#[test]
fn level_2_without_badge_fails_and_forwards_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    let env: Vec<_> = credentialed_env()
        .into_iter()
        .filter(|(k, _)| *k != BADGE_VAR)
        .collect();
    let out = run_stagehand("-2", b"hello\n", &env, dir.path());
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains(BADGE_VAR), "stderr: {stderr}");
    assert!(!dir.path().join("stagehand-2.badge").exists());
}

// ============================================================================
// Level 3: handshake
// ============================================================================

#[test]
fn level_3_strips_the_upstream_checkpoint() {
    let dir = tempfile::TempDir::new().unwrap();
    let input = format!("{}\nhello\n", checkpoint_line(ContractLevel::Badged));
    let out = run_stagehand("-3", input.as_bytes(), &[], dir.path());
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"hello\n");
    assert!(dir.path().join("stagehand-3.handshake").exists());
}

#[test]
fn level_3_rejects_a_stowaway_variable() {
    let dir = tempfile::TempDir::new().unwrap();
    let input = format!("{}\nhello\n", checkpoint_line(ContractLevel::Badged));
    let out = run_stagehand("-3", input.as_bytes(), &[(STOWAWAY_VAR, "hidden")], dir.path());
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty(), "failed credentials must not forward data");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains(STOWAWAY_VAR), "stderr: {stderr}");
}

#[test]
fn level_3_without_checkpoint_fails_but_forwards() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = run_stagehand("-3", b"hello\nworld\n", &[], dir.path());
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(out.stdout, b"hello\nworld\n");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("checkpoint"), "stderr: {stderr}");
}

// ============================================================================
// Level 4: sealed environment
// ============================================================================

#[test]
fn level_4_accepts_exactly_the_sealed_set() {
    let dir = tempfile::TempDir::new().unwrap();
    let env = [
        (BADGE_VAR, BADGE_VALUE),
        ("PATH", "/home/amy:/usr/bin"),
        ("HOME", "/home/amy"),
    ];
    let out = run_stagehand("-4", b"hello\n", &env, dir.path());
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"hello\n");
}

#[test]
fn level_4_rejects_an_extra_variable() {
    let dir = tempfile::TempDir::new().unwrap();
    let env = [
        (BADGE_VAR, BADGE_VALUE),
        ("PATH", "/home/amy:/usr/bin"),
        ("HOME", "/home/amy"),
        ("TERM", "xterm"),
    ];
    let out = run_stagehand("-4", b"hello\n", &env, dir.path());
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("TERM"), "stderr: {stderr}");
}

// ============================================================================
// Level 5 and argument handling
// ============================================================================

#[test]
fn level_5_refuses_with_a_single_diagnostic() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = run_stagehand("-5", b"data", &[], dir.path());
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(stderr.lines().count(), 1, "stderr: {stderr}");
    assert!(stderr.contains("refuses"), "stderr: {stderr}");
}

#[test]
fn unknown_level_digit_is_a_usage_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = run_stagehand("-9", b"", &[], dir.path());
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Usage"), "stderr: {stderr}");
}

#[test]
fn missing_level_flag_is_a_usage_error() {
    let out = Command::new(stagehand())
        .env_clear()
        .stdin(Stdio::null())
        .output()
        .expect("failed to spawn stagehand");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn version_flag_prints_the_version() {
    let out = Command::new(stagehand())
        .arg("--version")
        .env_clear()
        .stdin(Stdio::null())
        .output()
        .expect("failed to spawn stagehand");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("stagehand "), "stdout: {stdout}");
}
