/*!
 * Integration tests for the bulwark binary
 */

use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn bulwark() -> Command {
    Command::new(env!("CARGO_BIN_EXE_bulwark"))
}

#[test]
fn test_init_output_is_a_valid_config() {
    let output = bulwark().arg("init").output().unwrap();
    assert!(output.status.success());

    let text = String::from_utf8(output.stdout).unwrap();
    let config = bulwark::ResilienceConfig::from_toml_str(&text).unwrap();
    assert!(config.build_policies().is_ok());
}

#[test]
fn test_check_prints_both_chains() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        br#"
[logging]
level = "error"

[[blocking]]
kind = "retry"
max_retries = 4

[[non_blocking]]
kind = "retry"

[[non_blocking]]
kind = "timeout"
duration_ms = 5000
strategy = "pessimistic"
"#,
    )
    .unwrap();

    let output = bulwark().arg("check").arg(file.path()).output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("blocking (1 policies"));
    assert!(stdout.contains("max_retries=4"));
    assert!(stdout.contains("non-blocking (2 policies"));
    assert!(stdout.contains("pessimistic"));
}

#[test]
fn test_check_rejects_missing_list_with_config_exit_code() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[[blocking]]\nkind = \"retry\"\n").unwrap();

    let output = bulwark().arg("check").arg(file.path()).output().unwrap();

    assert_eq!(output.status.code(), Some(bulwark::error::EXIT_CONFIG));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("non-blocking policy list must contain at least one policy"));
}

#[test]
fn test_check_logs_to_stderr() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[[blocking]]\nkind = \"retry\"\n\n[[non_blocking]]\nkind = \"retry\"\n")
        .unwrap();

    let output = bulwark()
        .env_remove("RUST_LOG")
        .arg("--verbose")
        .arg("check")
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Policy configuration is valid"));
    assert!(!stdout.contains("Policy configuration is valid"));
    assert!(stdout.contains("blocking (1 policies"));
}
