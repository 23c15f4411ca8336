//! Integration tests for core CLI contract behavior.
//!
//! These run against the real binary but never touch a device: every
//! scenario fails (by design) before any serial I/O, which is exactly
//! the precondition-ordering contract being tested.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("cartflash").expect("binary builds");
    // Deterministic behavior on CI: no prompts, no exit pause, no
    // environment leaking in from the host.
    cmd.arg("--non-interactive").arg("--no-delay");
    cmd.env_remove("CARTFLASH_PORT")
        .env_remove("CARTFLASH_TIMEOUT")
        .env_remove("CARTFLASH_NON_INTERACTIVE");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("cartflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cartflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn missing_subcommand_is_a_usage_error() {
    let mut cmd = assert_cmd::Command::cargo_bin("cartflash").expect("binary builds");
    cmd.assert().failure().code(2);
}

#[test]
fn out_of_range_address_is_a_usage_error() {
    let mut cmd = cli_cmd();
    cmd.args(["flash", "whatever.bin", "--address", "0x10000"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn missing_image_file_exits_with_file_not_found_code() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("not_exists.bin");

    let mut cmd = cli_cmd();
    cmd.arg("flash")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn misaligned_image_fails_before_any_device_interaction() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("short.bin");
    fs::write(&image, vec![0u8; 1000]).expect("write image");

    // Exit code 11 proves validation ran; had the CLI looked for a board
    // first, this environment would have produced code 12 instead.
    let mut cmd = cli_cmd();
    cmd.arg("flash")
        .arg(image.as_os_str())
        .assert()
        .failure()
        .code(11)
        .stderr(predicate::str::contains("multiple of 256"));
}

#[test]
fn aligned_image_without_board_exits_with_no_device_code() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("aligned.bin");
    fs::write(&image, vec![0u8; 512]).expect("write image");

    let mut cmd = cli_cmd();
    // No Arduboy is attached in the test environment.
    cmd.arg("flash")
        .arg(image.as_os_str())
        .assert()
        .failure()
        .code(12);
}

#[test]
fn probe_without_board_exits_with_no_device_code() {
    let mut cmd = cli_cmd();
    cmd.arg("probe").assert().failure().code(12);
}

#[test]
fn list_ports_json_returns_valid_json_on_stdout() {
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("stdout should be valid JSON");
    assert!(parsed.is_array(), "should be a JSON array");
}

#[test]
fn completions_write_a_script_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cartflash"));
}
