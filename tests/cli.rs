//! End-to-end checks against the built binary's argument parsing and
//! surface-level behavior that doesn't require a live gateway.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_every_subcommand() {
    let mut cmd = Command::cargo_bin("swarmit").unwrap();
    cmd.arg("--help");
    cmd.assert().success().stdout(
        predicate::str::contains("status")
            .and(predicate::str::contains("start"))
            .and(predicate::str::contains("stop"))
            .and(predicate::str::contains("reset"))
            .and(predicate::str::contains("flash"))
            .and(predicate::str::contains("monitor")),
    );
}

#[test]
fn missing_subcommand_is_an_error() {
    let mut cmd = Command::cargo_bin("swarmit").unwrap();
    cmd.assert().failure();
}

#[test]
fn list_ports_does_not_require_a_gateway() {
    let mut cmd = Command::cargo_bin("swarmit").unwrap();
    cmd.arg("list-ports");
    cmd.assert().success();
}

#[test]
fn flash_rejects_a_missing_firmware_file() {
    let mut cmd = Command::cargo_bin("swarmit").unwrap();
    cmd.args(["--port", "/dev/null", "flash", "/nonexistent/firmware.bin", "--yes"]);
    cmd.assert().failure();
}
