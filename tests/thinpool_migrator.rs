// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_thinpool_migrator_help() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("thinpool_migrator")?;
    let assert = cmd.arg("--help").assert();
    assert
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--use-vpd"));
    Ok(())
}

#[test]
fn test_thinpool_migrator_no_device() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("thinpool_migrator")?;
    let assert = cmd.arg("--dry-run").assert();
    assert.failure().code(2);
    Ok(())
}

#[test]
fn test_thinpool_migrator_bad_loglevel() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("thinpool_migrator")?;
    let assert = cmd
        .arg("--device")
        .arg("/dev/sda1")
        .arg("--log-level")
        .arg("nosuchlevel")
        .assert();
    assert.failure().code(2);
    Ok(())
}

#[test]
fn test_thinpool_migrator_enable_cleanup_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("thinpool_migrator")?;
    let assert = cmd
        .arg("--device")
        .arg("/dev/sda1")
        .arg("--enable")
        .arg("--cleanup")
        .assert();
    assert.failure().code(2);
    Ok(())
}

#[test]
fn test_thinpool_migrator_missing_device() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("thinpool_migrator")?;
    let assert = cmd
        .env_remove("RUST_LOG")
        .arg("--device")
        .arg("/nonexistent/thinpool-migrator-test")
        .arg("--use-vpd")
        .arg("false")
        .arg("--dry-run")
        .assert();
    assert
        .failure()
        .code(1)
        .stderr(predicate::str::contains("thinpool_migrator: "));
    Ok(())
}

#[test]
fn test_thinpool_migrator_silent() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("thinpool_migrator")?;
    let assert = cmd
        .env_remove("RUST_LOG")
        .arg("--device")
        .arg("/nonexistent/thinpool-migrator-test")
        .arg("--use_vpd=false")
        .arg("--dry_run")
        .arg("--silent")
        .assert();
    assert.failure().code(1).stdout("").stderr("");
    Ok(())
}
