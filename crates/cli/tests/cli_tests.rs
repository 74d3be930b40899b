use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("wecom-mediator").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stateful chat-message mediation service"));
}

#[test]
fn test_cli_serve_help() {
    let mut cmd = Command::cargo_bin("wecom-mediator").unwrap();
    cmd.arg("serve").arg("--help").assert().success().stdout(predicate::str::contains("port"));
}
