#[path = "common/mod.rs"]
mod common;

use common::OrchestratorFixture;
use predicates::str::contains;

#[test]
fn help_exits_successfully_and_lists_subcommands() {
    let fixture = OrchestratorFixture::new();
    fixture
        .command()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("boot"))
        .stdout(contains("supervisor"))
        .stdout(contains("telemetry"))
        .stdout(contains("profile"))
        .stdout(contains("logs"));
}

#[test]
fn unknown_subcommand_fails_with_usage_error() {
    let fixture = OrchestratorFixture::new();
    fixture
        .command()
        .arg("not-a-real-command")
        .assert()
        .failure()
        .stderr(contains("error"));
}

#[test]
fn log_level_flag_accepts_named_and_numeric_levels() {
    let fixture = OrchestratorFixture::new();

    fixture
        .command()
        .arg("--log-level")
        .arg("debug")
        .arg("supervisor")
        .arg("status")
        .arg("does-not-exist")
        .assert()
        .failure();

    fixture
        .command()
        .arg("--log-level")
        .arg("3")
        .arg("supervisor")
        .arg("status")
        .arg("does-not-exist")
        .assert()
        .failure();
}

#[test]
fn missing_config_file_is_reported_as_an_error() {
    let fixture = OrchestratorFixture::new();
    let missing = fixture.base_dir().join("nonexistent.yaml");

    assert_cmd::Command::cargo_bin("orchestratorctl")
        .expect("locate binary")
        .arg("--config")
        .arg(&missing)
        .arg("boot")
        .assert()
        .failure();
}
