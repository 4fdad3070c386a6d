#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::OrchestratorFixture;

#[test]
fn register_stream_persists_and_is_idempotent() {
    let fixture = OrchestratorFixture::new();

    let log_path = fixture.base_dir().join("logs/foo.log");

    let first = fixture
        .command()
        .arg("telemetry")
        .arg("register-stream")
        .arg("foo")
        .arg("Foo Stream")
        .arg(log_path.to_str().unwrap())
        .arg("--priority")
        .arg("10")
        .assert()
        .success();
    let first_index: serde_json::Value =
        serde_json::from_slice(&first.get_output().stdout).unwrap();
    let first_update = first_index["active_streams"]["foo"]["last_update"]
        .as_str()
        .unwrap()
        .to_string();

    std::thread::sleep(std::time::Duration::from_millis(20));

    let second = fixture
        .command()
        .arg("telemetry")
        .arg("register-stream")
        .arg("foo")
        .arg("Foo Stream")
        .arg(log_path.to_str().unwrap())
        .arg("--priority")
        .arg("10")
        .assert()
        .success();
    let second_index: serde_json::Value =
        serde_json::from_slice(&second.get_output().stdout).unwrap();

    assert_eq!(
        second_index["active_streams"].as_object().unwrap().len(),
        1,
        "re-registering the same stream must not duplicate it"
    );
    let second_update = second_index["active_streams"]["foo"]["last_update"]
        .as_str()
        .unwrap();
    assert!(
        second_update >= first_update.as_str(),
        "last_update must be monotonic across registrations"
    );

    let on_disk: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(fixture.base_dir().join("config/telemetry.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(on_disk, second_index);
}
