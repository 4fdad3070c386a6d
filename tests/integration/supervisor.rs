#[path = "common/mod.rs"]
mod common;

use std::{fs, time::Duration};

use common::{is_process_alive, wait_for_path, OrchestratorFixture};
use predicates::str::contains;

#[test]
fn start_spawns_a_real_process_and_records_telemetry() {
    let fixture = OrchestratorFixture::new();

    let assert = fixture
        .command()
        .arg("supervisor")
        .arg("start")
        .arg("integration-sleeper")
        .arg("sleep")
        .arg("30")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("json output");
    let pid = value["pid"].as_u64().expect("pid field") as u32;
    assert!(pid > 0);
    assert!(is_process_alive(pid), "spawned process should be alive");

    let telemetry_path = fixture.base_dir().join("config/telemetry.json");
    wait_for_path(&telemetry_path);
    let telemetry: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&telemetry_path).unwrap()).unwrap();
    assert!(
        telemetry["active_streams"]["integration-sleeper"].is_object(),
        "telemetry index should track the started process: {telemetry}"
    );

    // Clean up directly; a separate CLI invocation has no memory of this
    // process (each invocation owns its own in-process Supervisor).
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
    std::thread::sleep(Duration::from_millis(100));
}

#[test]
fn status_for_unknown_process_fails() {
    let fixture = OrchestratorFixture::new();
    fixture
        .command()
        .arg("supervisor")
        .arg("status")
        .arg("never-heard-of-it")
        .assert()
        .failure()
        .stderr(contains("no managed process"));
}
