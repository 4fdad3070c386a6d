#[path = "common/mod.rs"]
mod common;

use common::{write_profile_driver_stub, OrchestratorFixture};

#[test]
fn profile_run_seeds_onboards_and_reaches_running_in_headless_mode() {
    let fixture = OrchestratorFixture::new();
    write_profile_driver_stub(fixture.base_dir());

    let assert = fixture
        .command()
        .arg("profile")
        .arg("run")
        .arg("qa-worker")
        .arg("--mode")
        .arg("headless")
        .assert()
        .success();
    let status: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();

    assert_eq!(status["state"], "RUNNING");
    assert!(status["profile_id"].as_str().unwrap().starts_with("qa-worker"));
    assert!(status["sentinel_running"].as_bool().unwrap());
    assert!(status["error_message"].is_null());
}
