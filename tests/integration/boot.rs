#[path = "common/mod.rs"]
mod common;

use std::{
    io::{BufRead, BufReader},
    process::Stdio,
    time::{Duration, Instant},
};

use common::{write_engine_wrapper_stub, write_profile_driver_stub, OrchestratorFixture};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

#[test]
fn boot_succeeds_through_every_stage_with_stub_binaries() {
    let fixture = OrchestratorFixture::new();
    write_engine_wrapper_stub(fixture.base_dir());
    write_profile_driver_stub(fixture.base_dir());

    fixture.set_toggles("toggles:\n  skip_vault: true\n  installation_mode: true\n");

    let mut child = fixture
        .command()
        .arg("boot")
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn orchestratorctl boot");

    let stdout = child.stdout.take().expect("piped stdout");
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let mut json_text = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line).expect("read boot result line");
        assert!(read > 0, "child exited before printing a BootResult");
        json_text.push_str(&line);
        if serde_json::from_str::<serde_json::Value>(&json_text).is_ok() {
            break;
        }
    }
    let result: serde_json::Value = serde_json::from_str(&json_text).unwrap();

    assert_eq!(result["success"], true);
    assert!(result["failed_stage"].is_null());
    assert_eq!(result["states"]["temporal_server"], "READY");
    assert_eq!(result["states"]["worker_manager"], "READY");
    assert_eq!(result["states"]["control_plane_api"], "READY");

    // A successful boot stays resident until interrupted; confirm it
    // shuts down cleanly on SIGINT instead of leaking the child forever.
    signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).expect("send SIGINT");

    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait().expect("poll child") {
            break status;
        }
        assert!(Instant::now() < deadline, "boot did not exit after SIGINT");
        std::thread::sleep(Duration::from_millis(50));
    };
    assert!(status.success(), "expected exit code 0, got {status:?}");
}

#[test]
fn boot_fails_fatally_when_governance_is_missing() {
    let fixture = OrchestratorFixture::new();
    write_engine_wrapper_stub(fixture.base_dir());
    write_profile_driver_stub(fixture.base_dir());

    let assert = fixture.command().arg("boot").assert().success();
    let result: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();

    assert_eq!(result["success"], false);
    assert_eq!(result["failed_stage"], "governance_validation");
}
