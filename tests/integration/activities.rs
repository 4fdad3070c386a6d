#[path = "common/mod.rs"]
mod common;

use std::time::Duration;

use common::write_profile_driver_stub;
use orchestrator::activities::{self, LaunchSentinelInput};
use orchestrator::runtime::set_base_dir;

#[test]
fn seed_then_launch_round_trips_through_the_driver_contract() {
    let dir = tempfile::tempdir().unwrap();
    set_base_dir(dir.path().to_path_buf());
    write_profile_driver_stub(dir.path());

    let driver_path = dir.path().join("bin/profile_driver/profile-driver");
    let log_path = dir.path().join("logs/activities.log");

    let seeded =
        activities::seed_profile(&driver_path, "work-alias", false, &log_path, Duration::from_secs(5))
            .expect("seed_profile should succeed against the stub");
    assert_eq!(seeded.alias, "work-alias");
    assert!(!seeded.uuid.is_empty());

    let input = LaunchSentinelInput {
        profile_id: seeded.uuid.clone(),
        mode: Some("headless".to_string()),
        config_override: None,
    };
    let launched = activities::launch_sentinel(&driver_path, &input, &log_path, Duration::from_secs(5))
        .expect("launch_sentinel should succeed against the stub");
    assert_eq!(launched.chrome_pid, 1234);
    assert!(launched.extension_loaded);

    activities::stop_sentinel(&driver_path, &seeded.uuid, &log_path, Duration::from_secs(5))
        .expect("stop_sentinel should succeed against the stub");
}

#[test]
fn start_ollama_parses_the_driver_contract() {
    let dir = tempfile::tempdir().unwrap();
    set_base_dir(dir.path().to_path_buf());
    write_profile_driver_stub(dir.path());

    let driver_path = dir.path().join("bin/profile_driver/profile-driver");
    let log_path = dir.path().join("logs/activities.log");

    let output = activities::start_ollama(&driver_path, &log_path, Duration::from_secs(5))
        .expect("start_ollama should succeed against the stub");
    assert_eq!(output.pid, 4321);
    assert_eq!(output.port, 11434);
}
