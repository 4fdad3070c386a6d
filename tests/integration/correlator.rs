#[path = "common/mod.rs"]
mod common;

use std::fs;

use chrono::Utc;
use common::OrchestratorFixture;

#[test]
fn trace_merges_multiple_streams_within_the_launch_window() {
    let fixture = OrchestratorFixture::new();
    let now = Utc::now();
    let ts = |offset_secs: i64| {
        (now + chrono::Duration::seconds(offset_secs))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
    };

    let chrome_log = fixture.base_dir().join("logs/chrome.log");
    fs::create_dir_all(chrome_log.parent().unwrap()).unwrap();
    fs::write(
        &chrome_log,
        format!(
            "{} starting up driver\n{} launched PID=4821\n",
            ts(-10),
            ts(-5)
        ),
    )
    .unwrap();

    let extension_log = fixture.base_dir().join("logs/extension.log");
    fs::write(
        &extension_log,
        format!("{} extension_loaded true\n", ts(0)),
    )
    .unwrap();

    fixture
        .command()
        .arg("telemetry")
        .arg("register-stream")
        .arg("chrome")
        .arg("Chrome")
        .arg(chrome_log.to_str().unwrap())
        .assert()
        .success();
    fixture
        .command()
        .arg("telemetry")
        .arg("register-stream")
        .arg("extension")
        .arg("Extension")
        .arg(extension_log.to_str().unwrap())
        .assert()
        .success();

    let launch_id = format!("001_a1b2c3_{}", now.format("%H%M%S"));
    let assert = fixture
        .command()
        .arg("logs")
        .arg("trace")
        .arg(&launch_id)
        .assert()
        .success();
    let value: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();

    let timeline = value["timeline"].as_array().expect("timeline array");
    assert!(
        timeline.iter().any(|l| l.as_str().unwrap().contains("[chrome]")),
        "timeline should include the chrome stream: {timeline:?}"
    );
    assert!(
        timeline.iter().any(|l| l.as_str().unwrap().contains("[extension]")),
        "timeline should include the extension stream: {timeline:?}"
    );
    assert_eq!(value["summary"]["chrome_pid"], 4821);
    assert!(value["summary"]["extension_loaded"].as_bool().unwrap());
}

#[test]
fn summary_reports_silent_streams_as_file_missing() {
    let fixture = OrchestratorFixture::new();
    fixture
        .command()
        .arg("telemetry")
        .arg("register-stream")
        .arg("ghost")
        .arg("Ghost Stream")
        .arg(fixture.base_dir().join("logs/ghost.log").to_str().unwrap())
        .assert()
        .success();

    let assert = fixture
        .command()
        .arg("logs")
        .arg("summary")
        .arg("--since")
        .arg("1h")
        .assert()
        .success();
    let rows: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    let rows = rows.as_array().expect("rows array");
    let ghost = rows
        .iter()
        .find(|r| r["stream_id"] == "ghost")
        .expect("ghost row present");
    assert_eq!(ghost["file_exists"], false);
}
