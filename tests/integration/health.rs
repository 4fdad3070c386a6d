#[path = "common/mod.rs"]
mod common;

use common::OrchestratorFixture;

#[test]
fn health_report_has_a_global_verdict_and_all_components() {
    let fixture = OrchestratorFixture::new();
    fixture.set_toggles("toggles:\n  skip_vault: true\n");

    let assert = fixture.command().arg("health").assert().success();
    let report: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();

    let global = report["global"].as_str().expect("global verdict string");
    assert!(["Healthy", "Degraded", "Failed"].contains(&global));

    let components = report["components"].as_array().expect("components array");
    let names: Vec<&str> = components
        .iter()
        .map(|c| c["component"].as_str().unwrap())
        .collect();
    for expected in [
        "workflow_engine",
        "worker",
        "llm_runtime",
        "browser_driver",
        "control_plane",
        "api_surface",
        "vault",
        "governance",
        "profile_store",
    ] {
        assert!(
            names.contains(&expected),
            "expected component '{expected}' in {names:?}"
        );
    }

    // Nothing is actually running against a fresh fixture, so the overall
    // verdict must not silently claim health.
    assert_ne!(global, "Healthy");
}
