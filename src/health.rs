//! Health Checker: bounded concurrent probes over every component spec
//! §4.3 lists, aggregated into a single HEALTHY/DEGRADED/FAILED verdict.

use std::{
    collections::BTreeMap,
    net::{SocketAddr, TcpStream},
    thread,
    time::Duration,
};

use reqwest::blocking::Client;
use serde::Serialize;
use tracing::warn;

use crate::constants::{
    HEALTH_CHECK_DEADLINE, PORT_BROWSER_DRIVER, PORT_DEV_UI, PORT_LLM_RUNTIME,
    PORT_WORKFLOW_ENGINE_GRPC, PROC_CONTROL_PLANE_API, PROC_WORKER_MANAGER,
};
use crate::error::HealthError;
use crate::supervisor::{ManagedState, Supervisor};

/// Outcome of a single component probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeStatus {
    /// The component is reachable and behaving.
    Up,
    /// The probe failed or timed out.
    Down,
    /// Deliberately not checked (e.g. vault probe under `--skip-vault`).
    Skipped,
}

/// A single component's probe result.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Component name.
    pub component: String,
    /// Probe outcome.
    pub status: ProbeStatus,
    /// Whether this component's failure makes the global state FAILED.
    pub critical: bool,
    /// Optional human-readable detail (error message, probe description).
    pub detail: Option<String>,
}

/// Global aggregate Health Checker verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GlobalHealth {
    /// Every critical probe passed.
    Healthy,
    /// Every critical probe passed but a non-critical probe failed.
    Degraded,
    /// At least one critical probe failed.
    Failed,
}

/// Full Health Checker report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Aggregate verdict.
    pub global: GlobalHealth,
    /// Per-component results, in probe order.
    pub components: Vec<ComponentHealth>,
}

/// Options controlling which secondary (slower) probes run.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthOptions {
    /// Enables deep governance-file parse+shape validation and other
    /// secondary probes.
    pub validate: bool,
    /// Replaces the vault probe with `Skipped`.
    pub skip_vault: bool,
}

/// Runs every probe with a shared [`HEALTH_CHECK_DEADLINE`], one thread per
/// probe, and aggregates the results.
pub fn check_all(
    supervisor: &Supervisor,
    control_plane_base_url: Option<&str>,
    api_surface_base_url: Option<&str>,
    options: HealthOptions,
) -> Result<HealthReport, HealthError> {
    let deadline = HEALTH_CHECK_DEADLINE;
    let mut handles: Vec<(String, thread::JoinHandle<ComponentHealth>)> = Vec::new();

    handles.push((
        "workflow_engine".to_string(),
        thread::spawn(move || probe_tcp("workflow_engine", PORT_WORKFLOW_ENGINE_GRPC, true, deadline)),
    ));

    {
        let supervisor = supervisor.clone();
        handles.push((
            "worker".to_string(),
            thread::spawn(move || probe_supervised("worker", PROC_WORKER_MANAGER, true, &supervisor)),
        ));
    }

    handles.push((
        "llm_runtime".to_string(),
        thread::spawn(move || probe_tcp("llm_runtime", PORT_LLM_RUNTIME, false, deadline)),
    ));

    {
        let supervisor = supervisor.clone();
        let base_url = control_plane_base_url.map(str::to_string);
        handles.push((
            "control_plane".to_string(),
            thread::spawn(move || {
                probe_control_plane(&supervisor, base_url.as_deref(), deadline)
            }),
        ));
    }

    handles.push((
        "vault".to_string(),
        thread::spawn(move || probe_vault(options.skip_vault)),
    ));

    handles.push((
        "governance".to_string(),
        thread::spawn(move || probe_governance(options.validate)),
    ));

    handles.push((
        "browser_driver".to_string(),
        thread::spawn(move || probe_tcp("browser_driver", PORT_BROWSER_DRIVER, false, deadline)),
    ));

    {
        let base_url = api_surface_base_url.map(str::to_string);
        handles.push((
            "api_surface".to_string(),
            thread::spawn(move || probe_api_surface(base_url.as_deref(), deadline)),
        ));
    }

    handles.push((
        "dev_ui".to_string(),
        thread::spawn(move || probe_tcp("dev_ui", PORT_DEV_UI, false, deadline)),
    ));

    handles.push((
        "profile_store".to_string(),
        thread::spawn(probe_profile_store),
    ));

    let mut components = Vec::new();
    for (name, handle) in handles {
        match handle.join() {
            Ok(result) => components.push(result),
            Err(_) => components.push(ComponentHealth {
                component: name,
                status: ProbeStatus::Down,
                critical: false,
                detail: Some("probe thread panicked".to_string()),
            }),
        }
    }

    let global = aggregate(&components);
    Ok(HealthReport { global, components })
}

fn aggregate(components: &[ComponentHealth]) -> GlobalHealth {
    let any_critical_down = components
        .iter()
        .any(|c| c.critical && c.status == ProbeStatus::Down);
    if any_critical_down {
        return GlobalHealth::Failed;
    }
    let any_down = components.iter().any(|c| c.status == ProbeStatus::Down);
    if any_down {
        GlobalHealth::Degraded
    } else {
        GlobalHealth::Healthy
    }
}

fn dial(port: u16, timeout: Duration) -> bool {
    TcpStream::connect_timeout(&SocketAddr::from(([127, 0, 0, 1], port)), timeout).is_ok()
}

fn probe_tcp(component: &str, port: u16, critical: bool, deadline: Duration) -> ComponentHealth {
    let up = dial(port, deadline.min(Duration::from_secs(3)));
    ComponentHealth {
        component: component.to_string(),
        status: if up { ProbeStatus::Up } else { ProbeStatus::Down },
        critical,
        detail: if up {
            None
        } else {
            Some(format!("TCP dial to 127.0.0.1:{port} failed"))
        },
    }
}

fn probe_supervised(component: &str, process_name: &str, critical: bool, supervisor: &Supervisor) -> ComponentHealth {
    let status = match supervisor.lookup(process_name) {
        Ok((ManagedState::Ready, _)) => ProbeStatus::Up,
        Ok((state, _)) => {
            warn!("{component} not ready: supervisor reports {state:?}");
            ProbeStatus::Down
        }
        Err(err) => {
            warn!("{component} lookup failed: {err}");
            ProbeStatus::Down
        }
    };
    ComponentHealth {
        component: component.to_string(),
        status,
        critical,
        detail: None,
    }
}

fn probe_control_plane(supervisor: &Supervisor, base_url: Option<&str>, deadline: Duration) -> ComponentHealth {
    let supervised = probe_supervised("control_plane", PROC_CONTROL_PLANE_API, true, supervisor);
    if supervised.status != ProbeStatus::Up {
        return supervised;
    }

    let Some(base_url) = base_url else {
        return supervised;
    };

    let client = match Client::builder().timeout(deadline.min(Duration::from_secs(5))).build() {
        Ok(client) => client,
        Err(err) => {
            return ComponentHealth {
                component: "control_plane".to_string(),
                status: ProbeStatus::Down,
                critical: true,
                detail: Some(err.to_string()),
            };
        }
    };

    let url = format!("{base_url}/health");
    match client.get(&url).send() {
        Ok(response) if response.status().is_success() => ComponentHealth {
            component: "control_plane".to_string(),
            status: ProbeStatus::Up,
            critical: true,
            detail: None,
        },
        Ok(response) => ComponentHealth {
            component: "control_plane".to_string(),
            status: ProbeStatus::Down,
            critical: true,
            detail: Some(format!("GET {url} returned {}", response.status())),
        },
        Err(err) => ComponentHealth {
            component: "control_plane".to_string(),
            status: ProbeStatus::Down,
            critical: true,
            detail: Some(err.to_string()),
        },
    }
}

fn probe_api_surface(base_url: Option<&str>, deadline: Duration) -> ComponentHealth {
    let Some(base_url) = base_url else {
        return ComponentHealth {
            component: "api_surface".to_string(),
            status: ProbeStatus::Skipped,
            critical: false,
            detail: None,
        };
    };

    let client = match Client::builder().timeout(deadline.min(Duration::from_secs(5))).build() {
        Ok(client) => client,
        Err(err) => {
            return ComponentHealth {
                component: "api_surface".to_string(),
                status: ProbeStatus::Down,
                critical: false,
                detail: Some(err.to_string()),
            };
        }
    };

    let url = format!("{base_url}/documentation");
    let status = client
        .get(&url)
        .send()
        .map(|response| response.status().is_success() || response.status().as_u16() == 302)
        .unwrap_or(false);

    ComponentHealth {
        component: "api_surface".to_string(),
        status: if status { ProbeStatus::Up } else { ProbeStatus::Down },
        critical: false,
        detail: None,
    }
}

fn probe_vault(skip: bool) -> ComponentHealth {
    if skip {
        return ComponentHealth {
            component: "vault".to_string(),
            status: ProbeStatus::Skipped,
            critical: true,
            detail: None,
        };
    }

    let mut command = std::process::Command::new(
        crate::runtime::bin_path("engine_wrapper", "engine-wrapper"),
    );
    command.arg("--json").arg("synapse").arg("vault-status");

    let status = match command.output() {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let parsed: Option<serde_json::Value> = stdout
                .lines()
                .last()
                .and_then(|line| serde_json::from_str(line).ok());
            match parsed.and_then(|v| v.get("vault_state").and_then(|s| s.as_str()).map(str::to_string)) {
                Some(state) if state == "UNLOCKED" => ProbeStatus::Up,
                _ => ProbeStatus::Down,
            }
        }
        Err(_) => ProbeStatus::Down,
    };

    ComponentHealth {
        component: "vault".to_string(),
        status,
        critical: true,
        detail: None,
    }
}

fn probe_governance(deep_validate: bool) -> ComponentHealth {
    let path = crate::runtime::governance_path();
    if !path.exists() {
        return ComponentHealth {
            component: "governance".to_string(),
            status: ProbeStatus::Down,
            critical: true,
            detail: Some(format!("{} not present", path.display())),
        };
    }

    if !deep_validate {
        return ComponentHealth {
            component: "governance".to_string(),
            status: ProbeStatus::Up,
            critical: true,
            detail: None,
        };
    }

    let parsed = std::fs::read_to_string(&path)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok());
    let shape_ok = parsed
        .as_ref()
        .map(|v| v.is_object() && v.get("owner").is_some() && v.get("created_at").is_some())
        .unwrap_or(false);

    ComponentHealth {
        component: "governance".to_string(),
        status: if shape_ok { ProbeStatus::Up } else { ProbeStatus::Down },
        critical: true,
        detail: if shape_ok {
            None
        } else {
            Some("governance.json failed shape validation".to_string())
        },
    }
}

fn probe_profile_store() -> ComponentHealth {
    let path = crate::runtime::profiles_path();
    let status = if path.exists() {
        ProbeStatus::Up
    } else {
        ProbeStatus::Down
    };
    ComponentHealth {
        component: "profile_store".to_string(),
        status,
        critical: false,
        detail: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::set_base_dir;

    #[test]
    fn aggregate_is_healthy_with_no_failures() {
        let components = vec![ComponentHealth {
            component: "x".into(),
            status: ProbeStatus::Up,
            critical: true,
            detail: None,
        }];
        assert_eq!(aggregate(&components), GlobalHealth::Healthy);
    }

    #[test]
    fn aggregate_is_degraded_when_only_noncritical_fails() {
        let components = vec![
            ComponentHealth {
                component: "critical".into(),
                status: ProbeStatus::Up,
                critical: true,
                detail: None,
            },
            ComponentHealth {
                component: "noncritical".into(),
                status: ProbeStatus::Down,
                critical: false,
                detail: None,
            },
        ];
        assert_eq!(aggregate(&components), GlobalHealth::Degraded);
    }

    #[test]
    fn aggregate_is_failed_when_critical_fails() {
        let components = vec![ComponentHealth {
            component: "critical".into(),
            status: ProbeStatus::Down,
            critical: true,
            detail: None,
        }];
        assert_eq!(aggregate(&components), GlobalHealth::Failed);
    }

    #[test]
    fn profile_store_with_zero_profiles_still_reports_up_if_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_base_dir(dir.path().to_path_buf());
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(crate::runtime::profiles_path(), "[]").unwrap();

        let result = probe_profile_store();
        assert_eq!(result.status, ProbeStatus::Up);
    }

    #[test]
    fn governance_probe_fails_closed_when_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_base_dir(dir.path().to_path_buf());
        let result = probe_governance(false);
        assert_eq!(result.status, ProbeStatus::Down);
    }

    #[test]
    fn vault_probe_is_skipped_when_toggled() {
        let result = probe_vault(true);
        assert_eq!(result.status, ProbeStatus::Skipped);
    }
}
