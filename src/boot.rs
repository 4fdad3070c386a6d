//! Boot Sequencer: runs the fixed ordered plan bringing up the local
//! infrastructure, delegating each step's process lifecycle to
//! [`crate::supervisor::Supervisor`] and its external-binary contracts to
//! [`crate::activities`].

use std::{
    collections::BTreeMap,
    path::PathBuf,
    thread,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::activities::{self, ActivityError};
use crate::config::Config;
use crate::constants::{
    ACTIVITY_TIMEOUT_LAUNCH, CONTROL_PLANE_BIND_DELAY, PROC_CONTROL_PLANE_API, PROC_OLLAMA,
    PROC_TEMPORAL_SERVER, PROC_WORKER_MANAGER, WORKER_READY_DELAY,
};
use crate::error::BootError;
use crate::supervisor::Supervisor;

/// One named stage of the boot plan, run in a fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Ensure the workflow engine is up and serving.
    EnsureWorkflowEngine,
    /// Start the worker process.
    StartWorker,
    /// Start the LLM runtime (non-blocking, non-fatal on failure).
    StartLlmRuntime,
    /// Validate the governance policy file.
    GovernanceValidation,
    /// Probe the vault status.
    VaultStatus,
    /// Spawn the control-plane sidecar.
    ControlPlane,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::EnsureWorkflowEngine => "ensure_workflow_engine",
            Stage::StartWorker => "start_worker",
            Stage::StartLlmRuntime => "start_llm_runtime",
            Stage::GovernanceValidation => "governance_validation",
            Stage::VaultStatus => "vault_status",
            Stage::ControlPlane => "control_plane",
        }
    }
}

/// Outcome of the boot sequence.
#[derive(Debug, Clone, Serialize)]
pub struct BootResult {
    /// Whether every fatal stage succeeded.
    pub success: bool,
    /// Wall-clock seconds the boot sequence took.
    pub boot_time_seconds: f64,
    /// First stage that failed fatally, if any.
    pub failed_stage: Option<String>,
    /// PIDs of processes started, by managed-process name.
    pub pids: BTreeMap<String, u32>,
    /// Final recorded state per managed-process name.
    pub states: BTreeMap<String, String>,
    /// UTC timestamp the boot sequence completed.
    pub timestamp: DateTime<Utc>,
}

/// Drives the Boot Sequencer's fixed ordered plan.
pub struct BootSequencer<'a> {
    supervisor: &'a Supervisor,
    config: &'a Config,
}

impl<'a> BootSequencer<'a> {
    /// Creates a sequencer bound to `supervisor` and `config`.
    pub fn new(supervisor: &'a Supervisor, config: &'a Config) -> Self {
        Self { supervisor, config }
    }

    /// Runs the full plan, returning as soon as a fatal stage fails.
    pub fn run(&self) -> BootResult {
        let start = Instant::now();
        let mut pids = BTreeMap::new();
        let mut states = BTreeMap::new();
        let mut failed_stage = None;

        if let Err(err) = self.ensure_workflow_engine(&mut pids, &mut states) {
            warn!("boot stage '{}' failed fatally: {err}", Stage::EnsureWorkflowEngine.as_str());
            failed_stage = Some(Stage::EnsureWorkflowEngine.as_str().to_string());
        }

        if failed_stage.is_none() {
            if let Err(err) = self.start_worker(&mut pids, &mut states) {
                warn!("boot stage '{}' failed fatally: {err}", Stage::StartWorker.as_str());
                failed_stage = Some(Stage::StartWorker.as_str().to_string());
            }
        }

        if failed_stage.is_none() {
            // Non-blocking: failure here is logged as DEGRADED, never aborts boot.
            self.start_llm_runtime_non_blocking(&mut pids, &mut states);
        }

        if failed_stage.is_none() {
            if let Err(err) = self.governance_validation() {
                warn!("boot stage '{}' failed fatally: {err}", Stage::GovernanceValidation.as_str());
                failed_stage = Some(Stage::GovernanceValidation.as_str().to_string());
            }
        }

        if failed_stage.is_none() {
            if let Err(err) = self.vault_status() {
                warn!("boot stage '{}' failed fatally: {err}", Stage::VaultStatus.as_str());
                failed_stage = Some(Stage::VaultStatus.as_str().to_string());
            }
        }

        if failed_stage.is_none() {
            if let Err(err) = self.control_plane(&mut pids, &mut states) {
                warn!("boot stage '{}' failed fatally: {err}", Stage::ControlPlane.as_str());
                failed_stage = Some(Stage::ControlPlane.as_str().to_string());
            }
        }

        let success = failed_stage.is_none();
        if success {
            info!("boot sequence completed successfully in {:?}", start.elapsed());
        }

        BootResult {
            success,
            boot_time_seconds: start.elapsed().as_secs_f64(),
            failed_stage,
            pids,
            states,
            timestamp: system_time_to_utc(SystemTime::now()),
        }
    }

    fn engine_wrapper_path(&self) -> PathBuf {
        crate::runtime::bin_path("engine_wrapper", &self.config.binaries.engine_wrapper)
    }

    fn driver_path(&self) -> PathBuf {
        crate::runtime::bin_path("profile_driver", &self.config.binaries.profile_driver)
    }

    fn ensure_workflow_engine(
        &self,
        pids: &mut BTreeMap<String, u32>,
        states: &mut BTreeMap<String, String>,
    ) -> Result<(), BootError> {
        let log_path = crate::runtime::component_log_path(&[PROC_TEMPORAL_SERVER, "engine.log"]);
        let pid = self
            .supervisor
            .start(PROC_TEMPORAL_SERVER, &self.engine_wrapper_path().to_string_lossy(), &["ensure"], &log_path)
            .map_err(BootError::from)?;
        self.supervisor.mark_ready(PROC_TEMPORAL_SERVER)?;
        pids.insert(PROC_TEMPORAL_SERVER.to_string(), pid);
        states.insert(PROC_TEMPORAL_SERVER.to_string(), "READY".to_string());
        Ok(())
    }

    fn start_worker(
        &self,
        pids: &mut BTreeMap<String, u32>,
        states: &mut BTreeMap<String, String>,
    ) -> Result<(), BootError> {
        let log_path = crate::runtime::component_log_path(&[PROC_WORKER_MANAGER, "worker.log"]);
        let pid = self
            .supervisor
            .start(
                PROC_WORKER_MANAGER,
                &self.engine_wrapper_path().to_string_lossy(),
                &["worker", "--task-queue", &self.config.task_queue],
                &log_path,
            )
            .map_err(BootError::from)?;

        thread::sleep(WORKER_READY_DELAY);
        self.supervisor.mark_ready(PROC_WORKER_MANAGER)?;
        pids.insert(PROC_WORKER_MANAGER.to_string(), pid);
        states.insert(PROC_WORKER_MANAGER.to_string(), "READY".to_string());
        Ok(())
    }

    fn start_llm_runtime_non_blocking(
        &self,
        pids: &mut BTreeMap<String, u32>,
        states: &mut BTreeMap<String, String>,
    ) {
        let log_path = crate::runtime::component_log_path(&[PROC_OLLAMA, "ollama.log"]);
        match activities::start_ollama(&self.driver_path(), &log_path, ACTIVITY_TIMEOUT_LAUNCH) {
            Ok(output) => {
                let _ = self.supervisor.mark_ready(PROC_OLLAMA);
                pids.insert(PROC_OLLAMA.to_string(), output.pid);
                states.insert(PROC_OLLAMA.to_string(), "READY".to_string());
            }
            Err(err) => {
                warn!("LLM runtime failed to start, marking DEGRADED: {err}");
                let _ = self.supervisor.mark_degraded(PROC_OLLAMA);
                states.insert(PROC_OLLAMA.to_string(), "DEGRADED".to_string());
            }
        }
    }

    fn governance_validation(&self) -> Result<(), BootError> {
        let path = crate::runtime::governance_path();
        if !path.exists() {
            if self.config.toggles.installation_mode {
                info!("governance file absent during installation mode, skipping");
                return Ok(());
            }
            return Err(BootError::StageFailed {
                stage: Stage::GovernanceValidation.as_str().to_string(),
                source: ActivityError::PolicyMissing(path.display().to_string()),
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|err| BootError::StageFailed {
            stage: Stage::GovernanceValidation.as_str().to_string(),
            source: ActivityError::Io(err.to_string()),
        })?;
        let value: Value = serde_json::from_str(&content).map_err(|err| BootError::StageFailed {
            stage: Stage::GovernanceValidation.as_str().to_string(),
            source: ActivityError::ContractViolation(err.to_string()),
        })?;

        let has_required_fields = value.get("owner").is_some() && value.get("created_at").is_some();
        if !value.is_object() || !has_required_fields {
            return Err(BootError::StageFailed {
                stage: Stage::GovernanceValidation.as_str().to_string(),
                source: ActivityError::ContractViolation(
                    "governance.json missing required fields {owner, created_at}".to_string(),
                ),
            });
        }
        Ok(())
    }

    fn vault_status(&self) -> Result<(), BootError> {
        if self.config.toggles.skip_vault {
            info!("vault probe skipped by toggle, recording SKIPPED");
            return Ok(());
        }

        let log_path = crate::runtime::component_log_path(&["control_plane_api", "vault.log"]);
        let mut command = std::process::Command::new(self.engine_wrapper_path());
        command.arg("--json").arg("synapse").arg("vault-status");

        let output = command.output().map_err(|err| BootError::StageFailed {
            stage: Stage::VaultStatus.as_str().to_string(),
            source: ActivityError::Io(err.to_string()),
        })?;
        let _ = &log_path;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let value: Value = serde_json::from_str(stdout.lines().last().unwrap_or(""))
            .map_err(|err| BootError::StageFailed {
                stage: Stage::VaultStatus.as_str().to_string(),
                source: ActivityError::ContractViolation(err.to_string()),
            })?;

        match value.get("vault_state").and_then(Value::as_str) {
            Some("UNLOCKED") => Ok(()),
            Some("LOCKED") => Err(BootError::StageFailed {
                stage: Stage::VaultStatus.as_str().to_string(),
                source: ActivityError::VaultLocked,
            }),
            other => Err(BootError::StageFailed {
                stage: Stage::VaultStatus.as_str().to_string(),
                source: ActivityError::ContractViolation(format!("unexpected vault_state {other:?}")),
            }),
        }
    }

    fn control_plane(
        &self,
        pids: &mut BTreeMap<String, u32>,
        states: &mut BTreeMap<String, String>,
    ) -> Result<(), BootError> {
        let log_path =
            crate::runtime::component_log_path(&[PROC_CONTROL_PLANE_API, "control_plane.log"]);
        let pid = self
            .supervisor
            .start(
                PROC_CONTROL_PLANE_API,
                &self.engine_wrapper_path().to_string_lossy(),
                &["control-plane"],
                &log_path,
            )
            .map_err(BootError::from)?;

        thread::sleep(CONTROL_PLANE_BIND_DELAY);
        self.supervisor.mark_ready(PROC_CONTROL_PLANE_API)?;
        pids.insert(PROC_CONTROL_PLANE_API.to_string(), pid);
        states.insert(PROC_CONTROL_PLANE_API.to_string(), "READY".to_string());
        Ok(())
    }
}

fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    let duration = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    DateTime::from_timestamp(duration.as_secs() as i64, duration.subsec_nanos())
        .unwrap_or_else(Utc::now)
}
