//! Process Supervisor: starts, stops, and tracks the managed local
//! processes (workflow engine, worker, LLM runtime, control-plane sidecar).
//!
//! Each managed process gets a background thread that blocks on
//! [`std::process::Child::wait`] and transitions the process's recorded
//! state to `STOPPED`/`FAILED` on exit.

use std::{
    collections::HashMap,
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, trace, warn};

use crate::constants::{
    telemetry_label_and_priority, BOOT_START_ORDER, DEFAULT_STOP_GRACE, STOP_ALL_ORDER,
};
use crate::error::SupervisorError;
use crate::telemetry;

/// Lifecycle state of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedState {
    /// Recorded but never started.
    Idle,
    /// Spawn requested, not yet confirmed alive.
    Starting,
    /// Running and passing its readiness bar.
    Ready,
    /// Running but a health signal has failed.
    Degraded,
    /// Exited non-zero, or never became ready.
    Failed,
    /// Stop requested, grace period in progress.
    Stopping,
    /// Exited zero after a requested stop.
    Stopped,
}

impl ManagedState {
    /// Renders the state the way it's persisted into the Telemetry Index.
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagedState::Idle => "IDLE",
            ManagedState::Starting => "STARTING",
            ManagedState::Ready => "READY",
            ManagedState::Degraded => "DEGRADED",
            ManagedState::Failed => "FAILED",
            ManagedState::Stopping => "STOPPING",
            ManagedState::Stopped => "STOPPED",
        }
    }
}

/// A single managed process's bookkeeping record.
struct ManagedProcess {
    state: ManagedState,
    pid: Option<u32>,
}

/// Tracks every managed process by name and owns their exit-monitor
/// threads.
#[derive(Clone)]
pub struct Supervisor {
    records: Arc<Mutex<HashMap<String, ManagedProcess>>>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// Creates an empty supervisor with every process `IDLE`.
    pub fn new() -> Self {
        let mut records = HashMap::new();
        for name in BOOT_START_ORDER {
            records.insert(
                name.to_string(),
                ManagedProcess {
                    state: ManagedState::Idle,
                    pid: None,
                },
            );
        }
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }

    /// Starts `name` by spawning `program args...` with stdout/stderr
    /// redirected to `log_path`. A no-op (returns `Ok`) if the process is
    /// already `READY` or `DEGRADED`, since restart is the caller's call
    /// to make explicitly.
    pub fn start(
        &self,
        name: &str,
        program: &str,
        args: &[&str],
        log_path: &std::path::Path,
    ) -> Result<u32, SupervisorError> {
        {
            let records = self.records.lock()?;
            if let Some(existing) = records.get(name) {
                if matches!(existing.state, ManagedState::Ready | ManagedState::Degraded) {
                    debug!("process '{name}' already running, start is a no-op");
                    return Ok(existing.pid.unwrap_or_default());
                }
            }
        }

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SupervisorError::StartError {
                name: name.to_string(),
                source,
            })?;
        }
        let log_file =
            std::fs::File::create(log_path).map_err(|source| SupervisorError::LogFileError {
                name: name.to_string(),
                path: log_path.display().to_string(),
                source,
            })?;
        let log_file_err = log_file.try_clone().map_err(|source| SupervisorError::LogFileError {
            name: name.to_string(),
            path: log_path.display().to_string(),
            source,
        })?;

        trace!("starting process '{name}': {program} {args:?}");
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err));

        let child = cmd.spawn().map_err(|source| SupervisorError::StartError {
            name: name.to_string(),
            source,
        })?;
        let pid = child.id();

        {
            let mut records = self.records.lock()?;
            records.insert(
                name.to_string(),
                ManagedProcess {
                    state: ManagedState::Starting,
                    pid: Some(pid),
                },
            );
        }
        self.register_telemetry(name, log_path, Some(pid), ManagedState::Starting);

        self.spawn_exit_monitor(name.to_string(), child);
        Ok(pid)
    }

    /// Marks `name` `READY`, for callers (boot sequencer) that confirm
    /// liveness themselves rather than leaving the process at `STARTING`.
    pub fn mark_ready(&self, name: &str) -> Result<(), SupervisorError> {
        self.transition(name, ManagedState::Ready)
    }

    /// Marks `name` `DEGRADED`, for the Health Checker to call after a
    /// failed probe against an otherwise-running process.
    pub fn mark_degraded(&self, name: &str) -> Result<(), SupervisorError> {
        self.transition(name, ManagedState::Degraded)
    }

    fn transition(&self, name: &str, new_state: ManagedState) -> Result<(), SupervisorError> {
        let pid = {
            let mut records = self.records.lock()?;
            let record = records
                .get_mut(name)
                .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
            record.state = new_state;
            record.pid
        };
        self.touch_telemetry(name, pid, new_state);
        Ok(())
    }

    /// Stops `name`: SIGTERM, wait up to `grace`, then SIGKILL if it's
    /// still alive. A no-op if the process isn't tracked as running.
    pub fn stop(&self, name: &str, grace: Duration) -> Result<(), SupervisorError> {
        let pid = {
            let mut records = self.records.lock()?;
            let Some(record) = records.get_mut(name) else {
                return Err(SupervisorError::NotFound(name.to_string()));
            };
            let Some(pid) = record.pid else {
                return Ok(());
            };
            record.state = ManagedState::Stopping;
            pid
        };
        self.touch_telemetry(name, Some(pid), ManagedState::Stopping);

        let nix_pid = Pid::from_raw(pid as i32);
        if let Err(source) = signal::kill(nix_pid, Signal::SIGTERM) {
            if source != nix::errno::Errno::ESRCH {
                return Err(SupervisorError::SignalError {
                    name: name.to_string(),
                    pid,
                    source,
                });
            }
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if signal::kill(nix_pid, None).is_err() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }

        if signal::kill(nix_pid, None).is_ok() {
            warn!("process '{name}' (pid {pid}) ignored SIGTERM, sending SIGKILL");
            signal::kill(nix_pid, Signal::SIGKILL).map_err(|source| SupervisorError::SignalError {
                name: name.to_string(),
                pid,
                source,
            })?;
        }
        Ok(())
    }

    /// Stops every managed process in [`STOP_ALL_ORDER`].
    pub fn stop_all(&self) -> Result<(), SupervisorError> {
        for name in STOP_ALL_ORDER {
            if let Err(err) = self.stop(name, DEFAULT_STOP_GRACE) {
                error!("failed to stop '{name}' during stop_all: {err}");
            }
        }
        Ok(())
    }

    /// Returns the current `(state, pid)` for `name`.
    pub fn lookup(&self, name: &str) -> Result<(ManagedState, Option<u32>), SupervisorError> {
        let records = self.records.lock()?;
        let record = records
            .get(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        Ok((record.state, record.pid))
    }

    fn spawn_exit_monitor(&self, name: String, mut child: Child) {
        let records = Arc::clone(&self.records);
        thread::spawn(move || {
            let status = child.wait();
            let mut guard = match records.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(record) = guard.get_mut(&name) {
                // A stop we initiated leaves the record in `Stopping`;
                // anything else exiting on its own is a failure.
                record.state = match (record.state, &status) {
                    (ManagedState::Stopping, _) => ManagedState::Stopped,
                    (_, Ok(status)) if status.success() => ManagedState::Stopped,
                    _ => ManagedState::Failed,
                };
                let pid = record.pid;
                let new_state = record.state;
                drop(guard);
                if let Err(err) = telemetry::update_stream_state(&name, pid, new_state.as_str()) {
                    warn!("failed to record exit of '{name}' in telemetry index: {err}");
                }
            }
            match status {
                Ok(status) => debug!("process '{name}' exited: {status}"),
                Err(err) => error!("failed to wait on process '{name}': {err}"),
            }
        });
    }

    fn touch_telemetry(&self, name: &str, pid: Option<u32>, state: ManagedState) {
        if let Err(err) = telemetry::update_stream_state(name, pid, state.as_str()) {
            warn!("failed to record '{name}' transition to {state:?} in telemetry index: {err}");
        }
    }

    /// Registers `name` in the Telemetry Index with its label and priority,
    /// carrying `pid`/`state` in the same write. Called on `start` so the
    /// stream exists before any later `update_stream_state` upsert, which
    /// is a no-op against an unregistered key.
    fn register_telemetry(
        &self,
        name: &str,
        log_path: &std::path::Path,
        pid: Option<u32>,
        state: ManagedState,
    ) {
        let (label, priority) = telemetry_label_and_priority(name);
        if let Err(err) = telemetry::register_stream(
            name,
            label,
            &log_path.to_string_lossy(),
            priority,
            pid,
            Some(state.as_str().to_string()),
        ) {
            warn!("failed to register '{name}' in telemetry index: {err}");
        }
    }
}
