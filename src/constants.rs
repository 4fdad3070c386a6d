//! Constants and configuration values for the Orchestrator.
//!
//! Centralizes magic numbers, filesystem layout names, and default
//! timeouts/ports so they aren't scattered across the modules that use
//! them.

use std::time::Duration;

// ============================================================================
// Filesystem layout (relative to the configured base directory)
// ============================================================================

/// Name of the Telemetry Index file under the logs root.
pub const TELEMETRY_FILE_NAME: &str = "telemetry.json";

/// Suffix for the Telemetry Index's advisory lock file.
pub const TELEMETRY_LOCK_SUFFIX: &str = ".lock";

/// Name of the external profile registry file (external writer, read-only here).
pub const PROFILES_FILE_NAME: &str = "profiles.json";

/// Name of the governance policy file under the configured base directory.
pub const GOVERNANCE_FILE_NAME: &str = "governance.json";

/// Directory under the logs root holding correlator trace output.
pub const CORRELATOR_LOG_SUBDIR: &str = "synapse";

// ============================================================================
// Ports (loopback only)
// ============================================================================

/// Workflow engine gRPC port.
pub const PORT_WORKFLOW_ENGINE_GRPC: u16 = 7233;
/// Workflow engine UI port.
pub const PORT_WORKFLOW_ENGINE_UI: u16 = 8233;
/// LLM runtime port.
pub const PORT_LLM_RUNTIME: u16 = 11434;
/// Control-plane HTTP API port.
pub const PORT_CONTROL_PLANE_API: u16 = 48215;
/// Control-plane WebSocket port.
pub const PORT_CONTROL_PLANE_WS: u16 = 4124;
/// Browser driver TCP port.
pub const PORT_BROWSER_DRIVER: u16 = 5678;
/// Optional dev UI port.
pub const PORT_DEV_UI: u16 = 5173;

// ============================================================================
// Managed process names
// ============================================================================

/// Workflow engine process name.
pub const PROC_TEMPORAL_SERVER: &str = "temporal_server";
/// Worker process name.
pub const PROC_WORKER_MANAGER: &str = "worker_manager";
/// Control-plane sidecar process name.
pub const PROC_CONTROL_PLANE_API: &str = "control_plane_api";
/// LLM runtime process name.
pub const PROC_OLLAMA: &str = "ollama";

/// Order in which the Boot Sequencer starts infrastructure.
pub const BOOT_START_ORDER: [&str; 4] = [
    PROC_TEMPORAL_SERVER,
    PROC_WORKER_MANAGER,
    PROC_OLLAMA,
    PROC_CONTROL_PLANE_API,
];

/// Reverse start order, used by `stop_all`: control plane -> LLM runtime ->
/// worker -> workflow engine.
pub const STOP_ALL_ORDER: [&str; 4] = [
    PROC_CONTROL_PLANE_API,
    PROC_OLLAMA,
    PROC_WORKER_MANAGER,
    PROC_TEMPORAL_SERVER,
];

/// Telemetry Index `(label, priority)` for each managed process, keyed by
/// its process name. Priority follows {1, 2, 3}: lower sorts first.
pub const PROC_TELEMETRY: [(&str, &str, u8); 4] = [
    (PROC_TEMPORAL_SERVER, "Workflow Engine", 1),
    (PROC_WORKER_MANAGER, "Worker", 2),
    (PROC_CONTROL_PLANE_API, "Control-Plane API", 2),
    (PROC_OLLAMA, "LLM Runtime", 3),
];

/// Looks up a managed process's Telemetry Index label and priority,
/// falling back to a generic label and priority 3 for any name outside
/// [`PROC_TELEMETRY`].
pub fn telemetry_label_and_priority(name: &str) -> (&'static str, u8) {
    PROC_TELEMETRY
        .iter()
        .find(|(proc_name, _, _)| *proc_name == name)
        .map(|(_, label, priority)| (*label, *priority))
        .unwrap_or(("Managed Process", 3))
}

// ============================================================================
// Timeouts
// ============================================================================

/// Default grace period given to a process between SIGTERM and SIGKILL.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Bounded delay before marking the worker READY at boot (no deep probe).
pub const WORKER_READY_DELAY: Duration = Duration::from_secs(3);

/// Bounded delay waiting for the control-plane sidecar to bind.
pub const CONTROL_PLANE_BIND_DELAY: Duration = Duration::from_secs(3);

/// Global deadline for a full Health Checker pass.
pub const HEALTH_CHECK_DEADLINE: Duration = Duration::from_secs(30);

/// Bound on the browser-driver pre-flight TCP dial/recovery attempt.
pub const PREFLIGHT_DRIVER_RECOVERY_BOUND: Duration = Duration::from_secs(10);

/// Bound on waiting for the interactive launcher's named pipe to appear.
pub const PREFLIGHT_LAUNCHER_POLL_BOUND: Duration = Duration::from_secs(3);

/// Activity timeout: LaunchSentinel.
pub const ACTIVITY_TIMEOUT_LAUNCH: Duration = Duration::from_secs(90);
/// Activity timeout: SeedProfile.
pub const ACTIVITY_TIMEOUT_SEED: Duration = Duration::from_secs(90);
/// Activity timeout: StopSentinel.
pub const ACTIVITY_TIMEOUT_STOP: Duration = Duration::from_secs(30);

/// Wall-time bound for a profile workflow absent any activity.
pub const PROFILE_WORKFLOW_MAX_IDLE: Duration = Duration::from_secs(30 * 60);

// ============================================================================
// Retry policy
// ============================================================================

/// Declarative retry policy evaluated by the activity wrapper.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial back-off delay.
    pub initial: Duration,
    /// Maximum back-off delay.
    pub max: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Retry policy for LaunchSentinel / SeedProfile: up to 3 attempts.
    pub const LAUNCH_OR_SEED: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial: Duration::from_millis(500),
        max: Duration::from_secs(8),
        multiplier: 2.0,
    };

    /// StopSentinel never retries.
    pub const NO_RETRY: RetryPolicy = RetryPolicy {
        max_attempts: 1,
        initial: Duration::from_millis(0),
        max: Duration::from_millis(0),
        multiplier: 1.0,
    };

    /// Returns the back-off delay before the given 1-indexed attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(0);
        }
        let scale = self.multiplier.powi((attempt - 2) as i32);
        let millis = (self.initial.as_millis() as f64 * scale) as u64;
        Duration::from_millis(millis).min(self.max)
    }
}

// ============================================================================
// Telemetry Index writer protocol
// ============================================================================

/// Maximum number of lock-acquisition retries before giving up (non-fatal).
pub const TELEMETRY_LOCK_MAX_RETRIES: usize = 5;

/// Back-off intervals (milliseconds) between telemetry lock retries, in order.
pub const TELEMETRY_LOCK_BACKOFF_MS: [u64; 5] = [50, 80, 110, 140, 170];

// ============================================================================
// Log correlator
// ============================================================================

/// Correlation window half-width for the `correlate` command.
pub const CORRELATE_WINDOW_BEFORE: Duration = Duration::from_secs(2 * 60);
/// Correlation window half-width for the `correlate` command.
pub const CORRELATE_WINDOW_AFTER: Duration = Duration::from_secs(2 * 60);

/// Trace window start offset for the `trace` command.
pub const TRACE_WINDOW_BEFORE: Duration = Duration::from_secs(30);
/// Trace window end offset for the `trace` command.
pub const TRACE_WINDOW_AFTER: Duration = Duration::from_secs(5 * 60);

/// A launch identifier whose HHMMSS is more than this far in the future is
/// reinterpreted as having occurred the previous day.
pub const LAUNCH_ID_FUTURE_SLACK: Duration = Duration::from_secs(5 * 60);

/// Timestamp formats tried in order when parsing log lines.
pub const LOG_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%:z",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];
