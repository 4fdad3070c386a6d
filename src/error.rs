//! Error handling for the Orchestrator.
use thiserror::Error;

/// Errors raised by the Process Supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Error spawning a managed process.
    #[error("failed to start process '{name}': {source}")]
    StartError {
        /// Name of the process that failed to start.
        name: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error stopping a managed process.
    #[error("failed to stop process '{name}': {source}")]
    StopError {
        /// Name of the process that failed to stop.
        name: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error opening or creating the process's log file.
    #[error("failed to open log file for '{name}' at {path}: {source}")]
    LogFileError {
        /// Name of the process.
        name: String,
        /// Path that could not be opened.
        path: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error sending a signal to a managed process.
    #[error("failed to signal process '{name}' (pid {pid}): {source}")]
    SignalError {
        /// Name of the process.
        name: String,
        /// PID that could not be signaled.
        pid: u32,
        /// The underlying error that occurred.
        #[source]
        source: nix::Error,
    },

    /// Error for a poisoned mutex guarding supervisor state.
    #[error("supervisor state mutex is poisoned: {0}")]
    MutexPoisoned(String),

    /// No record exists for the requested process name.
    #[error("no managed process named '{0}'")]
    NotFound(String),
}

impl<T> From<std::sync::PoisonError<T>> for SupervisorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SupervisorError::MutexPoisoned(err.to_string())
    }
}

/// Errors raised by the Telemetry Index writer/reader protocol.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// I/O error reading or writing the index file.
    #[error("telemetry index I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error (de)serializing the index document.
    #[error("telemetry index is malformed JSON: {0}")]
    Serde(#[from] serde_json::Error),

    /// The advisory lock could not be obtained after all retries.
    /// Telemetry write failures are logged but never propagated as fatal;
    /// this variant exists so callers *can* observe it if they choose
    /// (e.g. for tests), but `Supervisor` deliberately swallows it.
    #[error("TELEMETRY_UNAVAILABLE: could not acquire index lock after retries")]
    LockUnavailable,
}

/// The error taxonomy surfaced by the External-Binary Activity Layer.
#[derive(Debug, Error, Clone)]
pub enum ActivityError {
    /// A required local dependency is not reachable after bounded recovery.
    #[error("PREFLIGHT_FAILED: {0}")]
    PreflightFailed(String),

    /// The workflow engine is unreachable or not serving.
    #[error("ENGINE_UNAVAILABLE: {0}")]
    EngineUnavailable(String),

    /// The child process exceeded its bounded deadline.
    #[error("ACTIVITY_TIMEOUT: '{activity}' exceeded {timeout_secs}s")]
    ActivityTimeout {
        /// Name of the activity that timed out.
        activity: String,
        /// Configured timeout, in seconds.
        timeout_secs: u64,
    },

    /// The child exited zero but emitted no parseable terminal JSON, or the
    /// JSON failed required-field validation.
    #[error("CONTRACT_VIOLATION: {0}")]
    ContractViolation(String),

    /// The child exited non-zero.
    #[error("CHILD_FAILED: exit status {exit_code:?}: {stderr_tail}")]
    ChildFailed {
        /// Process exit code, if any (`None` if terminated by signal).
        exit_code: Option<i32>,
        /// Last line of stderr captured from the child, if any.
        stderr_tail: String,
    },

    /// Governance policy file absent when required.
    #[error("POLICY_MISSING: {0}")]
    PolicyMissing(String),

    /// Vault probe returned LOCKED.
    #[error("VAULT_LOCKED")]
    VaultLocked,

    /// I/O error launching or communicating with the child process.
    #[error("activity I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ActivityError {
    fn from(err: std::io::Error) -> Self {
        ActivityError::Io(err.to_string())
    }
}

/// Errors raised driving a `ProfileWorkflow`.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The signal is not valid for the workflow's current state.
    #[error("signal {signal} is not valid in state {state}")]
    InvalidTransition {
        /// The state at the time the signal was received.
        state: String,
        /// The signal that was rejected.
        signal: String,
    },

    /// The requested profile workflow does not exist.
    #[error("no profile workflow for id '{0}'")]
    NotFound(String),

    /// The workflow's actor thread is no longer accepting messages.
    #[error("profile workflow actor for '{0}' has shut down")]
    ActorGone(String),

    /// An activity invoked by the workflow failed.
    #[error(transparent)]
    Activity(#[from] ActivityError),
}

/// Errors raised by the Boot Sequencer.
#[derive(Debug, Error)]
pub enum BootError {
    /// A fatal failure occurred at the named stage.
    #[error("boot failed at stage '{stage}': {source}")]
    StageFailed {
        /// Name of the stage that failed.
        stage: String,
        /// The underlying error.
        #[source]
        source: ActivityError,
    },

    /// Supervisor error surfaced while starting infrastructure.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Errors raised by the Health Checker.
#[derive(Debug, Error)]
pub enum HealthError {
    /// I/O error while probing a component.
    #[error("health probe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error type for the CLI/binary entry point.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Supervisor error.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    /// Telemetry error.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// Activity error.
    #[error(transparent)]
    Activity(#[from] ActivityError),
    /// Profile lifecycle error.
    #[error(transparent)]
    Profile(#[from] ProfileError),
    /// Boot sequencer error.
    #[error(transparent)]
    Boot(#[from] BootError),
    /// Health checker error.
    #[error(transparent)]
    Health(#[from] HealthError),
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
