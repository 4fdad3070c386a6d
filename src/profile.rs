//! Profile Lifecycle State Machine: one thread-actor per profile
//! identifier, driving `ProfileState` through its transition table and
//! calling the External-Binary Activity Layer for
//! `LaunchSentinel`/`StopSentinel`.
//!
//! The durable-execution engine itself lives outside this crate;
//! [`WorkflowEngineClient`] is the seam where one would be wired in, so
//! the reducer here carries no durability logic of its own.

use std::{
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex,
    },
    thread,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, trace, warn};

use crate::activities::{self, LaunchSentinelInput};
use crate::config::Config;
use crate::constants::{
    ACTIVITY_TIMEOUT_LAUNCH, ACTIVITY_TIMEOUT_STOP, PROFILE_WORKFLOW_MAX_IDLE, RetryPolicy,
};
use crate::error::ProfileError;

/// Lifecycle state of a single profile's sentinel workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileState {
    /// Not yet created.
    Idle,
    /// Created by the SeedProfile activity.
    Seeded,
    /// Running optional onboarding activities.
    Onboarding,
    /// Steady quiescent state awaiting launch.
    Ready,
    /// LaunchSentinel in flight or awaiting the extension-loaded gate.
    Launching,
    /// Sentinel running and healthy.
    Running,
    /// A heartbeat or extension signal failed.
    Degraded,
    /// A bounded recovery sub-flow is executing.
    Recovering,
    /// Shutdown signal received, StopSentinel in flight.
    Shutdown,
    /// Terminal: shut down cleanly.
    Terminated,
    /// Terminal: recovery exhausted or an unrecoverable failure occurred.
    Failed,
}

impl ProfileState {
    /// Whether this state accepts no further signals.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProfileState::Terminated | ProfileState::Failed)
    }

    fn as_str(&self) -> &'static str {
        match self {
            ProfileState::Idle => "IDLE",
            ProfileState::Seeded => "SEEDED",
            ProfileState::Onboarding => "ONBOARDING",
            ProfileState::Ready => "READY",
            ProfileState::Launching => "LAUNCHING",
            ProfileState::Running => "RUNNING",
            ProfileState::Degraded => "DEGRADED",
            ProfileState::Recovering => "RECOVERING",
            ProfileState::Shutdown => "SHUTDOWN",
            ProfileState::Terminated => "TERMINATED",
            ProfileState::Failed => "FAILED",
        }
    }
}

/// Signals the workflow actor accepts.
#[derive(Debug, Clone)]
pub enum ProfileSignal {
    /// First setup signal, moves SEEDED -> ONBOARDING.
    Setup,
    /// Onboarding completion signal, moves ONBOARDING -> READY.
    OnboardingComplete,
    /// Launch request, moves READY -> LAUNCHING.
    Launch {
        /// Optional launch mode (e.g. `"headless"`).
        mode: Option<String>,
        /// Optional config override passed to the driver.
        config_override: Option<Value>,
    },
    /// Heartbeat from the running sentinel; updates `last_update` only.
    Heartbeat {
        /// Time the heartbeat was observed.
        timestamp: DateTime<Utc>,
    },
    /// Heartbeat missed past its bound.
    HeartbeatFailed,
    /// The managed extension reported an error.
    ExtensionError(String),
    /// The managed extension finished loading, satisfying the
    /// LAUNCHING -> RUNNING gate when `mode != "headless"`.
    ExtensionLoaded,
    /// Shutdown request from any non-terminal state.
    Shutdown,
}

impl ProfileSignal {
    fn name(&self) -> &'static str {
        match self {
            ProfileSignal::Setup => "Setup",
            ProfileSignal::OnboardingComplete => "OnboardingComplete",
            ProfileSignal::Launch { .. } => "Launch",
            ProfileSignal::Heartbeat { .. } => "Heartbeat",
            ProfileSignal::HeartbeatFailed => "HeartbeatFailed",
            ProfileSignal::ExtensionError(_) => "ExtensionError",
            ProfileSignal::ExtensionLoaded => "ExtensionLoaded",
            ProfileSignal::Shutdown => "Shutdown",
        }
    }
}

/// `status` query response.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileStatus {
    /// Profile identifier.
    pub profile_id: String,
    /// Current lifecycle state.
    pub state: ProfileState,
    /// UTC timestamp of the last recorded transition or heartbeat.
    pub last_update: DateTime<Utc>,
    /// Error message attached to the current state, if any.
    pub error_message: Option<String>,
    /// Whether the sentinel is currently believed to be running.
    pub sentinel_running: bool,
}

/// `sentinel-details` query response: the most recent activity output.
#[derive(Debug, Clone)]
pub struct SentinelDetails {
    /// Chromium PID from the last successful LaunchSentinel, if any.
    pub chrome_pid: Option<u32>,
    /// Remote debugging port from the last successful LaunchSentinel.
    pub debug_port: Option<u16>,
    /// Raw JSON payload of the last LaunchSentinel response, if any.
    pub last_launch_output: Option<Value>,
}

/// Seam for a real durable-execution engine. The reducer in this module
/// carries no durability logic of its own; a caller that wires in an
/// actual engine would have it persist each transition here.
pub trait WorkflowEngineClient: Send + Sync {
    /// Called after every successful state transition.
    fn record_transition(&self, profile_id: &str, from: ProfileState, to: ProfileState);
}

/// No-op [`WorkflowEngineClient`] used when no durable engine is wired in.
pub struct NullWorkflowEngineClient;

impl WorkflowEngineClient for NullWorkflowEngineClient {
    fn record_transition(&self, profile_id: &str, from: ProfileState, to: ProfileState) {
        trace!(
            "profile '{profile_id}' transitioned {} -> {}",
            from.as_str(),
            to.as_str()
        );
    }
}

struct ProfileRecord {
    state: ProfileState,
    last_update: DateTime<Utc>,
    error_message: Option<String>,
    mode: Option<String>,
    chrome_pid: Option<u32>,
    debug_port: Option<u16>,
    last_launch_output: Option<Value>,
}

/// A handle to a running profile workflow actor.
pub struct ProfileWorkflow {
    profile_id: String,
    record: Arc<Mutex<ProfileRecord>>,
    sender: mpsc::Sender<ProfileSignal>,
}

impl ProfileWorkflow {
    /// Spawns the actor thread for a newly SeedProfile-created profile,
    /// starting it in state SEEDED.
    pub fn spawn(
        profile_id: String,
        config: Config,
        engine: Arc<dyn WorkflowEngineClient>,
    ) -> Self {
        let record = Arc::new(Mutex::new(ProfileRecord {
            state: ProfileState::Seeded,
            last_update: Utc::now(),
            error_message: None,
            mode: None,
            chrome_pid: None,
            debug_port: None,
            last_launch_output: None,
        }));

        let (sender, receiver) = mpsc::channel();
        let actor_record = Arc::clone(&record);
        let actor_profile_id = profile_id.clone();

        thread::spawn(move || {
            run_actor(actor_profile_id, config, actor_record, engine, receiver);
        });

        Self {
            profile_id,
            record,
            sender,
        }
    }

    /// Sends a signal to the actor. Returns [`ProfileError::ActorGone`] if
    /// the actor thread has already exited.
    pub fn signal(&self, signal: ProfileSignal) -> Result<(), ProfileError> {
        self.sender
            .send(signal)
            .map_err(|_| ProfileError::ActorGone(self.profile_id.clone()))
    }

    /// Side-effect-free status query: reads the shared record directly,
    /// never routing through the actor's signal queue.
    pub fn status(&self) -> ProfileStatus {
        let record = self.record.lock().expect("profile record mutex poisoned");
        ProfileStatus {
            profile_id: self.profile_id.clone(),
            state: record.state,
            last_update: record.last_update,
            error_message: record.error_message.clone(),
            sentinel_running: matches!(
                record.state,
                ProfileState::Running | ProfileState::Launching | ProfileState::Degraded
            ),
        }
    }

    /// Side-effect-free details query over the most recent activity output.
    pub fn sentinel_details(&self) -> SentinelDetails {
        let record = self.record.lock().expect("profile record mutex poisoned");
        SentinelDetails {
            chrome_pid: record.chrome_pid,
            debug_port: record.debug_port,
            last_launch_output: record.last_launch_output.clone(),
        }
    }
}

fn valid_transition(state: ProfileState, signal: &ProfileSignal) -> Option<ProfileState> {
    use ProfileSignal as S;
    use ProfileState as St;

    if matches!(signal, S::Shutdown) && !state.is_terminal() {
        return Some(St::Shutdown);
    }

    match (state, signal) {
        (St::Seeded, S::Setup) => Some(St::Onboarding),
        (St::Onboarding, S::OnboardingComplete) => Some(St::Ready),
        (St::Ready, S::Launch { .. }) => Some(St::Launching),
        (St::Launching, S::ExtensionLoaded) => Some(St::Running),
        (St::Running, S::Heartbeat { .. }) => Some(St::Running),
        (St::Running, S::HeartbeatFailed) => Some(St::Degraded),
        (St::Running, S::ExtensionError(_)) => Some(St::Degraded),
        _ => None,
    }
}

fn run_actor(
    profile_id: String,
    config: Config,
    record: Arc<Mutex<ProfileRecord>>,
    engine: Arc<dyn WorkflowEngineClient>,
    receiver: mpsc::Receiver<ProfileSignal>,
) {
    loop {
        match receiver.recv_timeout(PROFILE_WORKFLOW_MAX_IDLE) {
            Ok(signal) => {
                if !handle_signal(&profile_id, &config, &record, engine.as_ref(), signal) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let mut guard = record.lock().expect("profile record mutex poisoned");
                if !guard.state.is_terminal() {
                    warn!("profile '{profile_id}' idle timeout exceeded, marking FAILED");
                    let from = guard.state;
                    guard.state = ProfileState::Failed;
                    guard.error_message = Some("idle timeout exceeded".to_string());
                    guard.last_update = Utc::now();
                    drop(guard);
                    engine.record_transition(&profile_id, from, ProfileState::Failed);
                }
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Handles one signal, returning `false` if the actor should exit
/// (terminal state reached).
fn handle_signal(
    profile_id: &str,
    config: &Config,
    record: &Arc<Mutex<ProfileRecord>>,
    engine: &dyn WorkflowEngineClient,
    signal: ProfileSignal,
) -> bool {
    let current_state = record.lock().expect("profile record mutex poisoned").state;

    if let ProfileSignal::Heartbeat { timestamp } = &signal {
        if current_state == ProfileState::Running {
            let mut guard = record.lock().expect("profile record mutex poisoned");
            guard.last_update = *timestamp;
            return true;
        }
    }

    let Some(target) = valid_transition(current_state, &signal) else {
        warn!(
            "profile '{profile_id}' rejected signal {} in state {}",
            signal.name(),
            current_state.as_str()
        );
        return true;
    };

    match target {
        ProfileState::Launching => {
            let (mode, config_override) = match &signal {
                ProfileSignal::Launch { mode, config_override } => {
                    (mode.clone(), config_override.clone())
                }
                _ => (None, None),
            };
            apply_state(record, engine, profile_id, ProfileState::Launching, None);
            {
                let mut guard = record.lock().expect("profile record mutex poisoned");
                guard.mode = mode.clone();
            }
            run_launch(profile_id, config, record, engine, mode, config_override);
        }
        ProfileState::Shutdown => {
            apply_state(record, engine, profile_id, ProfileState::Shutdown, None);
            run_shutdown(profile_id, config, record, engine);
            return false;
        }
        ProfileState::Degraded => {
            let error = match &signal {
                ProfileSignal::ExtensionError(message) => Some(message.clone()),
                ProfileSignal::HeartbeatFailed => Some("heartbeat failed".to_string()),
                _ => None,
            };
            apply_state(record, engine, profile_id, ProfileState::Degraded, error);
            run_recovery(profile_id, config, record, engine);
        }
        other => apply_state(record, engine, profile_id, other, None),
    }

    true
}

fn apply_state(
    record: &Arc<Mutex<ProfileRecord>>,
    engine: &dyn WorkflowEngineClient,
    profile_id: &str,
    new_state: ProfileState,
    error_message: Option<String>,
) {
    let from = {
        let mut guard = record.lock().expect("profile record mutex poisoned");
        let from = guard.state;
        guard.state = new_state;
        guard.last_update = Utc::now();
        if error_message.is_some() {
            guard.error_message = error_message;
        } else if matches!(new_state, ProfileState::Ready | ProfileState::Running) {
            guard.error_message = None;
        }
        from
    };
    engine.record_transition(profile_id, from, new_state);
}

fn stderr_log_path(profile_id: &str) -> std::path::PathBuf {
    crate::runtime::component_log_path(&["profiles", &format!("{profile_id}_activities.log")])
}

fn run_launch(
    profile_id: &str,
    config: &Config,
    record: &Arc<Mutex<ProfileRecord>>,
    engine: &dyn WorkflowEngineClient,
    mode: Option<String>,
    config_override: Option<Value>,
) {
    let driver_path = crate::runtime::bin_path("profile_driver", &config.binaries.profile_driver);
    let log_path = stderr_log_path(profile_id);
    let policy = RetryPolicy::LAUNCH_OR_SEED;

    let input = LaunchSentinelInput {
        profile_id: profile_id.to_string(),
        mode: mode.clone(),
        config_override,
    };

    let result = activities::with_retry(&policy, || {
        activities::launch_sentinel(&driver_path, &input, &log_path, ACTIVITY_TIMEOUT_LAUNCH)
    });

    match result {
        Ok(output) => {
            let gate_satisfied = output.extension_loaded || mode.as_deref() == Some("headless");
            {
                let mut guard = record.lock().expect("profile record mutex poisoned");
                guard.chrome_pid = Some(output.chrome_pid);
                guard.debug_port = Some(output.debug_port);
                guard.last_launch_output = serde_json::to_value(&output).ok();
            }
            if gate_satisfied {
                apply_state(record, engine, profile_id, ProfileState::Running, None);
            } else {
                info!(
                    "profile '{profile_id}' launched but extension not yet loaded, awaiting signal"
                );
            }
        }
        Err(err) => {
            warn!("profile '{profile_id}' LaunchSentinel failed: {err}");
            apply_state(
                record,
                engine,
                profile_id,
                ProfileState::Degraded,
                Some(err.to_string()),
            );
            run_recovery(profile_id, config, record, engine);
        }
    }
}

fn run_recovery(
    profile_id: &str,
    config: &Config,
    record: &Arc<Mutex<ProfileRecord>>,
    engine: &dyn WorkflowEngineClient,
) {
    apply_state(record, engine, profile_id, ProfileState::Recovering, None);

    let driver_path = crate::runtime::bin_path("profile_driver", &config.binaries.profile_driver);
    let log_path = stderr_log_path(profile_id);
    let mode = record.lock().expect("profile record mutex poisoned").mode.clone();
    let policy = RetryPolicy::LAUNCH_OR_SEED;

    let input = LaunchSentinelInput {
        profile_id: profile_id.to_string(),
        mode: mode.clone(),
        config_override: None,
    };

    let result = activities::with_retry(&policy, || {
        activities::launch_sentinel(&driver_path, &input, &log_path, ACTIVITY_TIMEOUT_LAUNCH)
    });

    match result {
        Ok(output) => {
            let mut guard = record.lock().expect("profile record mutex poisoned");
            guard.chrome_pid = Some(output.chrome_pid);
            guard.debug_port = Some(output.debug_port);
            drop(guard);
            apply_state(record, engine, profile_id, ProfileState::Ready, None);
        }
        Err(err) => {
            warn!("profile '{profile_id}' recovery exhausted: {err}");
            apply_state(
                record,
                engine,
                profile_id,
                ProfileState::Failed,
                Some(err.to_string()),
            );
        }
    }
}

fn run_shutdown(
    profile_id: &str,
    config: &Config,
    record: &Arc<Mutex<ProfileRecord>>,
    engine: &dyn WorkflowEngineClient,
) {
    let driver_path = crate::runtime::bin_path("profile_driver", &config.binaries.profile_driver);
    let log_path = stderr_log_path(profile_id);

    if let Err(err) = activities::stop_sentinel(&driver_path, profile_id, &log_path, ACTIVITY_TIMEOUT_STOP) {
        warn!("profile '{profile_id}' StopSentinel reported an error (best-effort): {err}");
    }
    apply_state(record, engine, profile_id, ProfileState::Terminated, None);
}
