//! External-Binary Activity Layer: typed wrappers around the external
//! `<driver>`/`<engine-wrapper>` binaries.
//!
//! Stderr is streamed line-by-line to a per-profile log file as it
//! arrives; stdout is scanned line-by-line for JSON objects, with the
//! last valid one winning.

use std::{
    io::{BufRead, BufReader, Write as _},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::RetryPolicy;
use crate::error::ActivityError;

/// Raw JSON envelope shared by every external-binary contract:
/// `{success, ...fields, error?}`.
#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Input to the `LaunchSentinel` activity.
#[derive(Debug, Clone)]
pub struct LaunchSentinelInput {
    /// Profile to launch.
    pub profile_id: String,
    /// Optional launch mode (e.g. `"headless"`).
    pub mode: Option<String>,
    /// Optional config override JSON, piped over the child's stdin.
    pub config_override: Option<Value>,
}

/// Output of a successful `LaunchSentinel` activity.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchSentinelOutput {
    /// PID of the launched Chromium process.
    pub chrome_pid: u32,
    /// Remote-debugging port.
    pub debug_port: u16,
    /// Whether the managed extension finished loading before the driver
    /// returned.
    pub extension_loaded: bool,
    /// Effective config the driver actually launched with.
    #[serde(default)]
    pub effective_config: Option<Value>,
    /// Echoed profile id.
    pub profile_id: String,
}

/// Lenient parse target for the raw `LaunchSentinel` JSON, every field
/// optional so a truncated response (e.g. bare `{"success":true}`) still
/// deserializes and can be rejected as "incomplete" rather than failing on
/// a missing-field deserialize error.
#[derive(Debug, Clone, Deserialize, Default)]
struct RawLaunchSentinelOutput {
    #[serde(default)]
    chrome_pid: Option<u32>,
    #[serde(default)]
    debug_port: Option<u16>,
    #[serde(default)]
    extension_loaded: Option<bool>,
    #[serde(default)]
    effective_config: Option<Value>,
    #[serde(default)]
    profile_id: Option<String>,
}

/// Output of a successful `SeedProfile` activity.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedProfileOutput {
    /// Newly assigned profile UUID.
    pub uuid: String,
    /// Human alias for the profile.
    pub alias: String,
    /// Whether this profile is the master.
    pub is_master: bool,
    /// On-disk path the driver seeded the profile under.
    #[serde(default)]
    pub path: Option<String>,
}

/// Output of a successful `StartOllama` activity.
#[derive(Debug, Clone, Deserialize)]
pub struct StartOllamaOutput {
    /// PID of the LLM runtime process.
    pub pid: u32,
    /// Port it bound.
    pub port: u16,
    /// Reported runtime state.
    pub state: String,
}

/// Runs an external binary, applying the stdout/stderr discipline and
/// terminal-JSON contract, with a hard wall-clock timeout.
fn run_activity(
    mut command: Command,
    stdin_payload: Option<&Value>,
    stderr_log: &std::path::Path,
    timeout: Duration,
    activity_name: &str,
) -> Result<Value, ActivityError> {
    if let Some(parent) = stderr_log.parent() {
        std::fs::create_dir_all(parent)?;
    }

    command
        .stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child: Child = command.spawn()?;
    let start = Instant::now();

    if let Some(payload) = stdin_payload {
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(payload.to_string().as_bytes());
        }
    }

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let stderr_log = stderr_log.to_path_buf();
    let stderr_handle = thread::spawn(move || stream_stderr_to_log(stderr, &stderr_log));
    let stdout_handle = thread::spawn(move || {
        let mut last_json: Option<Value> = None;
        let reader = BufReader::new(stdout);
        for line in reader.lines().map_while(Result::ok) {
            if let Ok(value) = serde_json::from_str::<Value>(&line) {
                if value.is_object() {
                    last_json = Some(value);
                }
            }
        }
        last_json
    });

    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if start.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ActivityError::ActivityTimeout {
                    activity: activity_name.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            None => thread::sleep(Duration::from_millis(25)),
        }
    };

    let stderr_tail = stderr_handle.join().unwrap_or_default();
    let last_json = stdout_handle.join().unwrap_or_default();

    match last_json {
        Some(json) => {
            let envelope: Envelope = serde_json::from_value(json.clone())
                .map_err(|err| ActivityError::ContractViolation(err.to_string()))?;
            if envelope.success {
                Ok(json)
            } else {
                Err(ActivityError::ContractViolation(
                    envelope.error.unwrap_or_else(|| "success=false".to_string()),
                ))
            }
        }
        None if !status.success() => Err(ActivityError::ChildFailed {
            exit_code: status.code(),
            stderr_tail,
        }),
        None => Err(ActivityError::ContractViolation(
            "process exited zero but emitted no terminal JSON object".to_string(),
        )),
    }
}

/// Streams a child's stderr to `log_path` line-by-line, returning the last
/// line observed (used to synthesize an error when stdout yields no JSON).
fn stream_stderr_to_log(stderr: impl std::io::Read, log_path: &std::path::Path) -> String {
    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
    {
        Ok(file) => file,
        Err(err) => {
            warn!("failed to open activity stderr log {}: {err}", log_path.display());
            return String::new();
        }
    };
    let mut writer = std::io::BufWriter::new(file);
    let mut last_line = String::new();
    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
        debug!("{line}");
        let _ = writeln!(writer, "{line}");
        last_line = line;
    }
    last_line
}

/// Runs `activity` with its declared [`RetryPolicy`], sleeping the policy's
/// back-off between attempts. `PREFLIGHT_FAILED`/`VAULT_LOCKED` are not
/// retried even under a policy that otherwise allows it, since retrying
/// them wastes the attempt budget on something a back-off can't fix.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    mut activity: impl FnMut() -> Result<T, ActivityError>,
) -> Result<T, ActivityError> {
    let mut attempt = 1;
    loop {
        match activity() {
            Ok(value) => return Ok(value),
            Err(err @ (ActivityError::PreflightFailed(_) | ActivityError::VaultLocked)) => {
                return Err(err);
            }
            Err(err) if attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt + 1);
                warn!("activity attempt {attempt} failed: {err}; retrying after {delay:?}");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Launches a profile's sentinel via `<driver> --json launch`.
pub fn launch_sentinel(
    driver_path: &std::path::Path,
    input: &LaunchSentinelInput,
    stderr_log: &std::path::Path,
    timeout: Duration,
) -> Result<LaunchSentinelOutput, ActivityError> {
    let mut command = Command::new(driver_path);
    command.arg("--json").arg("launch").arg(&input.profile_id);
    if let Some(ref mode) = input.mode {
        command.arg("--mode").arg(mode);
    }
    if input.config_override.is_some() {
        command.arg("--config-file").arg("-");
    }

    let json = run_activity(
        command,
        input.config_override.as_ref(),
        stderr_log,
        timeout,
        "LaunchSentinel",
    )?;

    let raw: RawLaunchSentinelOutput = serde_json::from_value(json).unwrap_or_default();

    let profile_id = raw.profile_id.filter(|id| !id.is_empty());
    let chrome_pid = raw.chrome_pid.filter(|&pid| pid > 0);
    let (Some(profile_id), Some(chrome_pid)) = (profile_id, chrome_pid) else {
        return Err(ActivityError::ContractViolation(
            "incomplete response: missing profile_id or chrome_pid".to_string(),
        ));
    };

    Ok(LaunchSentinelOutput {
        chrome_pid,
        debug_port: raw.debug_port.unwrap_or_default(),
        extension_loaded: raw.extension_loaded.unwrap_or(false),
        effective_config: raw.effective_config,
        profile_id,
    })
}

/// Stops a profile's sentinel via `<driver> --json stop`. Best-effort
/// idempotent: a contract violation from an already-stopped sentinel is
/// swallowed by the caller, not here.
pub fn stop_sentinel(
    driver_path: &std::path::Path,
    profile_id: &str,
    stderr_log: &std::path::Path,
    timeout: Duration,
) -> Result<(), ActivityError> {
    let mut command = Command::new(driver_path);
    command.arg("--json").arg("stop").arg(profile_id);
    run_activity(command, None, stderr_log, timeout, "StopSentinel")?;
    Ok(())
}

/// Starts the LLM runtime via `<driver> --json ollama start`.
pub fn start_ollama(
    driver_path: &std::path::Path,
    stderr_log: &std::path::Path,
    timeout: Duration,
) -> Result<StartOllamaOutput, ActivityError> {
    let mut command = Command::new(driver_path);
    command.arg("--json").arg("ollama").arg("start");
    let json = run_activity(command, None, stderr_log, timeout, "StartOllama")?;
    serde_json::from_value(json).map_err(|err| ActivityError::ContractViolation(err.to_string()))
}

/// Seeds a new profile via `<driver> --json seed`.
pub fn seed_profile(
    driver_path: &std::path::Path,
    alias: &str,
    is_master: bool,
    stderr_log: &std::path::Path,
    timeout: Duration,
) -> Result<SeedProfileOutput, ActivityError> {
    let mut command = Command::new(driver_path);
    command
        .arg("--json")
        .arg("seed")
        .arg(alias)
        .arg(is_master.to_string());

    let json = run_activity(command, None, stderr_log, timeout, "SeedProfile")?;
    let data = json
        .get("data")
        .cloned()
        .ok_or_else(|| ActivityError::ContractViolation("response missing 'data'".to_string()))?;
    let output: SeedProfileOutput =
        serde_json::from_value(data).map_err(|err| ActivityError::ContractViolation(err.to_string()))?;

    if output.uuid.is_empty() {
        return Err(ActivityError::ContractViolation(
            "seed response missing data.uuid".to_string(),
        ));
    }
    Ok(output)
}

/// Runs the browser-driver/launcher pre-flight ahead of `LaunchSentinel`.
/// Skipped entirely when `skip` is set.
pub fn run_preflight(
    driver_port: u16,
    launcher_pipe: &std::path::Path,
    recovery_bound: Duration,
    launcher_poll_bound: Duration,
    skip: bool,
) -> Result<(), ActivityError> {
    if skip {
        return Ok(());
    }

    if !dial_tcp(driver_port) {
        let deadline = Instant::now() + recovery_bound;
        while Instant::now() < deadline {
            if dial_tcp(driver_port) {
                break;
            }
            thread::sleep(Duration::from_millis(200));
        }
        if !dial_tcp(driver_port) {
            return Err(ActivityError::PreflightFailed(format!(
                "browser driver not listening on 127.0.0.1:{driver_port} after recovery window"
            )));
        }
    }

    if !launcher_pipe.exists() {
        let deadline = Instant::now() + launcher_poll_bound;
        while Instant::now() < deadline {
            if launcher_pipe.exists() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }
        return Err(ActivityError::PreflightFailed(format!(
            "interactive launcher pipe {} did not appear",
            launcher_pipe.display()
        )));
    }

    Ok(())
}

fn dial_tcp(port: u16) -> bool {
    std::net::TcpStream::connect_timeout(
        &std::net::SocketAddr::from(([127, 0, 0, 1], port)),
        Duration::from_millis(500),
    )
    .is_ok()
}

/// Registers a log stream with the Telemetry Index via the
/// `register-stream` contract, exposed as a library call rather than a
/// subprocess since the Orchestrator owns the Telemetry Index directly.
pub fn register_stream(
    stream_id: &str,
    label: &str,
    path: &str,
    priority: u8,
) -> Result<(), ActivityError> {
    crate::telemetry::register_stream(stream_id, label, path, priority, None, None)
        .map_err(|err| ActivityError::Io(err.to_string()))?;
    Ok(())
}
