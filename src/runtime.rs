//! Helpers for resolving filesystem paths relative to the Orchestrator's
//! configured base directory.
//!
//! All paths the Orchestrator touches (the external binaries it shells
//! out to, the external profile registry, the Telemetry Index, per-stream
//! log files) are expressed relative to a single base directory. This
//! module holds that base directory as process-wide state so any module
//! can resolve a path without threading a `Config` reference through
//! every call site.

use std::{
    path::PathBuf,
    sync::{OnceLock, RwLock},
};

use crate::constants::{CORRELATOR_LOG_SUBDIR, GOVERNANCE_FILE_NAME, PROFILES_FILE_NAME, TELEMETRY_FILE_NAME};

static BASE_DIR: OnceLock<RwLock<PathBuf>> = OnceLock::new();

fn base_dir_lock() -> &'static RwLock<PathBuf> {
    BASE_DIR.get_or_init(|| RwLock::new(default_base_dir()))
}

fn default_base_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".local/share/orchestrator")
}

/// Sets the process-wide base directory. Subsequent calls overwrite it;
/// used once at startup after configuration has been loaded, and by tests
/// to point the Orchestrator at an isolated temporary directory.
pub fn set_base_dir(path: PathBuf) {
    let mut guard = base_dir_lock().write().expect("runtime context poisoned");
    *guard = path;
}

/// Returns the current base directory.
pub fn base_dir() -> PathBuf {
    base_dir_lock()
        .read()
        .expect("runtime context poisoned")
        .clone()
}

/// Returns `bin/<component>/<component-binary>`.
pub fn bin_path(component: &str, binary: &str) -> PathBuf {
    base_dir().join("bin").join(component).join(binary)
}

/// Returns the `config/` directory.
pub fn config_dir() -> PathBuf {
    base_dir().join("config")
}

/// Returns the path to the external profile registry file.
pub fn profiles_path() -> PathBuf {
    config_dir().join(PROFILES_FILE_NAME)
}

/// Returns the path to the governance policy file.
pub fn governance_path() -> PathBuf {
    config_dir().join(GOVERNANCE_FILE_NAME)
}

/// Returns the `logs/` directory (the Telemetry Index's "logs root").
pub fn logs_dir() -> PathBuf {
    base_dir().join("logs")
}

/// Returns the path to the Telemetry Index.
pub fn telemetry_index_path() -> PathBuf {
    logs_dir().join(TELEMETRY_FILE_NAME)
}

/// Returns `logs/<component>/[<subsystem>/]<module>_YYYYMMDD.log`, joining
/// the caller-supplied path segments onto the logs root.
pub fn component_log_path(segments: &[&str]) -> PathBuf {
    let mut path = logs_dir();
    for segment in segments {
        path.push(segment);
    }
    path
}

/// Returns the path the correlator writes its trace output to for a given
/// launch identifier.
pub fn correlator_trace_path(launch_id: &str) -> PathBuf {
    logs_dir()
        .join(CORRELATOR_LOG_SUBDIR)
        .join(format!("trace_{launch_id}.log"))
}
