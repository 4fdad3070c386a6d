//! Configuration loading for the Orchestrator.

use std::{env, fs, path::Path, path::PathBuf};

use serde::Deserialize;

use crate::error::OrchestratorError;

/// Default config file name searched for in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "orchestrator.yaml";

/// Environment variable that can override the configuration file path.
pub const CONFIG_ENV_VAR: &str = "ORCHESTRATOR_CONFIG";

/// Top-level Orchestrator configuration, loaded from `orchestrator.yaml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory all Orchestrator-relative paths resolve against.
    pub base_dir: Option<String>,
    /// Paths (relative to `base_dir/bin/<component>/`) to external binaries.
    pub binaries: BinaryPaths,
    /// Boot/runtime toggles.
    pub toggles: Toggles,
    /// Task queue name the worker process attaches to.
    pub task_queue: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: None,
            binaries: BinaryPaths::default(),
            toggles: Toggles::default(),
            task_queue: "orchestrator-default".to_string(),
        }
    }
}

/// Paths to the external binaries the Activity Layer shells out to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinaryPaths {
    /// The profile driver binary, invoked as `<driver> --json <verb> ...`.
    pub profile_driver: String,
    /// The workflow-engine wrapper binary, invoked as `<engine-wrapper> <verb> ...`.
    pub engine_wrapper: String,
}

impl Default for BinaryPaths {
    fn default() -> Self {
        Self {
            profile_driver: "profile-driver".to_string(),
            engine_wrapper: "engine-wrapper".to_string(),
        }
    }
}

/// Boot and activity toggles controllable from the CLI or config file.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Toggles {
    /// Replaces the vault status probe with the literal state `SKIPPED`.
    pub skip_vault: bool,
    /// Bypasses both pre-flight checks in the Launch path.
    pub skip_preflight: bool,
    /// When true, a missing governance file is skipped with a note rather
    /// than treated as `POLICY_MISSING`.
    pub installation_mode: bool,
    /// Enables deep validation (parse + shape) of the governance file and
    /// the slower secondary health probes.
    pub validate: bool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            skip_vault: false,
            skip_preflight: false,
            installation_mode: false,
            validate: false,
        }
    }
}

/// Loads configuration following `systemg`'s precedence: an explicit path,
/// then the `ORCHESTRATOR_CONFIG` environment variable, then
/// `orchestrator.yaml` in the working directory, then built-in defaults if
/// none of those exist.
pub fn load_config(explicit_path: Option<&str>) -> Result<Config, OrchestratorError> {
    let resolved = explicit_path
        .map(PathBuf::from)
        .or_else(|| env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
        .or_else(|| {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        });

    let Some(path) = resolved else {
        return Ok(Config::default());
    };

    let content = fs::read_to_string(&path).map_err(|err| {
        OrchestratorError::Config(format!("failed to read {}: {err}", path.display()))
    })?;

    let config: Config = serde_yaml::from_str(&content)
        .map_err(|err| OrchestratorError::Config(format!("invalid YAML in {}: {err}", path.display())))?;

    Ok(config)
}

/// Applies a loaded `Config`'s `base_dir` to the process-wide runtime
/// context, falling back to the runtime default when unset.
pub fn apply_base_dir(config: &Config) {
    if let Some(ref base_dir) = config.base_dir {
        crate::runtime::set_base_dir(Path::new(base_dir).to_path_buf());
    }
}
