//! Command-line interface for the Orchestrator: a thin external trigger.
//! Every subcommand resolves config, performs one bounded action, and
//! prints a single JSON object on stdout. Human logs go to stderr via
//! `tracing`.
use clap::{Parser, Subcommand};
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };
            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for the Orchestrator.
#[derive(Parser)]
#[command(name = "orchestratorctl", version, author)]
#[command(about = "Local control plane for browser-automation infrastructure", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Path to the Orchestrator's YAML config file.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for `orchestratorctl`.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the Boot Sequencer, print the resulting `BootResult`, then stay
    /// resident until interrupted so the managed processes it started can
    /// be stopped cleanly on shutdown.
    Boot,

    /// Run all Health Checker probes and print the resulting `HealthReport`.
    Health {
        /// Base URL of the control-plane HTTP API, if it exposes a
        /// `/health` endpoint beyond a bare TCP dial.
        #[arg(long)]
        control_plane_url: Option<String>,

        /// Base URL of the external API surface's `/documentation` route.
        #[arg(long)]
        api_surface_url: Option<String>,
    },

    /// Process Supervisor operations on a single named process.
    Supervisor {
        #[command(subcommand)]
        action: SupervisorAction,
    },

    /// Telemetry Index operations.
    Telemetry {
        #[command(subcommand)]
        action: TelemetryAction,
    },

    /// Profile Lifecycle operations.
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Log Correlator operations.
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
}

/// Process Supervisor subcommands.
#[derive(Subcommand)]
pub enum SupervisorAction {
    /// Start a managed process by name.
    Start {
        /// Name the process is tracked under.
        name: String,
        /// Program to execute.
        program: String,
        /// Arguments passed to the program.
        args: Vec<String>,
    },
    /// Stop a managed process by name, with a grace period before SIGKILL.
    Stop {
        /// Name the process is tracked under.
        name: String,
        /// Grace period in seconds before escalating to SIGKILL.
        #[arg(long, default_value = "10")]
        grace_seconds: u64,
    },
    /// Report the tracked state of a managed process.
    Status {
        /// Name the process is tracked under.
        name: String,
    },
}

/// Telemetry Index subcommands.
#[derive(Subcommand)]
pub enum TelemetryAction {
    /// Register or update a stream entry in the Telemetry Index.
    RegisterStream {
        /// Unique identifier for the stream.
        stream_id: String,
        /// Human-readable label.
        label: String,
        /// Path to the stream's log file.
        path: String,
        /// Display priority (lower sorts first).
        #[arg(long, default_value = "50")]
        priority: u8,
    },
}

/// Profile Lifecycle subcommands.
#[derive(Subcommand)]
pub enum ProfileAction {
    /// Seed a new profile, then drive it through onboarding and an
    /// initial launch, printing the final status once it settles.
    Run {
        /// Alias to seed the profile under.
        alias: String,
        /// Whether this is the master profile.
        #[arg(long)]
        master: bool,
        /// Launch mode (e.g. `headless`).
        #[arg(long)]
        mode: Option<String>,
    },
}

/// Log Correlator subcommands.
#[derive(Subcommand)]
pub enum LogsAction {
    /// Narrow trace window around a single launch.
    Trace {
        /// Launch identifier, e.g. `003_a1b2c3_143205`.
        launch_id: String,
    },
    /// Wider correlation window around a single launch ("correlate").
    Correlate {
        /// Launch identifier, e.g. `003_a1b2c3_143205`.
        launch_id: String,
    },
    /// Tabular summary of all tracked streams over a recent window.
    Summary {
        /// Lookback window, e.g. `1h30m` (default: `1h`).
        #[arg(long, default_value = "1h")]
        since: String,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
