use std::error::Error;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;
use tracing_subscriber::EnvFilter;

use orchestrator::{
    activities,
    boot::BootSequencer,
    cli::{self, Cli, Commands, LogsAction, ProfileAction, SupervisorAction, TelemetryAction},
    config,
    constants::ACTIVITY_TIMEOUT_SEED,
    correlator::{self, LaunchId, StrictMode, WindowKind},
    health::{self, HealthOptions},
    profile::{NullWorkflowEngineClient, ProfileSignal, ProfileState, ProfileWorkflow},
    runtime,
    supervisor::Supervisor,
    telemetry,
};

fn main() -> Result<(), Box<dyn Error>> {
    let cli = cli::parse_args();
    init_logging(&cli);

    let config = config::load_config(cli.config.as_deref())?;
    config::apply_base_dir(&config);

    match cli.command {
        Commands::Boot => run_boot(&config),
        Commands::Health { control_plane_url, api_surface_url } => {
            run_health(&config, control_plane_url, api_surface_url)
        }
        Commands::Supervisor { action } => run_supervisor(action),
        Commands::Telemetry { action } => run_telemetry(action),
        Commands::Profile { action } => run_profile(&config, action),
        Commands::Logs { action } => run_logs(action),
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let log_dir = runtime::logs_dir();
    if let Err(err) = fs::create_dir_all(&log_dir) {
        eprintln!("failed to create log directory {log_dir:?}: {err}");
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        return;
    }
    let log_path = log_dir.join("orchestrator.log");

    match fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(move || file.try_clone().expect("clone log file handle"))
                .with_ansi(false)
                .try_init();
        }
        Err(err) => {
            eprintln!("failed to open orchestrator log file {log_path:?}: {err}");
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_boot(config: &config::Config) -> Result<(), Box<dyn Error>> {
    let supervisor = Supervisor::new();
    let result = BootSequencer::new(&supervisor, config).run();
    print_json(&result)?;

    if !result.success {
        return Ok(());
    }

    let shutdown_supervisor = supervisor.clone();
    ctrlc::set_handler(move || {
        warn!("received interrupt, stopping all managed processes");
        if let Err(err) = shutdown_supervisor.stop_all() {
            warn!("error during stop_all: {err}");
        }
        std::process::exit(0);
    })?;

    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}

fn run_health(
    config: &config::Config,
    control_plane_url: Option<String>,
    api_surface_url: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let supervisor = Supervisor::new();
    let options = HealthOptions {
        validate: config.toggles.validate,
        skip_vault: config.toggles.skip_vault,
    };
    let report = health::check_all(
        &supervisor,
        control_plane_url.as_deref(),
        api_surface_url.as_deref(),
        options,
    )?;
    print_json(&report)
}

fn run_supervisor(action: SupervisorAction) -> Result<(), Box<dyn Error>> {
    let supervisor = Supervisor::new();
    match action {
        SupervisorAction::Start { name, program, args } => {
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            let log_path = runtime::component_log_path(&[&name, "supervisor.log"]);
            let pid = supervisor.start(&name, &program, &arg_refs, &log_path)?;
            print_json(&serde_json::json!({ "name": name, "pid": pid }))
        }
        SupervisorAction::Stop { name, grace_seconds } => {
            supervisor.stop(&name, Duration::from_secs(grace_seconds))?;
            print_json(&serde_json::json!({ "name": name, "stopped": true }))
        }
        SupervisorAction::Status { name } => {
            let (state, pid) = supervisor.lookup(&name)?;
            print_json(&serde_json::json!({ "name": name, "state": state.as_str(), "pid": pid }))
        }
    }
}

fn run_telemetry(action: TelemetryAction) -> Result<(), Box<dyn Error>> {
    match action {
        TelemetryAction::RegisterStream { stream_id, label, path, priority } => {
            let index = telemetry::register_stream(&stream_id, &label, &path, priority, None, None)?;
            print_json(&index)
        }
    }
}

fn run_profile(config: &config::Config, action: ProfileAction) -> Result<(), Box<dyn Error>> {
    match action {
        ProfileAction::Run { alias, master, mode } => {
            let driver_path =
                runtime::bin_path("profile_driver", &config.binaries.profile_driver);
            let seed_log = runtime::component_log_path(&["profiles", "seed.log"]);
            let seeded =
                activities::seed_profile(&driver_path, &alias, master, &seed_log, ACTIVITY_TIMEOUT_SEED)?;

            let workflow = ProfileWorkflow::spawn(
                seeded.uuid.clone(),
                config.clone(),
                Arc::new(NullWorkflowEngineClient),
            );

            workflow.signal(ProfileSignal::Setup)?;
            wait_for(&workflow, ProfileState::Onboarding);
            workflow.signal(ProfileSignal::OnboardingComplete)?;
            wait_for(&workflow, ProfileState::Ready);
            workflow.signal(ProfileSignal::Launch { mode, config_override: None })?;

            let deadline = Instant::now() + Duration::from_secs(120);
            while Instant::now() < deadline {
                let status = workflow.status();
                if matches!(
                    status.state,
                    ProfileState::Running | ProfileState::Degraded | ProfileState::Failed
                ) {
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }

            print_json(&workflow.status())
        }
    }
}

fn wait_for(workflow: &ProfileWorkflow, expected: ProfileState) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if workflow.status().state == expected {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    warn!("timed out waiting for profile workflow to reach {expected:?}");
}

fn run_logs(action: LogsAction) -> Result<(), Box<dyn Error>> {
    let index = telemetry::TelemetryIndex::read_default()?;
    match action {
        LogsAction::Trace { launch_id } => {
            let Some(id) = LaunchId::parse(&launch_id) else {
                return Err(format!("invalid launch id '{launch_id}'").into());
            };
            let result = correlator::correlate(
                &index,
                &id,
                chrono::Local::now(),
                WindowKind::Trace,
                StrictMode::NonStrict,
            );
            print_json(&serde_json::json!({
                "summary": result.summary,
                "timeline": result.timeline.iter().map(|l| l.formatted()).collect::<Vec<_>>(),
                "silent_streams": result.silent_streams,
            }))
        }
        LogsAction::Correlate { launch_id } => {
            let Some(id) = LaunchId::parse(&launch_id) else {
                return Err(format!("invalid launch id '{launch_id}'").into());
            };
            let result = correlator::correlate(
                &index,
                &id,
                chrono::Local::now(),
                WindowKind::Correlate,
                StrictMode::Strict,
            );
            print_json(&serde_json::json!({
                "summary": result.summary,
                "timeline": result.timeline.iter().map(|l| l.formatted()).collect::<Vec<_>>(),
                "errors_only": result.errors_only.iter().map(|l| l.formatted()).collect::<Vec<_>>(),
                "silent_streams": result.silent_streams,
            }))
        }
        LogsAction::Summary { since } => {
            let Some(duration) = correlator::parse_since_duration(&since) else {
                return Err(format!("invalid duration '{since}'").into());
            };
            let rows = correlator::summarize(&index, duration, chrono::Utc::now());
            print_json(&rows)
        }
    }
}
