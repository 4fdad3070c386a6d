#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::Command;
use tempfile::TempDir;

/// An isolated Orchestrator base directory plus a config file pointing at
/// it, for use by a subprocess invocation of `orchestratorctl`.
pub struct OrchestratorFixture {
    _dir: TempDir,
    base_dir: PathBuf,
    config_path: PathBuf,
}

impl OrchestratorFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let base_dir = dir.path().join("base");
        fs::create_dir_all(&base_dir).expect("create base dir");

        let config_path = dir.path().join("orchestrator.yaml");
        fs::write(
            &config_path,
            format!(
                "base_dir: {:?}\ntask_queue: test-queue\n",
                base_dir.display()
            ),
        )
        .expect("write config");

        Self {
            _dir: dir,
            base_dir,
            config_path,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Rewrites the fixture's config file with extra top-level YAML
    /// (e.g. a `toggles:` block) appended after `base_dir`/`task_queue`.
    pub fn set_toggles(&self, extra_yaml: &str) {
        fs::write(
            &self.config_path,
            format!(
                "base_dir: {:?}\ntask_queue: test-queue\n{extra_yaml}\n",
                self.base_dir.display()
            ),
        )
        .expect("rewrite config");
    }

    /// A ready-to-run `Command` for `orchestratorctl --config <fixture>`.
    /// Pins `TZ=UTC` so launch-identifier time-of-day resolution is
    /// deterministic regardless of the host's local timezone.
    pub fn command(&self) -> Command {
        let mut command = Command::cargo_bin("orchestratorctl").expect("locate binary");
        command.arg("--config").arg(&self.config_path);
        command.env("TZ", "UTC");
        command
    }
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("timed out waiting for {path:?} to exist");
}

#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Writes an executable shell script at `path`, creating parent
/// directories as needed.
pub fn write_stub(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create stub parent dir");
    }
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write stub");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).expect("stub metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod stub");
    }
}

/// Writes the standard `engine-wrapper` stub: succeeds on `ensure`,
/// `worker`, and `control-plane`, and answers `synapse vault-status`.
pub fn write_engine_wrapper_stub(base_dir: &Path) {
    write_stub(
        &base_dir.join("bin/engine_wrapper/engine-wrapper"),
        r#"case "$2 $3" in
  "synapse vault-status") echo '{"vault_state":"UNLOCKED"}' ;;
  *) exit 0 ;;
esac
"#,
    );
}

/// Writes the standard `profile-driver` stub: answers `ollama start`,
/// `seed <alias> <is_master>`, `launch <profile_id>`, and `stop <profile_id>`.
pub fn write_profile_driver_stub(base_dir: &Path) {
    write_stub(
        &base_dir.join("bin/profile_driver/profile-driver"),
        r#"case "$2" in
  ollama)
    echo '{"success":true,"pid":4321,"port":11434,"state":"RUNNING"}'
    ;;
  seed)
    alias_name=$3
    is_master=$4
    echo "{\"success\":true,\"data\":{\"uuid\":\"$alias_name-uuid\",\"alias\":\"$alias_name\",\"is_master\":$is_master,\"path\":\"/tmp/$alias_name\"}}"
    ;;
  launch)
    profile_id=$3
    echo "{\"success\":true,\"chrome_pid\":1234,\"debug_port\":9222,\"extension_loaded\":true,\"effective_config\":null,\"profile_id\":\"$profile_id\"}"
    ;;
  stop)
    echo '{"success":true}'
    ;;
  *)
    echo '{"success":false,"error":"unknown command"}'
    exit 1
    ;;
esac
"#,
    );
}
