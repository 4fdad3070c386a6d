//! The Telemetry Index: a single shared mapping file (`telemetry.json`)
//! under the logs root, listing every registered log stream.
//!
//! Every mutation takes an advisory file lock, reads the current document
//! (or an empty one), mutates the `active_streams` submap, serializes
//! with stable key order, writes to a sibling temp file, and atomically
//! renames over the target. Readers never lock.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::constants::{TELEMETRY_LOCK_BACKOFF_MS, TELEMETRY_LOCK_SUFFIX};
use crate::error::TelemetryError;
use crate::runtime;

/// Priority of a registered stream.
pub type Priority = u8;

/// One entry in the Telemetry Index's `active_streams` map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEntry {
    /// Human-readable label for the stream.
    pub label: String,
    /// Absolute path to the stream's log file.
    pub path: String,
    /// Priority in {1, 2, 3}.
    pub priority: Priority,
    /// PID attributed to the stream, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Last known lifecycle state attributed to the stream, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// ISO-8601 UTC timestamp of the last update to this entry.
    pub last_update: DateTime<Utc>,
}

/// The on-disk shape of `telemetry.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryIndex {
    /// Stream ID -> entry, in stable (sorted) key order via `BTreeMap`.
    pub active_streams: BTreeMap<String, StreamEntry>,
}

impl TelemetryIndex {
    /// Reads and parses the index file at `path`, tolerating transient
    /// absence by returning an empty document. Readers never lock.
    pub fn read(path: &Path) -> Result<Self, TelemetryError> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(TelemetryIndex::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Reads the Telemetry Index at the Orchestrator's configured path.
    pub fn read_default() -> Result<Self, TelemetryError> {
        Self::read(&runtime::telemetry_index_path())
    }
}

/// Registers (or refreshes) a stream entry, returning the index's new
/// state. Registration is idempotent: re-registering identical metadata is
/// a no-op apart from touching `last_update`.
///
/// Takes the advisory lock with up to [`crate::constants::TELEMETRY_LOCK_MAX_RETRIES`]
/// retries at the back-off schedule in [`TELEMETRY_LOCK_BACKOFF_MS`]. On
/// exhaustion returns [`TelemetryError::LockUnavailable`]; the caller logs
/// this and treats it as non-fatal.
pub fn register_stream(
    stream_id: &str,
    label: &str,
    path: &str,
    priority: Priority,
    pid: Option<u32>,
    state: Option<String>,
) -> Result<TelemetryIndex, TelemetryError> {
    mutate(move |index| {
        let now = Utc::now();
        let changed_metadata = match index.active_streams.get(stream_id) {
            Some(existing) => {
                existing.label != label || existing.path != path || existing.priority != priority
            }
            None => true,
        };

        let entry = index
            .active_streams
            .entry(stream_id.to_string())
            .or_insert_with(|| StreamEntry {
                label: label.to_string(),
                path: path.to_string(),
                priority,
                pid,
                state: state.clone(),
                last_update: now,
            });

        if changed_metadata {
            entry.label = label.to_string();
            entry.path = path.to_string();
            entry.priority = priority;
        }
        if pid.is_some() {
            entry.pid = pid;
        }
        if state.is_some() {
            entry.state = state.clone();
        }
        // `last_update` is monotonic per key within a process run: never
        // move it backwards.
        if now >= entry.last_update {
            entry.last_update = now;
        }
    })
}

/// Updates just the `pid`/`state` fields of an already-registered stream,
/// touching `last_update`. Used by the Process Supervisor after every
/// managed-process transition.
pub fn update_stream_state(
    stream_id: &str,
    pid: Option<u32>,
    state: &str,
) -> Result<TelemetryIndex, TelemetryError> {
    mutate(move |index| {
        if let Some(entry) = index.active_streams.get_mut(stream_id) {
            entry.pid = pid;
            entry.state = Some(state.to_string());
            entry.last_update = Utc::now();
        }
    })
}

/// Applies `mutator` to the Telemetry Index under the advisory lock and
/// commits the result via read-modify-atomic-rename.
fn mutate(mutator: impl FnOnce(&mut TelemetryIndex)) -> Result<TelemetryIndex, TelemetryError> {
    let target = runtime::telemetry_index_path();
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let lock_path = lock_path_for(&target);
    let lock_file = acquire_lock(&lock_path)?;

    let mut index = TelemetryIndex::read(&target)?;
    mutator(&mut index);

    let serialized = serde_json::to_vec_pretty(&index)?;
    write_atomically(&target, &serialized)?;

    // The lock file is released when `lock_file` drops at the end of this
    // function; flock is advisory and scoped to the fd.
    drop(lock_file);
    Ok(index)
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut path = target.as_os_str().to_owned();
    path.push(TELEMETRY_LOCK_SUFFIX);
    PathBuf::from(path)
}

fn acquire_lock(lock_path: &Path) -> Result<File, TelemetryError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?;

    for backoff_ms in TELEMETRY_LOCK_BACKOFF_MS {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(file),
            Err(_) => thread::sleep(Duration::from_millis(backoff_ms)),
        }
    }

    // One final attempt after the last backoff interval; if the lock is
    // still held, surface it as unavailable rather than retry forever.
    file.try_lock_exclusive()
        .map(|()| file)
        .map_err(|_| TelemetryError::LockUnavailable)
}

/// Writes `contents` to a sibling temp file and renames it over `target`.
/// Rename is the only observable commit.
fn write_atomically(target: &Path, contents: &[u8]) -> Result<(), TelemetryError> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp_path = parent.join(format!(
        ".{}.tmp",
        target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("telemetry")
    ));

    // Guard against concurrent writers racing on the same temp name by
    // making it unique per-process; the lock already serializes writers
    // within this process, but defends a crashed-and-restarted peer too.
    tmp_path.set_extension(format!("tmp.{}", std::process::id()));

    {
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(contents)?;
        tmp_file.sync_all()?;
    }

    fs::rename(&tmp_path, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::set_base_dir;
    use std::thread;
    use tempfile::tempdir;

    fn setup() -> tempfile::TempDir {
        let dir = tempdir().expect("tempdir");
        set_base_dir(dir.path().to_path_buf());
        dir
    }

    #[test]
    fn register_then_read_round_trips() {
        let _dir = setup();
        register_stream(
            "temporal_server",
            "Workflow Engine",
            "/logs/temporal_server.log",
            1,
            Some(1234),
            Some("READY".to_string()),
        )
        .expect("register");

        let index = TelemetryIndex::read_default().expect("read");
        let entry = index.active_streams.get("temporal_server").expect("entry");
        assert_eq!(entry.priority, 1);
        assert_eq!(entry.pid, Some(1234));
        assert_eq!(entry.state.as_deref(), Some("READY"));
    }

    #[test]
    fn reregistering_identical_metadata_is_idempotent_but_touches_last_update() {
        let _dir = setup();
        register_stream("worker_manager", "Worker", "/logs/worker.log", 2, None, None)
            .expect("first register");
        let first = TelemetryIndex::read_default().expect("read");
        let first_update = first.active_streams["worker_manager"].last_update;

        thread::sleep(Duration::from_millis(5));
        register_stream("worker_manager", "Worker", "/logs/worker.log", 2, None, None)
            .expect("second register");
        let second = TelemetryIndex::read_default().expect("read");

        assert_eq!(second.active_streams.len(), 1);
        assert!(second.active_streams["worker_manager"].last_update >= first_update);
    }

    #[test]
    fn reading_absent_index_yields_empty_document() {
        let _dir = setup();
        let index = TelemetryIndex::read_default().expect("read");
        assert!(index.active_streams.is_empty());
    }

    #[test]
    fn concurrent_registrations_of_distinct_streams_both_persist() {
        let dir = setup();
        let base = dir.path().to_path_buf();

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let base = base.clone();
                thread::spawn(move || {
                    set_base_dir(base);
                    register_stream(
                        &format!("stream_{i}"),
                        "label",
                        &format!("/logs/stream_{i}.log"),
                        2,
                        None,
                        None,
                    )
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("thread join").expect("register");
        }

        let index = TelemetryIndex::read_default().expect("read");
        assert!(index.active_streams.contains_key("stream_0"));
        assert!(index.active_streams.contains_key("stream_1"));
    }

    #[test]
    fn update_state_refreshes_existing_entry() {
        let _dir = setup();
        register_stream("ollama", "LLM Runtime", "/logs/ollama.log", 3, None, None)
            .expect("register");
        update_stream_state("ollama", Some(42), "FAILED").expect("update");

        let index = TelemetryIndex::read_default().expect("read");
        let entry = &index.active_streams["ollama"];
        assert_eq!(entry.pid, Some(42));
        assert_eq!(entry.state.as_deref(), Some("FAILED"));
    }
}
