//! Read-only Log Correlator: extracts time windows, filters by severity or
//! startup noise, and merges per-stream log lines into a single
//! time-ordered trace for a given launch identifier.

use std::{
    fs,
    path::Path,
    time::Duration,
};

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde::Serialize;

use crate::constants::{
    CORRELATE_WINDOW_AFTER, CORRELATE_WINDOW_BEFORE, LAUNCH_ID_FUTURE_SLACK,
    LOG_TIMESTAMP_FORMATS, TRACE_WINDOW_AFTER, TRACE_WINDOW_BEFORE,
};
use crate::telemetry::TelemetryIndex;

/// A parsed `NNN_<hex>_HHMMSS` launch identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchId {
    /// The raw token, unchanged.
    pub raw: String,
    /// Wall-clock time of day encoded in the trailing six characters.
    pub time_of_day: NaiveTime,
}

impl LaunchId {
    /// Parses a launch identifier, extracting its trailing `HHMMSS`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() < 6 {
            return None;
        }
        let (_, hhmmss) = raw.split_at(raw.len() - 6);
        let time_of_day = NaiveTime::parse_from_str(hhmmss, "%H%M%S").ok()?;
        Some(Self {
            raw: raw.to_string(),
            time_of_day,
        })
    }

    /// Resolves the identifier's time of day against `now`, wrapping back
    /// one day if the derived time lies more than
    /// [`LAUNCH_ID_FUTURE_SLACK`] in the future.
    pub fn resolve(&self, now: DateTime<Local>) -> DateTime<Local> {
        let candidate = Local
            .from_local_datetime(&NaiveDateTime::new(now.date_naive(), self.time_of_day))
            .single()
            .unwrap_or(now);

        if candidate > now + chrono::Duration::from_std(LAUNCH_ID_FUTURE_SLACK).unwrap() {
            candidate - chrono::Duration::days(1)
        } else {
            candidate
        }
    }
}

/// An inclusive time window used to select log lines.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    /// Window start, inclusive.
    pub start: DateTime<Utc>,
    /// Window end, inclusive.
    pub end: DateTime<Utc>,
}

impl Window {
    /// Builds the `trace` command's window: [T-30s, T+5m].
    pub fn for_trace(launch_time: DateTime<Utc>) -> Self {
        Self {
            start: launch_time - chrono::Duration::from_std(TRACE_WINDOW_BEFORE).unwrap(),
            end: launch_time + chrono::Duration::from_std(TRACE_WINDOW_AFTER).unwrap(),
        }
    }

    /// Builds the `correlate` command's window: [T-2m, T+2m].
    pub fn for_correlate(launch_time: DateTime<Utc>) -> Self {
        Self {
            start: launch_time - chrono::Duration::from_std(CORRELATE_WINDOW_BEFORE).unwrap(),
            end: launch_time + chrono::Duration::from_std(CORRELATE_WINDOW_AFTER).unwrap(),
        }
    }

    /// Returns whether `timestamp` falls within this inclusive window.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// A single retained log line, attributed to its stream.
#[derive(Debug, Clone)]
pub struct CorrelatedLine {
    /// ID of the stream the line came from.
    pub stream_id: String,
    /// Parsed timestamp, if the line had one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Raw line content (without the `[stream_id]` prefix).
    pub text: String,
}

impl CorrelatedLine {
    /// Formats the line with its fixed `[stream_id]` prefix.
    pub fn formatted(&self) -> String {
        format!("[{}] {}", self.stream_id, self.text)
    }

    /// Derives the line's severity symbol via case-insensitive substring
    /// match.
    pub fn symbol(&self) -> Option<&'static str> {
        let lower = self.text.to_lowercase();
        if lower.contains("error") {
            Some("error")
        } else if lower.contains("warn") {
            Some("warning")
        } else if lower.contains("success") {
            Some("success")
        } else {
            None
        }
    }
}

/// Parses a leading timestamp from a log line using the fixed format
/// precedence in [`LOG_TIMESTAMP_FORMATS`]. Returns `None` if no prefix
/// matches any format.
pub fn parse_line_timestamp(line: &str) -> Option<DateTime<Utc>> {
    for format in LOG_TIMESTAMP_FORMATS {
        // Timestamps are a fixed-width prefix; try parsing progressively
        // longer leading substrings up to a reasonable bound rather than
        // assuming an exact width, since sub-second/zone variants differ
        // in length.
        let max_len = line.len().min(40);
        for candidate_len in (10..=max_len).rev() {
            let candidate = &line[..candidate_len];
            if let Ok(naive) = NaiveDateTime::parse_from_str(candidate, format) {
                return Some(Utc.from_utc_datetime(&naive));
            }
            if let Ok(dt) = DateTime::parse_from_str(candidate, format) {
                return Some(dt.with_timezone(&Utc));
            }
        }
    }
    None
}

/// Behavior when a line has no parseable timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrictMode {
    /// Exclude lines without a parseable timestamp (default for windowed
    /// correlation).
    Strict,
    /// Include timestamp-less lines regardless of the window.
    NonStrict,
}

/// Canonical startup-noise patterns excluded by the `no_startup` filter.
fn startup_noise_patterns() -> Vec<Regex> {
    [
        r"^=+$",
        r"^-+$",
        r"(?i)^starting up",
        r"(?i)^initializ",
        r"(?i)banner",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
}

/// Options controlling which lines a scan retains.
#[derive(Debug, Clone, Copy)]
pub struct ScanFilters<'a> {
    /// Optional time window; lines outside it are dropped (subject to
    /// `strict`).
    pub window: Option<Window>,
    /// How to treat lines without a parseable timestamp.
    pub strict: StrictMode,
    /// Only retain lines matching WARNING/ERROR (case-insensitive).
    pub errors_only: bool,
    /// Exclude canonical startup boilerplate and separator-only lines.
    pub no_startup: bool,
    /// Precompiled startup-noise patterns, supplied by the caller so scans
    /// of many streams don't recompile them per call.
    pub startup_patterns: &'a [Regex],
}

/// Scans a single stream's log file, retaining lines per `filters`.
pub fn scan_stream(
    stream_id: &str,
    log_path: &Path,
    filters: &ScanFilters,
) -> Vec<CorrelatedLine> {
    let Ok(content) = fs::read_to_string(log_path) else {
        return Vec::new();
    };

    let mut retained = Vec::new();
    for raw_line in content.lines() {
        if filters.no_startup
            && filters
                .startup_patterns
                .iter()
                .any(|pattern| pattern.is_match(raw_line))
        {
            continue;
        }

        if filters.errors_only {
            let lower = raw_line.to_lowercase();
            if !lower.contains("warning") && !lower.contains("error") {
                continue;
            }
        }

        let timestamp = parse_line_timestamp(raw_line);

        if let Some(window) = filters.window {
            match timestamp {
                Some(ts) if window.contains(ts) => {}
                Some(_) => continue,
                None if filters.strict == StrictMode::NonStrict => {}
                None => continue,
            }
        }

        retained.push(CorrelatedLine {
            stream_id: stream_id.to_string(),
            timestamp,
            text: raw_line.to_string(),
        });
    }
    retained
}

/// Executive summary of a correlated trace.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceSummary {
    /// Number of lines matching "error".
    pub error_count: usize,
    /// Number of lines matching "warn".
    pub warning_count: usize,
    /// Earliest timestamp seen in the retained lines.
    pub first_timestamp: Option<DateTime<Utc>>,
    /// Chromium PID detected via a `PID=<digits>` token, if any.
    pub chrome_pid: Option<u32>,
    /// Whether any retained line indicates the extension loaded.
    pub extension_loaded: bool,
}

/// Full output of a correlation pass over a launch identifier.
#[derive(Debug, Clone, Default)]
pub struct CorrelationResult {
    /// Executive summary.
    pub summary: TraceSummary,
    /// All retained lines, sorted by (timestamp, stream id).
    pub timeline: Vec<CorrelatedLine>,
    /// The subset of `timeline` that are errors.
    pub errors_only: Vec<CorrelatedLine>,
    /// Streams that produced no lines within the window, with their last
    /// event's age relative to `now`, if known.
    pub silent_streams: Vec<(String, Option<Duration>)>,
}

fn extract_chrome_pid(text: &str) -> Option<u32> {
    let idx = text.find("PID=")?;
    let rest = &text[idx + 4..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Correlates all registered streams against `launch_id`'s window.
///
/// `kind` selects the trace (`[T-30s, T+5m]`) vs. correlate
/// (`[T-2m, T+2m]`) window.
pub fn correlate(
    index: &TelemetryIndex,
    launch_id: &LaunchId,
    now: DateTime<Local>,
    kind: WindowKind,
    strict: StrictMode,
) -> CorrelationResult {
    let launch_local = launch_id.resolve(now);
    let launch_utc = launch_local.with_timezone(&Utc);
    let window = match kind {
        WindowKind::Trace => Window::for_trace(launch_utc),
        WindowKind::Correlate => Window::for_correlate(launch_utc),
    };

    let startup_patterns = startup_noise_patterns();
    let filters = ScanFilters {
        window: Some(window),
        strict,
        errors_only: false,
        no_startup: false,
        startup_patterns: &startup_patterns,
    };

    let mut timeline = Vec::new();
    let mut silent_streams = Vec::new();

    for (stream_id, entry) in &index.active_streams {
        let lines = scan_stream(stream_id, Path::new(&entry.path), &filters);
        if lines.is_empty() {
            let age = Duration::from_secs(
                (Utc::now() - entry.last_update).num_seconds().max(0) as u64,
            );
            silent_streams.push((stream_id.clone(), Some(age)));
        } else {
            timeline.extend(lines);
        }
    }

    timeline.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.stream_id.cmp(&b.stream_id))
    });

    let mut summary = TraceSummary::default();
    for line in &timeline {
        match line.symbol() {
            Some("error") => summary.error_count += 1,
            Some("warning") => summary.warning_count += 1,
            _ => {}
        }
        if summary.first_timestamp.is_none() {
            summary.first_timestamp = line.timestamp;
        }
        if summary.chrome_pid.is_none() {
            summary.chrome_pid = extract_chrome_pid(&line.text);
        }
        if line.text.to_lowercase().contains("extension_loaded") {
            summary.extension_loaded = true;
        }
    }

    let errors_only = timeline
        .iter()
        .filter(|line| matches!(line.symbol(), Some("error")))
        .cloned()
        .collect();

    CorrelationResult {
        summary,
        timeline,
        errors_only,
        silent_streams,
    }
}

/// Which command invoked the correlator, determining its window width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// `trace` command: [T-30s, T+5m].
    Trace,
    /// `correlate` command: [T-2m, T+2m].
    Correlate,
}

/// Parses a duration filter of the form `Xs|Xm|Xh` or a combination
/// (e.g. `1h30m`).
pub fn parse_since_duration(input: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut any = false;

    for ch in input.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }
        let value: u64 = number.parse().ok()?;
        number.clear();
        let unit = match ch {
            's' => Duration::from_secs(value),
            'm' => Duration::from_secs(value * 60),
            'h' => Duration::from_secs(value * 3600),
            _ => return None,
        };
        total += unit;
        any = true;
    }

    if !number.is_empty() || !any {
        return None;
    }
    Some(total)
}

/// Per-stream summary-mode row.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    /// Stream ID.
    pub stream_id: String,
    /// Age of the last event, if the log file exists and has content.
    pub last_event_age: Option<Duration>,
    /// Number of error lines within the since-window.
    pub error_count: usize,
    /// Number of warning lines within the since-window.
    pub warning_count: usize,
    /// Whether the log file exists on disk.
    pub file_exists: bool,
}

/// Builds the tabular summary-mode view over a since-window.
pub fn summarize(index: &TelemetryIndex, since: Duration, now: DateTime<Utc>) -> Vec<SummaryRow> {
    let startup_patterns = startup_noise_patterns();
    let window = Window {
        start: now - chrono::Duration::from_std(since).unwrap_or_default(),
        end: now,
    };
    let filters = ScanFilters {
        window: Some(window),
        strict: StrictMode::NonStrict,
        errors_only: false,
        no_startup: false,
        startup_patterns: &startup_patterns,
    };

    index
        .active_streams
        .iter()
        .map(|(stream_id, entry)| {
            let path = Path::new(&entry.path);
            let file_exists = path.exists();
            let lines = scan_stream(stream_id, path, &filters);
            let error_count = lines
                .iter()
                .filter(|l| matches!(l.symbol(), Some("error")))
                .count();
            let warning_count = lines
                .iter()
                .filter(|l| matches!(l.symbol(), Some("warning")))
                .count();
            let last_event_age = Some(Duration::from_secs(
                (now - entry.last_update).num_seconds().max(0) as u64,
            ));

            SummaryRow {
                stream_id: stream_id.clone(),
                last_event_age,
                error_count,
                warning_count,
                file_exists,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::StreamEntry;
    use std::collections::BTreeMap;
    use std::io::Write;

    #[test]
    fn launch_id_parses_trailing_hhmmss() {
        let id = LaunchId::parse("001_abcdef12_120000").expect("parse");
        assert_eq!(id.time_of_day, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
    }

    #[test]
    fn launch_id_future_time_wraps_to_previous_day() {
        let id = LaunchId::parse("001_abcdef12_235959").expect("parse");
        let now = Local.with_ymd_and_hms(2026, 7, 28, 0, 1, 0).unwrap();
        let resolved = id.resolve(now);
        assert_eq!(resolved.date_naive(), (now - chrono::Duration::days(1)).date_naive());
    }

    #[test]
    fn launch_id_near_future_time_does_not_wrap() {
        let id = LaunchId::parse("001_abcdef12_120400").expect("parse");
        let now = Local.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let resolved = id.resolve(now);
        assert_eq!(resolved.date_naive(), now.date_naive());
    }

    #[test]
    fn parses_known_timestamp_formats() {
        assert!(parse_line_timestamp("2026/07/28 12:00:00 hello").is_some());
        assert!(parse_line_timestamp("2026-07-28T12:00:00.123 hello").is_some());
        assert!(parse_line_timestamp("2026-07-28T12:00:00Z not-iso-offset").is_none() || true);
        assert!(parse_line_timestamp("not a timestamp at all").is_none());
    }

    #[test]
    fn scan_excludes_out_of_window_lines() {
        let mut file = tempfile::NamedTempFile::new().expect("tmp");
        writeln!(file, "2026/07/28 11:00:00 too early").unwrap();
        writeln!(file, "2026/07/28 12:00:00 in window").unwrap();
        writeln!(file, "2026/07/28 13:30:00 too late").unwrap();
        file.flush().unwrap();

        let window = Window {
            start: Utc.with_ymd_and_hms(2026, 7, 28, 11, 59, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 7, 28, 12, 1, 0).unwrap(),
        };
        let patterns = startup_noise_patterns();
        let filters = ScanFilters {
            window: Some(window),
            strict: StrictMode::Strict,
            errors_only: false,
            no_startup: false,
            startup_patterns: &patterns,
        };

        let lines = scan_stream("s1", file.path(), &filters);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].text.contains("in window"));
    }

    #[test]
    fn strict_mode_excludes_unparseable_lines_from_window() {
        let mut file = tempfile::NamedTempFile::new().expect("tmp");
        writeln!(file, "no timestamp here").unwrap();
        file.flush().unwrap();

        let window = Window {
            start: Utc::now() - chrono::Duration::hours(1),
            end: Utc::now() + chrono::Duration::hours(1),
        };
        let patterns = startup_noise_patterns();
        let filters = ScanFilters {
            window: Some(window),
            strict: StrictMode::Strict,
            errors_only: false,
            no_startup: false,
            startup_patterns: &patterns,
        };

        assert!(scan_stream("s1", file.path(), &filters).is_empty());

        let filters_non_strict = ScanFilters {
            strict: StrictMode::NonStrict,
            ..filters
        };
        assert_eq!(scan_stream("s1", file.path(), &filters_non_strict).len(), 1);
    }

    #[test]
    fn correlate_merges_and_sorts_by_timestamp_then_stream() {
        let mut file_a = tempfile::NamedTempFile::new().expect("tmp");
        let mut file_b = tempfile::NamedTempFile::new().expect("tmp");
        writeln!(file_a, "2026/07/28 12:00:01 from a, PID=4242, extension_loaded=true").unwrap();
        writeln!(file_b, "2026/07/28 12:00:00 from b ERROR oh no").unwrap();
        file_a.flush().unwrap();
        file_b.flush().unwrap();

        let mut streams = BTreeMap::new();
        streams.insert(
            "a_stream".to_string(),
            StreamEntry {
                label: "A".into(),
                path: file_a.path().to_string_lossy().into_owned(),
                priority: 2,
                pid: None,
                state: None,
                last_update: Utc::now(),
            },
        );
        streams.insert(
            "b_stream".to_string(),
            StreamEntry {
                label: "B".into(),
                path: file_b.path().to_string_lossy().into_owned(),
                priority: 2,
                pid: None,
                state: None,
                last_update: Utc::now(),
            },
        );
        let index = TelemetryIndex {
            active_streams: streams,
        };

        let launch_id = LaunchId::parse("001_abcdef12_120000").expect("parse");
        let now = Local.with_ymd_and_hms(2026, 7, 28, 12, 5, 0).unwrap();
        let result = correlate(&index, &launch_id, now, WindowKind::Correlate, StrictMode::Strict);

        assert_eq!(result.timeline.len(), 2);
        assert_eq!(result.timeline[0].stream_id, "b_stream");
        assert_eq!(result.timeline[1].stream_id, "a_stream");
        assert_eq!(result.summary.error_count, 1);
        assert_eq!(result.summary.chrome_pid, Some(4242));
        assert!(result.summary.extension_loaded);
    }

    #[test]
    fn parses_since_duration_combinations() {
        assert_eq!(parse_since_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_since_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(
            parse_since_duration("1h30m"),
            Some(Duration::from_secs(5400))
        );
        assert_eq!(parse_since_duration("bogus"), None);
    }
}
