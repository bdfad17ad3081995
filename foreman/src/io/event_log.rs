//! Append-only JSONL event log (`.foreman/events.jsonl`).
//!
//! Appends take an exclusive advisory lock for their duration so concurrent
//! writers (the daemon and agent CLIs) never interleave partial lines.
//! Readers never lock; each record is written as one complete line.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use tracing::{debug, warn};

use crate::core::types::{Event, EventKind};

/// Conjunctive filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub agent: Option<String>,
    pub task: Option<String>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        self.kind.is_none_or(|kind| event.kind == kind)
            && self
                .agent
                .as_deref()
                .is_none_or(|agent| event.agent.as_deref() == Some(agent))
            && self
                .task
                .as_deref()
                .is_none_or(|task| event.task.as_deref() == Some(task))
            && self.since.is_none_or(|since| event.at >= since)
            && self.until.is_none_or(|until| event.at < until)
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &Event) -> Result<()> {
        self.append_all(std::slice::from_ref(event))
    }

    /// Append `events` in order under a single lock acquisition.
    pub fn append_all(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for event in events {
            buf.push_str(&serde_json::to_string(event).context("serialize event")?);
            buf.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open event log {}", self.path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("lock event log {}", self.path.display()))?;
        // A writer that died mid-append leaves an unterminated line; start
        // on a fresh one so this batch is not glued onto it.
        if !ends_with_newline(&mut file)
            .with_context(|| format!("inspect tail of {}", self.path.display()))?
        {
            buf.insert(0, '\n');
        }
        file.write_all(buf.as_bytes())
            .with_context(|| format!("append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("flush {}", self.path.display()))?;
        // Closing the handle releases the lock.
        drop(file);

        debug!(count = events.len(), "events appended");
        Ok(())
    }

    /// Every well-formed event in insertion order. Malformed lines, including
    /// ones that are not valid UTF-8, are skipped.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", self.path.display()));
            }
        };

        let mut events = Vec::new();
        for (idx, line) in contents.split(|byte| *byte == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Event>(line) {
                Ok(event) => events.push(event),
                Err(err) => warn!(line = idx + 1, err = %err, "skipping malformed event"),
            }
        }
        Ok(events)
    }

    pub fn query(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect())
    }

    /// The most recent `n` events (all of them when fewer exist), oldest first.
    pub fn last(&self, n: usize) -> Result<Vec<Event>> {
        let mut events = self.read_all()?;
        let skip = events.len().saturating_sub(n);
        Ok(events.split_off(skip))
    }

    /// Sum of every `cost` payload in the log.
    pub fn total_cost(&self) -> Result<f64> {
        Ok(total_cost(&self.read_all()?))
    }
}

pub fn total_cost(events: &[Event]) -> f64 {
    events.iter().filter_map(Event::cost).sum()
}

/// True for an empty file or one whose last byte is `\n`.
fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    fn log() -> (tempfile::TempDir, EventLog) {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::new(temp.path().join("events.jsonl"));
        (temp, log)
    }

    #[test]
    fn empty_log_reads_as_empty() {
        let (_temp, log) = log();
        assert!(log.read_all().expect("read").is_empty());
        assert!(log.last(5).expect("last").is_empty());
        assert_eq!(log.total_cost().expect("cost"), 0.0);
    }

    #[test]
    fn appended_events_read_back_identically() {
        let (_temp, log) = log();
        let events = vec![
            Event::new(EventKind::TaskCreated).task("task-0001"),
            Event::new(EventKind::AgentSpawned)
                .agent("worker-1")
                .task("task-0001")
                .data(json!({ "branch": "foreman/task-0001" })),
        ];
        log.append_all(&events).expect("append");
        assert_eq!(log.read_all().expect("read"), events);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let (_temp, log) = log();
        log.append(&Event::new(EventKind::DaemonStarted)).expect("append");
        let mut file = OpenOptions::new().append(true).open(log.path()).expect("open");
        file.write_all(b"{\"half\":\n").expect("write");
        drop(file);
        log.append(&Event::new(EventKind::DaemonStopped)).expect("append");

        let kinds: Vec<EventKind> = log.read_all().expect("read").iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::DaemonStarted, EventKind::DaemonStopped]);
    }

    #[test]
    fn invalid_utf8_line_is_skipped() {
        let (_temp, log) = log();
        log.append(&Event::new(EventKind::Usage).data(json!({ "cost": 1.0 })))
            .expect("append");
        let mut file = OpenOptions::new().append(true).open(log.path()).expect("open");
        file.write_all(b"\xff\xfe garbage\n").expect("write");
        drop(file);
        log.append(&Event::new(EventKind::Usage).data(json!({ "cost": 2.0 })))
            .expect("append");

        assert_eq!(log.read_all().expect("read").len(), 2);
        assert_eq!(log.total_cost().expect("cost"), 3.0);
    }

    #[test]
    fn append_after_torn_write_starts_a_new_line() {
        let (_temp, log) = log();
        log.append(&Event::new(EventKind::DaemonStarted)).expect("append");
        let mut file = OpenOptions::new().append(true).open(log.path()).expect("open");
        file.write_all(br#"{"at":"2026-01-01T00:00:00Z","kind":"usage""#)
            .expect("write");
        drop(file);
        log.append(&Event::new(EventKind::DaemonStopped)).expect("append");

        let kinds: Vec<EventKind> = log.read_all().expect("read").iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::DaemonStarted, EventKind::DaemonStopped]);
        let raw = fs::read_to_string(log.path()).expect("read raw");
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn last_n_never_errors_past_length() {
        let (_temp, log) = log();
        for task in ["a", "b", "c"] {
            log.append(&Event::new(EventKind::TaskCreated).task(task)).expect("append");
        }
        let tasks = |events: Vec<Event>| -> Vec<String> {
            events.into_iter().filter_map(|e| e.task).collect()
        };
        assert_eq!(tasks(log.last(2).expect("last")), vec!["b", "c"]);
        assert_eq!(tasks(log.last(10).expect("last")), vec!["a", "b", "c"]);
        assert!(log.last(0).expect("last").is_empty());
    }

    #[test]
    fn filters_combine() {
        let (_temp, log) = log();
        log.append_all(&[
            Event::new(EventKind::TaskAssigned).agent("worker-1").task("t1"),
            Event::new(EventKind::TaskAssigned).agent("worker-2").task("t2"),
            Event::new(EventKind::AgentDied).agent("worker-1"),
        ])
        .expect("append");

        let filter = EventFilter {
            kind: Some(EventKind::TaskAssigned),
            agent: Some("worker-1".into()),
            ..EventFilter::default()
        };
        let hits = log.query(&filter).expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].task.as_deref(), Some("t1"));

        let future = EventFilter {
            since: Some(Utc::now() + chrono::Duration::hours(1)),
            ..EventFilter::default()
        };
        assert!(log.query(&future).expect("query").is_empty());
    }

    #[test]
    fn total_cost_sums_cost_payloads_only() {
        let (_temp, log) = log();
        log.append_all(&[
            Event::new(EventKind::Usage).data(json!({ "cost": 1.5 })),
            Event::new(EventKind::Usage).data(json!({ "cost": 2 })),
            Event::new(EventKind::Usage).data(json!({ "tokens": 100 })),
            Event::new(EventKind::TaskDone),
        ])
        .expect("append");
        assert_eq!(log.total_cost().expect("cost"), 3.5);
    }

    #[test]
    fn concurrent_appends_never_interleave() {
        let (_temp, log) = log();
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let log = log.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let event = Event::new(EventKind::Usage)
                            .agent(format!("worker-{n}"))
                            .data(json!({ "cost": 0.0, "i": i, "pad": "x".repeat(512) }));
                        log.append(&event).expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(log.read_all().expect("read").len(), 200);
    }
}
