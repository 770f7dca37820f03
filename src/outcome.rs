//! Per-item outcomes and the run log.

use crate::error::TrackerError;
use chrono::{DateTime, Local};
use log::Level;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Width the item column of the summary table is padded to.
pub const SUMMARY_WIDTH: usize = 50;

/// Status of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunResult {
    Pending,
    InProgress,
    Succeeded,
    Skipped,
    Failed(String),
}

impl RunResult {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunResult::Succeeded | RunResult::Skipped | RunResult::Failed(_)
        )
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunResult::Pending => f.write_str("Pending"),
            RunResult::InProgress => f.write_str("In progress"),
            RunResult::Succeeded => f.write_str("Succeeded"),
            RunResult::Skipped => f.write_str("Skipped"),
            RunResult::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// One line of the run log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub item: Option<String>,
    pub event: String,
    pub detail: Option<String>,
}

impl LogEntry {
    pub fn new(level: Level, item: Option<&str>, event: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            item: item.map(str::to_string),
            event: event.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// The message part of the line, without timestamp and level.
    pub fn message(&self) -> String {
        let mut message = match &self.item {
            Some(item) => format!("[{}] {}", item, self.event),
            None => self.event.clone(),
        };
        if let Some(detail) = &self.detail {
            message.push_str(": ");
            message.push_str(detail);
        }
        message
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.level,
            self.message()
        )
    }
}

/// Append-only destination for log entries.
pub trait LogSink: Send {
    fn append(&mut self, entry: &LogEntry) -> io::Result<()>;

    /// File backing this sink, if any
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// One log file per run, inside an existing directory.
pub struct FileLogSink {
    path: PathBuf,
    writer: LineWriter<File>,
}

impl FileLogSink {
    /// Create `<dd-mm-yy HH-MM-SS>.log` in `dir`. The directory is not
    /// created here.
    pub fn create(dir: &Path) -> io::Result<Self> {
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("log directory {} does not exist", dir.display()),
            ));
        }

        let name = Local::now().format("%d-%m-%y %H-%M-%S.log").to_string();
        let path = dir.join(name);
        let file = File::options().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: LineWriter::new(file),
        })
    }
}

impl LogSink for FileLogSink {
    fn append(&mut self, entry: &LogEntry) -> io::Result<()> {
        writeln!(self.writer, "{}", entry)
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// In-memory sink. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogSink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().iter().map(LogEntry::message).collect()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&mut self, entry: &LogEntry) -> io::Result<()> {
        self.entries
            .lock()
            .map_err(|_| io::Error::other("log buffer poisoned"))?
            .push(entry.clone());
        Ok(())
    }
}

/// Terminal counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

/// Item id → status, in the order items were first seen.
pub struct OutcomeTracker {
    order: Vec<(String, RunResult)>,
    index: HashMap<String, usize>,
    sink: Box<dyn LogSink>,
}

impl fmt::Debug for OutcomeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutcomeTracker")
            .field("outcomes", &self.order)
            .field("log_path", &self.log_path())
            .finish()
    }
}

impl OutcomeTracker {
    pub fn new(sink: Box<dyn LogSink>) -> Self {
        Self {
            order: Vec::new(),
            index: HashMap::new(),
            sink,
        }
    }

    /// Current status of an item; `Pending` when never seen.
    pub fn status(&self, item: &str) -> RunResult {
        self.index
            .get(item)
            .map(|&i| self.order[i].1.clone())
            .unwrap_or(RunResult::Pending)
    }

    /// Pending → InProgress.
    pub fn begin(&mut self, item: &str) -> Result<(), TrackerError> {
        match self.index.get(item) {
            Some(&i) => {
                if self.order[i].1.is_terminal() {
                    return Err(TrackerError::AlreadyRecorded(item.to_string()));
                }
                self.order[i].1 = RunResult::InProgress;
            }
            None => {
                self.index.insert(item.to_string(), self.order.len());
                self.order.push((item.to_string(), RunResult::InProgress));
            }
        }

        self.note(Level::Info, Some(item), "started", None);
        Ok(())
    }

    /// Set the one terminal result of an item. Anything but `Skipped` needs
    /// a prior [`begin`](Self::begin).
    pub fn record(&mut self, item: &str, result: RunResult) -> Result<(), TrackerError> {
        if !result.is_terminal() {
            return Err(TrackerError::NotTerminal {
                item: item.to_string(),
                result: result.to_string(),
            });
        }

        match self.index.get(item) {
            Some(&i) if self.order[i].1.is_terminal() => {
                return Err(TrackerError::AlreadyRecorded(item.to_string()));
            }
            Some(&i) => self.order[i].1 = result.clone(),
            None if result != RunResult::Skipped => {
                return Err(TrackerError::NotStarted {
                    item: item.to_string(),
                    result: result.to_string(),
                });
            }
            None => {
                self.index.insert(item.to_string(), self.order.len());
                self.order.push((item.to_string(), result.clone()));
            }
        }

        match &result {
            RunResult::Failed(reason) => {
                self.note(Level::Error, Some(item), "failed", Some(reason.as_str()))
            }
            other => self.note(Level::Info, Some(item), &other.to_string().to_lowercase(), None),
        }
        Ok(())
    }

    /// Append a log entry. Sink failures are reported but never stop a run.
    pub fn note(&mut self, level: Level, item: Option<&str>, event: &str, detail: Option<&str>) {
        let mut entry = LogEntry::new(level, item, event);
        entry.detail = detail.map(str::to_string);

        if let Err(e) = self.sink.append(&entry) {
            log::warn!("Failed to write run log entry: {}", e);
        }
    }

    /// Recorded items and their terminal results, in processing order.
    pub fn summary(&self) -> Vec<(String, RunResult)> {
        self.order
            .iter()
            .filter(|(_, result)| result.is_terminal())
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for (_, result) in &self.order {
            match result {
                RunResult::Succeeded => counts.succeeded += 1,
                RunResult::Skipped => counts.skipped += 1,
                RunResult::Failed(_) => counts.failed += 1,
                _ => {}
            }
        }
        counts
    }

    pub fn any_failed(&self) -> bool {
        self.counts().failed > 0
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.sink.path()
    }

    /// Fixed-width summary table, one row per recorded item.
    pub fn summary_table(&self) -> String {
        let mut table = String::new();
        table.push_str(&format!("{:<width$} Result\n", "Item", width = SUMMARY_WIDTH));
        table.push_str(&format!("{}\n", "-".repeat(SUMMARY_WIDTH + 7)));
        for (item, result) in self.summary() {
            table.push_str(&format!("{:<width$} {}\n", item, result, width = SUMMARY_WIDTH));
        }

        let counts = self.counts();
        table.push_str(&format!(
            "\n{} succeeded, {} skipped, {} failed\n",
            counts.succeeded, counts.skipped, counts.failed
        ));
        table
    }

    /// Machine-readable summary for `--summary-json`.
    pub fn summary_json(&self) -> serde_json::Value {
        let items: Vec<serde_json::Value> = self
            .summary()
            .into_iter()
            .map(|(item, result)| serde_json::json!({ "item": item, "result": result }))
            .collect();

        serde_json::json!({
            "items": items,
            "counts": self.counts(),
            "log_path": self.log_path().map(|p| p.display().to_string()),
        })
    }
}
