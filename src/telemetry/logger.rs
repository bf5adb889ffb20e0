//! # Telemetry Logger
//!
//! Capacity-bounded, insertion-ordered log of decoded packets, mirrored to a
//! text file.
//!
//! ## File format
//!
//! One entry per line:
//!
//! ```text
//! [2024-05-01 12:00:03] ID1=123, ID2=321, LAT=40.376123, LON=49.850848, VBAT=3420
//! ```
//!
//! New entries are appended. Once `max_entries` entries have been evicted
//! since the last rewrite, the file is rewritten from memory instead, so it
//! never holds more than twice the capacity. Clearing truncates the file, and
//! a force-save rewrites it from memory. On load only the newest
//! `max_entries` lines are kept and the file is rewritten if older lines were
//! dropped.

use chrono::{Datelike, Local};
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Years before this mean the clock was never set
const MIN_VALID_YEAR: i32 = 2000;

/// Timestamp format for log entries
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One activity log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub data: String,
}

impl LogEntry {
    /// Parse a `[timestamp] data` line
    ///
    /// # Examples
    ///
    /// ```
    /// use loko_gateway::telemetry::logger::LogEntry;
    ///
    /// let entry = LogEntry::parse("[LOG-1] ID1=1, ID2=2").unwrap();
    /// assert_eq!(entry.timestamp, "LOG-1");
    /// assert_eq!(entry.data, "ID1=1, ID2=2");
    /// assert!(LogEntry::parse("no brackets").is_none());
    /// ```
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim_end().strip_prefix('[')?;
        let (timestamp, data) = rest.split_once(']')?;
        Some(Self {
            timestamp: timestamp.to_string(),
            data: data.trim().to_string(),
        })
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp, self.data)
    }
}

/// Bounded activity log
#[derive(Debug)]
pub struct TelemetryLog {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    path: Option<PathBuf>,
    /// Counter for timestamps when the wall clock is unset
    synthetic_seq: u64,
    /// Evicted entries still present in the backing file
    stale_lines: usize,
}

impl TelemetryLog {
    /// Create an empty log
    ///
    /// # Arguments
    ///
    /// * `max_entries` - Capacity, at least 1
    /// * `path` - Backing file, `None` for a memory-only log
    pub fn new(max_entries: usize, path: Option<PathBuf>) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
            path,
            synthetic_seq: 0,
            stale_lines: 0,
        }
    }

    /// Create a log backed by `path` and restore its newest entries
    ///
    /// A missing or unreadable file yields an empty log.
    pub fn open<P: AsRef<Path>>(max_entries: usize, path: P) -> Self {
        let mut log = Self::new(max_entries, Some(path.as_ref().to_path_buf()));
        match log.load() {
            Ok(count) => info!("Restored {} log entries from {}", count, path.as_ref().display()),
            Err(e) => info!("No existing log file found or couldn't read it: {}", e),
        }
        log
    }

    /// Reload entries from the backing file
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of entries restored
    pub fn load(&mut self) -> Result<usize> {
        self.entries.clear();
        self.stale_lines = 0;
        let Some(path) = &self.path else {
            return Ok(0);
        };

        let contents = fs::read_to_string(path)?;
        let lines: Vec<&str> = contents.lines().filter(|line| !line.trim().is_empty()).collect();
        let dropped = lines.len().saturating_sub(self.max_entries);

        for line in &lines[dropped..] {
            match LogEntry::parse(line) {
                Some(entry) => self.entries.push_back(entry),
                None => warn!("Couldn't parse log line: {}", line),
            }
        }

        if dropped > 0 {
            debug!("Dropped {} old log lines on load", dropped);
            self.save()?;
        }

        Ok(self.entries.len())
    }

    /// Append an entry stamped with the current time
    pub fn add_entry(&mut self, data: &str) {
        let timestamp = match wall_clock() {
            Some(timestamp) => timestamp,
            None => {
                self.synthetic_seq += 1;
                format!("LOG-{}", self.synthetic_seq)
            }
        };
        self.add_entry_at(timestamp, data);
    }

    /// Append an entry with an explicit timestamp
    ///
    /// The oldest entry is evicted first when the log is full, so the length
    /// never exceeds `max_entries`.
    pub fn add_entry_at(&mut self, timestamp: String, data: &str) {
        while self.entries.len() >= self.max_entries {
            self.entries.pop_front();
            self.stale_lines += 1;
        }

        let entry = LogEntry {
            timestamp,
            data: data.to_string(),
        };

        if self.stale_lines >= self.max_entries {
            self.entries.push_back(entry);
            self.compact();
        } else {
            self.append_to_file(&entry);
            self.entries.push_back(entry);
        }
    }

    /// Rewrite the backing file without evicted lines
    fn compact(&mut self) {
        match self.save() {
            Ok(()) => self.stale_lines = 0,
            Err(e) => warn!("Failed to compact log file: {}", e),
        }
    }

    fn append_to_file(&self, entry: &LogEntry) {
        let Some(path) = &self.path else {
            return;
        };

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{}", entry));

        if let Err(e) = result {
            warn!("Failed to write log to {}: {}", path.display(), e);
        }
    }

    /// Entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// The newest `count` entries, oldest first
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &LogEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capacity
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Drop every entry and truncate the backing file
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.stale_lines = 0;
        if let Some(path) = &self.path {
            fs::write(path, "")?;
            info!("Log file cleared");
        }
        Ok(())
    }

    /// Render every entry as `[timestamp] data` lines
    pub fn export(&self) -> String {
        self.entries.iter().map(|entry| format!("{}\n", entry)).collect()
    }

    /// Overwrite the backing file with the in-memory entries
    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.path {
            fs::write(path, self.export())?;
            debug!("Saved {} log entries to {}", self.entries.len(), path.display());
        }
        Ok(())
    }
}

/// Local wall-clock timestamp, `None` while the clock is unset
fn wall_clock() -> Option<String> {
    let now = Local::now();
    if now.year() < MIN_VALID_YEAR {
        return None;
    }
    Some(now.format(TIMESTAMP_FORMAT).to_string())
}
