//! Write-Ahead Log
//!
//! Every mutation accepted by the engine is appended to a plain-text log, one
//! operation per line, and synced to disk before the append returns. On
//! startup the log is replayed from the first line to rebuild the memory
//! table.
//!
//! ## Line Format
//!
//! ```text
//! SET <key> <value>
//! SETTTL <key> <value> <ttl_ms>
//! DEL <key>
//! ```
//!
//! Fields are separated by a single space and each line ends with `\n`. There
//! is no header, checksum or version tag: any writer producing these lines is
//! compatible. Keys and values never contain whitespace.
//!
//! ## Locking
//!
//! The open file handle lives inside a mutex and is only reachable through
//! it. Appends, compaction scans and the compaction swap all run under that
//! one lock, so an append can never land in a file that is being replaced.

use crate::storage::compaction::{self, CompactionStats};
use crate::storage::{Result, StorageError};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A single logged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// `SET <key> <value>`
    Set { key: String, value: String },
    /// `SETTTL <key> <value> <ttl_ms>`
    SetTtl {
        key: String,
        value: String,
        ttl: Duration,
    },
    /// `DEL <key>`
    Delete { key: String },
}

impl LogEntry {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn set_ttl(key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        Self::SetTtl {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// The key this entry applies to.
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::SetTtl { key, .. } | Self::Delete { key } => key,
        }
    }

    /// The opcode written as the first field of the line.
    pub fn opcode(&self) -> &'static str {
        match self {
            Self::Set { .. } => "SET",
            Self::SetTtl { .. } => "SETTTL",
            Self::Delete { .. } => "DEL",
        }
    }
}

/// TTL in whole milliseconds. Non-zero TTLs shorter than a millisecond round
/// up to 1, since a logged `0` would replay as a key that never expires.
fn ttl_millis(ttl: Duration) -> i64 {
    let ms = ttl.as_millis().max(u128::from(!ttl.is_zero()));
    i64::try_from(ms).unwrap_or(i64::MAX)
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set { key, value } => write!(f, "SET {} {}", key, value),
            Self::SetTtl { key, value, ttl } => {
                write!(f, "SETTTL {} {} {}", key, value, ttl_millis(*ttl))
            }
            Self::Delete { key } => write!(f, "DEL {}", key),
        }
    }
}

/// Reasons a log line could not be parsed.
///
/// Replay skips such lines instead of failing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogParseError {
    #[error("empty line")]
    Empty,

    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),

    #[error("{opcode} expects {expected} fields, found {found}")]
    FieldCount {
        opcode: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid TTL: {0}")]
    InvalidTtl(String),

    #[error("empty key")]
    EmptyKey,
}

impl FromStr for LogEntry {
    type Err = LogParseError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split(' ').collect();

        let entry = match fields.as_slice() {
            [""] => return Err(LogParseError::Empty),
            ["SET", key, value] => LogEntry::set(*key, *value),
            ["SETTTL", key, value, ttl] => {
                let ms: i64 = ttl
                    .parse()
                    .map_err(|_| LogParseError::InvalidTtl(ttl.to_string()))?;
                // A non-positive TTL means "no expiry", same as a live set
                LogEntry::set_ttl(*key, *value, Duration::from_millis(ms.max(0) as u64))
            }
            ["DEL", key] => LogEntry::delete(*key),
            [op, ..] => {
                let (opcode, expected) = match *op {
                    "SET" => ("SET", 3),
                    "SETTTL" => ("SETTTL", 4),
                    "DEL" => ("DEL", 2),
                    other => return Err(LogParseError::UnknownOpcode(other.to_string())),
                };
                return Err(LogParseError::FieldCount {
                    opcode,
                    expected,
                    found: fields.len(),
                });
            }
            [] => return Err(LogParseError::Empty),
        };

        if entry.key().is_empty() {
            return Err(LogParseError::EmptyKey);
        }
        Ok(entry)
    }
}

/// Lazy iterator over the raw lines of a log file.
///
/// Reads from the start of the file and cannot be restarted.
pub struct LogLines {
    lines: io::Lines<BufReader<File>>,
    path: PathBuf,
}

impl Iterator for LogLines {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines
            .next()
            .map(|line| line.map_err(|e| StorageError::io(&self.path, e)))
    }
}

/// Append-only operation log backing an engine.
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl WriteAheadLog {
    /// Opens the log at `path`, creating it and its parent directories if
    /// missing.
    ///
    /// A compaction temp file left behind by a crash is removed: it was never
    /// swapped in, so the log itself is complete.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }

        let tmp = compaction::temp_path(&path);
        match fs::remove_file(&tmp) {
            Ok(()) => info!(path = %tmp.display(), "Removed stale compaction file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %tmp.display(), error = %e, "Could not remove stale compaction file"),
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;

        let torn = truncate_torn_tail(&mut file).map_err(|e| StorageError::io(&path, e))?;
        if torn > 0 {
            warn!(path = %path.display(), bytes = torn, "Log ended mid-line; dropped the partial record");
        }

        debug!(path = %path.display(), "Opened write-ahead log");

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends one entry and syncs it to disk before returning.
    ///
    /// The line is written with a single `write_all` under the log lock, so
    /// concurrent appends never interleave.
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        self.writer().append(entry)
    }

    /// Takes the log lock and returns a handle for appending under it.
    ///
    /// Appends and compactions from other threads wait until the handle is
    /// dropped, so work done while holding it is ordered with the log.
    pub fn writer(&self) -> LogWriter<'_> {
        LogWriter {
            file: self.lock(),
            path: &self.path,
        }
    }

    /// Returns a lazy iterator over every line currently in the log.
    pub fn read_all(&self) -> Result<LogLines> {
        let file = File::open(&self.path).map_err(|e| StorageError::io(&self.path, e))?;
        Ok(LogLines {
            lines: BufReader::new(file).lines(),
            path: self.path.clone(),
        })
    }

    /// Rewrites the log so it holds only the latest entry per key.
    ///
    /// Appends wait for the whole scan-and-swap. On error the original log
    /// stays active and untouched.
    pub fn compact(&self) -> Result<CompactionStats> {
        let mut file = self.lock();
        compaction::rewrite(&mut file, &self.path)
    }

    /// Returns the current size of the log file in bytes.
    pub fn size(&self) -> Result<u64> {
        let file = self.lock();
        file.metadata()
            .map(|m| m.len())
            .map_err(|e| StorageError::io(&self.path, e))
    }
}

/// Exclusive append access to a [`WriteAheadLog`], held until dropped.
pub struct LogWriter<'a> {
    file: MutexGuard<'a, File>,
    path: &'a Path,
}

impl LogWriter<'_> {
    /// Appends one entry and syncs it to disk before returning.
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let mut line = entry.to_string();
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.sync_data())
            .map_err(|e| StorageError::io(self.path, e))
    }
}

/// Cuts the file back to its last `\n`, dropping a record whose append was
/// interrupted by a crash. That record was never acknowledged, and a prefix
/// of it can still parse (`SET a 123` cut to `SET a 1`).
///
/// Returns the number of bytes dropped.
fn truncate_torn_tail(file: &mut File) -> io::Result<u64> {
    let len = file.metadata()?.len();
    let mut chunk = [0u8; 4096];
    let mut end = len;

    let keep = loop {
        if end == 0 {
            break 0;
        }
        let start = end.saturating_sub(chunk.len() as u64);
        let buf = &mut chunk[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(buf)?;
        if let Some(i) = buf.iter().rposition(|&b| b == b'\n') {
            break start + i as u64 + 1;
        }
        end = start;
    };

    if keep < len {
        file.set_len(keep)?;
        file.sync_data()?;
    }
    Ok(len - keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn read_lines(log: &WriteAheadLog) -> Vec<String> {
        log.read_all().unwrap().map(|l| l.unwrap()).collect()
    }

    #[test]
    fn test_format_entries() {
        assert_eq!(LogEntry::set("a", "1").to_string(), "SET a 1");
        assert_eq!(
            LogEntry::set_ttl("b", "2", Duration::from_millis(500)).to_string(),
            "SETTTL b 2 500"
        );
        assert_eq!(LogEntry::delete("c").to_string(), "DEL c");
    }

    #[test]
    fn test_sub_millisecond_ttl_rounds_up() {
        let entry = LogEntry::set_ttl("k", "v", Duration::from_micros(300));
        assert_eq!(entry.to_string(), "SETTTL k v 1");

        let entry = LogEntry::set_ttl("k", "v", Duration::ZERO);
        assert_eq!(entry.to_string(), "SETTTL k v 0");
    }

    #[test]
    fn test_parse_entries() {
        assert_eq!("SET a 1".parse::<LogEntry>(), Ok(LogEntry::set("a", "1")));
        assert_eq!(
            "SETTTL b 2 500".parse::<LogEntry>(),
            Ok(LogEntry::set_ttl("b", "2", Duration::from_millis(500)))
        );
        assert_eq!("DEL c".parse::<LogEntry>(), Ok(LogEntry::delete("c")));
        assert_eq!("SET k ".parse::<LogEntry>(), Ok(LogEntry::set("k", "")));
    }

    #[test]
    fn test_parse_negative_ttl_as_no_expiry() {
        assert_eq!(
            "SETTTL k v -40".parse::<LogEntry>(),
            Ok(LogEntry::set_ttl("k", "v", Duration::ZERO))
        );
    }

    #[test]
    fn test_parse_malformed_lines() {
        assert_eq!("".parse::<LogEntry>(), Err(LogParseError::Empty));
        assert_eq!(
            "PUT a 1".parse::<LogEntry>(),
            Err(LogParseError::UnknownOpcode("PUT".into()))
        );
        assert_eq!(
            "SET a".parse::<LogEntry>(),
            Err(LogParseError::FieldCount {
                opcode: "SET",
                expected: 3,
                found: 2
            })
        );
        assert_eq!(
            "DEL a b".parse::<LogEntry>(),
            Err(LogParseError::FieldCount {
                opcode: "DEL",
                expected: 2,
                found: 3
            })
        );
        assert_eq!(
            "SETTTL a 1 soon".parse::<LogEntry>(),
            Err(LogParseError::InvalidTtl("soon".into()))
        );
        assert_eq!("SET  1".parse::<LogEntry>(), Err(LogParseError::EmptyKey));
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/ember.log");

        let log = WriteAheadLog::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(log.path(), path.as_path());
        assert_eq!(log.size().unwrap(), 0);
    }

    #[test]
    fn test_open_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        let err = WriteAheadLog::open(blocker.join("ember.log")).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_open_removes_stale_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.log");
        let tmp = compaction::temp_path(&path);
        fs::write(&path, "SET a 1\n").unwrap();
        fs::write(&tmp, "SET a 2\n").unwrap();

        let log = WriteAheadLog::open(&path).unwrap();
        assert!(!tmp.exists());
        assert_eq!(read_lines(&log), vec!["SET a 1"]);
    }

    #[test]
    fn test_open_drops_torn_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.log");
        fs::write(&path, "SET a 1\nSET b").unwrap();

        let log = WriteAheadLog::open(&path).unwrap();
        assert_eq!(read_lines(&log), vec!["SET a 1"]);

        log.append(&LogEntry::set("c", "3")).unwrap();
        assert_eq!(read_lines(&log), vec!["SET a 1", "SET c 3"]);
    }

    #[test]
    fn test_torn_prefix_that_parses_is_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.log");
        // `SET a 123` cut short by a crash still parses as `SET a 1`
        fs::write(&path, "SET a 9\nSET a 1").unwrap();

        let log = WriteAheadLog::open(&path).unwrap();
        assert_eq!(read_lines(&log), vec!["SET a 9"]);
        assert_eq!(log.size().unwrap(), 8);
    }

    #[test]
    fn test_open_drops_log_with_no_complete_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.log");
        fs::write(&path, "x".repeat(10_000)).unwrap();

        let log = WriteAheadLog::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 0);
    }

    #[test]
    fn test_open_keeps_complete_log_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.log");
        let contents = format!("{}SET last 1\n", "SET filler 0\n".repeat(1_000));
        fs::write(&path, &contents).unwrap();

        let log = WriteAheadLog::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), contents.len() as u64);
    }

    #[test]
    fn test_writer_holds_log_lock() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(WriteAheadLog::open(dir.path().join("ember.log")).unwrap());

        let mut writer = log.writer();
        let other = {
            let log = Arc::clone(&log);
            thread::spawn(move || log.append(&LogEntry::set("b", "2")).unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        writer.append(&LogEntry::set("a", "1")).unwrap();
        drop(writer);
        other.join().unwrap();

        assert_eq!(read_lines(&log), vec!["SET a 1", "SET b 2"]);
    }

    #[test]
    fn test_append_and_read_all() {
        let dir = tempfile::tempdir().unwrap();
        let log = WriteAheadLog::open(dir.path().join("ember.log")).unwrap();

        log.append(&LogEntry::set("a", "1")).unwrap();
        log.append(&LogEntry::set_ttl("b", "2", Duration::from_millis(500)))
            .unwrap();
        log.append(&LogEntry::delete("a")).unwrap();

        assert_eq!(read_lines(&log), vec!["SET a 1", "SETTTL b 2 500", "DEL a"]);
    }

    #[test]
    fn test_append_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.log");

        {
            let log = WriteAheadLog::open(&path).unwrap();
            log.append(&LogEntry::set("a", "1")).unwrap();
        }

        let log = WriteAheadLog::open(&path).unwrap();
        log.append(&LogEntry::set("b", "2")).unwrap();
        assert_eq!(read_lines(&log), vec!["SET a 1", "SET b 2"]);
    }

    #[test]
    fn test_concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(WriteAheadLog::open(dir.path().join("ember.log")).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..25 {
                        let value = format!("{}", t).repeat(64);
                        log.append(&LogEntry::set(format!("k{}-{}", t, i), value))
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let lines = read_lines(&log);
        assert_eq!(lines.len(), 100);
        for line in lines {
            assert!(matches!(line.parse::<LogEntry>(), Ok(LogEntry::Set { .. })));
        }
    }
}
