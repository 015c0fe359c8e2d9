//! Durable Storage Engine
//!
//! [`Engine`] ties the memory table, the write-ahead log, replay and the
//! background compactor together.
//!
//! ## Write Path
//!
//! ```text
//! set(k, v) ──> validate ──> log lock ─┬─> MemoryTable (write lock, released)
//!                                      └─> append + fsync ──> log unlock
//! get(k)    ──> MemoryTable (read lock)
//! ```
//!
//! Writers hold the log lock across both the table mutation and the append,
//! so the log records mutations in exactly the order the table applied them
//! and replay rebuilds the state that was being served. Locks are always
//! taken log first, then table; reads and the compactor never hold both.
//! Between the table mutation and the end of the fsync a write is visible to
//! readers but not yet durable.
//!
//! ## Append Failures
//!
//! A failed append is returned to the caller and logged, but the in-memory
//! update is not rolled back: the key stays readable until the process exits,
//! and is lost on restart.

use crate::storage::compaction::{CompactionStats, Compactor};
use crate::storage::replay;
use crate::storage::wal::{LogEntry, LogWriter, WriteAheadLog};
use crate::storage::{MemoryTable, Result, Storage, StorageError, TableStats};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Configuration for a durable [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path of the write-ahead log
    pub log_path: PathBuf,

    /// Compact the log once while opening, before serving
    pub compact_on_start: bool,

    /// Interval between background compactions (None = no background task)
    pub compaction_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("data/emberkv.log"),
            compact_on_start: false,
            compaction_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl EngineConfig {
    /// Creates a config for the log at `log_path`, other settings default.
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            ..Default::default()
        }
    }

    pub fn with_compact_on_start(mut self, compact: bool) -> Self {
        self.compact_on_start = compact;
        self
    }

    pub fn with_compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = Some(interval);
        self
    }

    /// Disables the background compactor. The engine then works without a
    /// Tokio runtime.
    pub fn without_background_compaction(mut self) -> Self {
        self.compaction_interval = None;
        self
    }
}

/// Memory table backed by a write-ahead log.
///
/// # Example
///
/// ```no_run
/// use emberkv::storage::{Engine, EngineConfig};
///
/// let config = EngineConfig::new("data/emberkv.log").without_background_compaction();
/// let engine = Engine::open(config)?;
///
/// engine.set("foo", "bar")?;
/// assert_eq!(engine.get("foo"), Some("bar".to_string()));
/// assert!(engine.delete("foo")?);
/// # Ok::<(), emberkv::storage::StorageError>(())
/// ```
#[derive(Debug)]
pub struct Engine {
    table: Arc<MemoryTable>,
    log: Arc<WriteAheadLog>,
    compactor: Option<Compactor>,
}

impl Engine {
    /// Opens the log, replays it and starts background compaction if
    /// configured.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be opened or read, or if a compaction interval
    /// is set and no Tokio runtime is running. A failed start-up compaction
    /// is logged and does not fail the open.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let log = Arc::new(WriteAheadLog::open(&config.log_path)?);
        let table = Arc::new(MemoryTable::new());

        let stats = replay::replay(log.read_all()?, &table)?;
        info!(
            path = %log.path().display(),
            applied = stats.applied,
            skipped = stats.skipped,
            keys = table.len(),
            "Replayed write-ahead log"
        );

        if config.compact_on_start {
            match log.compact() {
                Ok(stats) => info!(
                    scanned = stats.scanned,
                    retained = stats.retained,
                    "Compacted log on start"
                ),
                Err(e) => warn!(error = %e, "Start-up compaction failed, continuing with full log"),
            }
        }

        let compactor = config
            .compaction_interval
            .map(|interval| Compactor::start(Arc::clone(&log), Arc::clone(&table), interval))
            .transpose()?;

        Ok(Self {
            table,
            log,
            compactor,
        })
    }

    /// Sets a key without expiry.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        validate("key", key)?;
        validate("value", value)?;

        let mut log = self.log.writer();
        self.table.set(key, value);
        append(&mut log, LogEntry::set(key, value))
    }

    /// Sets a key that expires after `ttl`. A zero TTL behaves like [`set`].
    ///
    /// [`set`]: Engine::set
    pub fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        validate("key", key)?;
        validate("value", value)?;

        let mut log = self.log.writer();
        self.table.set_with_ttl(key, value, ttl);
        append(&mut log, LogEntry::set_ttl(key, value, ttl))
    }

    /// Gets the value for a key from memory. Never touches the disk.
    pub fn get(&self, key: &str) -> Option<String> {
        self.table.get(key)
    }

    /// Deletes a key, returning `true` if it was present.
    ///
    /// Deleting an absent key writes nothing to the log.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut log = self.log.writer();
        if !self.table.delete(key) {
            return Ok(false);
        }
        append(&mut log, LogEntry::delete(key))?;
        Ok(true)
    }

    /// Compacts the log now, waiting for in-flight appends.
    pub fn compact(&self) -> Result<CompactionStats> {
        self.log.compact()
    }

    /// Stops the background compactor, if one is running.
    pub fn shutdown(&self) {
        if let Some(compactor) = &self.compactor {
            compactor.stop();
        }
    }

    /// Returns true while a background compactor is running.
    pub fn is_compacting(&self) -> bool {
        self.compactor.as_ref().is_some_and(|c| !c.is_stopped())
    }

    /// Returns the path of the write-ahead log.
    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Returns the number of entries held in memory.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns true if no entries are held in memory.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns memory table statistics.
    pub fn stats(&self) -> TableStats {
        self.table.stats()
    }
}

fn append(log: &mut LogWriter<'_>, entry: LogEntry) -> Result<()> {
    log.append(&entry).inspect_err(|e| {
        error!(
            op = entry.opcode(),
            key = entry.key(),
            error = %e,
            "Log append failed; the change is in memory but not durable"
        )
    })
}

/// Rejects input the line format cannot carry.
fn validate(field: &'static str, s: &str) -> Result<()> {
    if field == "key" && s.is_empty() {
        return Err(StorageError::InvalidField {
            field,
            reason: "must not be empty",
        });
    }
    if s.chars().any(char::is_whitespace) {
        return Err(StorageError::InvalidField {
            field,
            reason: "must not contain whitespace",
        });
    }
    Ok(())
}

impl Storage for Engine {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        Engine::set(self, key, value)
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        Engine::set_with_ttl(self, key, value, ttl)
    }

    fn get(&self, key: &str) -> Option<String> {
        Engine::get(self, key)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Engine::delete(self, key)
    }
}
