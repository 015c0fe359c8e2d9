//! Log Compaction
//!
//! The log grows by one line per mutation. Compaction rewrites it to hold
//! only the most recent entry for each key, which is all replay needs.
//!
//! ## Crash Safety
//!
//! The rewrite uses the atomic rename pattern:
//!
//! 1. Sync and rewind the active log, scan it, keep the last entry per key
//! 2. Write the survivors to `<log>.tmp` and `sync_all` it
//! 3. Rename the temp file over the log (atomic on POSIX)
//! 4. Sync the parent directory so the rename itself is durable
//!
//! A crash before step 3 leaves the original log intact plus an orphaned temp
//! file (removed at the next open). A crash after step 3 leaves the compacted
//! log. No reader ever sees a half-written log.
//!
//! The temp file is opened for append before the rename and becomes the
//! active handle afterwards, so there is no reopen step that could fail once
//! the swap has happened.
//!
//! ## Background Task
//!
//! [`Compactor`] runs the rewrite on a fixed interval as a Tokio task. When
//! its handle is dropped, the task stops.

use crate::storage::wal::{LogEntry, WriteAheadLog};
use crate::storage::{MemoryTable, Result, StorageError};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Lines read from the original log
    pub scanned: usize,
    /// Entries written to the compacted log
    pub retained: usize,
    /// Malformed lines dropped
    pub skipped: usize,
}

impl CompactionStats {
    /// Lines that did not make it into the compacted log.
    pub fn dropped(&self) -> usize {
        self.scanned - self.retained
    }
}

/// Path of the temp file a compaction of `log_path` writes to.
pub fn temp_path(log_path: &Path) -> PathBuf {
    let mut name = OsString::from(log_path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Compacts the log open as `active` at `path`, replacing `active` with a
/// handle to the compacted file on success.
///
/// The caller must hold the log lock for the whole call.
pub(crate) fn rewrite(active: &mut File, path: &Path) -> Result<CompactionStats> {
    let io_err = |e: io::Error| StorageError::io(path, e);

    active.sync_data().map_err(io_err)?;
    active.seek(SeekFrom::Start(0)).map_err(io_err)?;

    let mut stats = CompactionStats::default();
    let mut latest: HashMap<String, (usize, LogEntry)> = HashMap::new();

    for (index, line) in BufReader::new(&mut *active).lines().enumerate() {
        let line = line.map_err(io_err)?;
        stats.scanned += 1;

        match line.parse::<LogEntry>() {
            Ok(entry) => {
                latest.insert(entry.key().to_string(), (index, entry));
            }
            Err(e) => {
                stats.skipped += 1;
                debug!(line = index + 1, error = %e, "Dropping malformed log line");
            }
        }
    }

    // Keep survivors in the order their final writes were made
    let mut retained: Vec<(usize, LogEntry)> = latest.into_values().collect();
    retained.sort_unstable_by_key(|(index, _)| *index);
    stats.retained = retained.len();

    let tmp = temp_path(path);
    let compacted = match write_compacted(&tmp, &retained) {
        Ok(file) => file,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StorageError::io(path, e));
    }

    // Swapped: from here on the compacted file is the log
    *active = compacted;

    if let Err(e) = sync_parent_dir(path) {
        warn!(path = %path.display(), error = %e, "Could not sync log directory after compaction");
    }

    Ok(stats)
}

/// Writes `entries` to a fresh temp file and syncs it. The returned handle
/// is open for append.
fn write_compacted(tmp: &Path, entries: &[(usize, LogEntry)]) -> Result<File> {
    let io_err = |e: io::Error| StorageError::io(tmp, e);

    match fs::remove_file(tmp) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(io_err(e)),
        _ => {}
    }

    let file = OpenOptions::new()
        .read(true)
        .append(true)
        .create_new(true)
        .open(tmp)
        .map_err(io_err)?;

    let mut writer = BufWriter::new(&file);
    for (_, entry) in entries {
        writeln!(writer, "{}", entry).map_err(io_err)?;
    }
    writer.flush().map_err(io_err)?;
    drop(writer);

    file.sync_all().map_err(io_err)?;
    Ok(file)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// A handle to the running background compactor.
///
/// When this handle is dropped, the compactor task will be stopped.
#[derive(Debug)]
pub struct Compactor {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl Compactor {
    /// Starts compacting `log` every `interval` on the current Tokio runtime.
    ///
    /// Each tick also evicts keys that reads found expired in `table`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoRuntime`] when called outside a runtime.
    pub fn start(
        log: Arc<WriteAheadLog>,
        table: Arc<MemoryTable>,
        interval: Duration,
    ) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| StorageError::NoRuntime)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            path = %log.path().display(),
            interval_secs = interval.as_secs_f64(),
            "Background log compactor started"
        );
        handle.spawn(compaction_loop(log, table, interval, shutdown_rx));

        Ok(Self { shutdown_tx })
    }

    /// Stops the compactor. A pass already running finishes first.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Background log compactor stopped");
        }
    }

    /// Returns true once [`stop`](Compactor::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main compaction loop.
async fn compaction_loop(
    log: Arc<WriteAheadLog>,
    table: Arc<MemoryTable>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        // Shutdown wins over a sleep that finished at the same time
        tokio::select! {
            biased;
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Compactor received shutdown signal");
                    return;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let evicted = table.evict_pending();
        if evicted > 0 {
            debug!(evicted, "Evicted expired keys");
        }

        let log = Arc::clone(&log);
        match tokio::task::spawn_blocking(move || log.compact()).await {
            Ok(Ok(stats)) => info!(
                scanned = stats.scanned,
                retained = stats.retained,
                skipped = stats.skipped,
                "Log compacted"
            ),
            Ok(Err(e)) => warn!(error = %e, "Log compaction failed, retrying next interval"),
            Err(e) => warn!(error = %e, "Log compaction task failed"),
        }
    }
}
