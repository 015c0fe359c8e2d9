//! Log Replay
//!
//! Rebuilds a memory table from a log, first line to last, applying each
//! entry with exactly the semantics of the live operation. The last entry
//! for a key therefore decides its state.
//!
//! A replayed `SETTTL` starts its TTL window at replay time, not at the
//! original write: keys with a TTL get a fresh window after every restart.

use crate::storage::wal::LogEntry;
use crate::storage::{MemoryTable, Result};
use tracing::debug;

/// Counts from one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Entries applied to the table
    pub applied: usize,
    /// Malformed lines skipped
    pub skipped: usize,
}

/// Applies one entry to `table`.
pub fn apply(entry: LogEntry, table: &MemoryTable) {
    match entry {
        LogEntry::Set { key, value } => table.set(key, value),
        LogEntry::SetTtl { key, value, ttl } => table.set_with_ttl(key, value, ttl),
        LogEntry::Delete { key } => {
            table.delete(&key);
        }
    }
}

/// Replays `lines` into `table` in order.
///
/// Malformed lines are skipped. An I/O error from the line source aborts the
/// replay and is returned.
pub fn replay<I>(lines: I, table: &MemoryTable) -> Result<ReplayStats>
where
    I: IntoIterator<Item = Result<String>>,
{
    let mut stats = ReplayStats::default();

    for (index, line) in lines.into_iter().enumerate() {
        let line = line?;
        match line.parse::<LogEntry>() {
            Ok(entry) => {
                apply(entry, table);
                stats.applied += 1;
            }
            Err(e) => {
                debug!(line = index + 1, error = %e, "Skipping malformed log line");
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}
