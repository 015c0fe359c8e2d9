//! In-Memory Table with Lazy Expiry
//!
//! The memory table is the authoritative read state of the store. It is a
//! `HashMap` behind a single `RwLock`: many readers proceed in parallel,
//! writers are exclusive.
//!
//! ## Lazy Expiry
//!
//! Entries with a TTL are never removed by a timer. A read that finds an
//! expired entry reports it as missing and adds the key to an eviction set
//! guarded by its own mutex, so the read never waits for the write lock:
//!
//! ```text
//!   get(k) ──read lock──> expired? ──yes──> queue k ──> try_write ──> evict
//!                                                │          │ busy
//!                                                │          ▼
//!   set/delete/compactor tick ──write lock──> evict_pending()
//! ```
//!
//! The reading thread drains the set itself when the write lock is free. When
//! it is not, the queued keys wait for the next read that finds it free, the
//! next writer, or the compactor. The set holds each key once, so it never
//! grows beyond the number of expired entries in the table.
//!
//! Eviction re-checks the entry under the write lock, so a key rewritten
//! between the read and the eviction survives.

use crate::storage::{Result, Storage};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{
    Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
};
use std::time::{Duration, Instant};
use tracing::trace;

/// A stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The stored value
    pub value: String,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates an entry that never expires.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// Creates an entry expiring `ttl` from now. A zero TTL, or one too large
    /// to represent, never expires.
    pub fn with_ttl(value: impl Into<String>, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

/// Operation counters for a [`MemoryTable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub expired: u64,
}

/// Thread-safe key-value map with TTL support.
///
/// # Example
///
/// ```
/// use emberkv::storage::MemoryTable;
/// use std::time::Duration;
///
/// let table = MemoryTable::new();
/// table.set("name", "ember");
/// assert_eq!(table.get("name"), Some("ember".to_string()));
///
/// table.set_with_ttl("session", "abc123", Duration::from_secs(60));
/// assert!(table.delete("session"));
/// ```
#[derive(Debug, Default)]
pub struct MemoryTable {
    data: RwLock<HashMap<String, Entry>>,

    /// Keys seen expired by a read, waiting for the write lock
    pending: Mutex<HashSet<String>>,

    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl MemoryTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_write(&self) -> Option<RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        match self.data.try_write() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Sets a key without expiry, replacing any previous value and TTL.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(key.into(), Entry::new(value));
    }

    /// Sets a key that expires after `ttl`. A zero TTL behaves like [`set`].
    ///
    /// [`set`]: MemoryTable::set
    pub fn set_with_ttl(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        self.insert(key.into(), Entry::with_ttl(value, ttl));
    }

    fn insert(&self, key: String, entry: Entry) {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.write();
        self.evict_locked(&mut data);
        data.insert(key, entry);
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An expired key
    /// is queued for eviction and removed right away if the write lock is
    /// free; this call never waits for it.
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        {
            let data = self.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let queued = self.lock_pending().insert(key.to_string());
        if queued {
            trace!(key, "Queued expired key for eviction");
        }

        if let Some(mut data) = self.try_write() {
            self.evict_locked(&mut data);
        }
        None
    }

    /// Deletes a key.
    ///
    /// Returns `true` if the key was present. An expired entry that has not
    /// been evicted yet still counts as present.
    pub fn delete(&self, key: &str) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.write();
        let removed = data.remove(key).is_some();
        self.evict_locked(&mut data);
        removed
    }

    /// Removes every queued key that is still expired.
    ///
    /// Returns the number of entries removed.
    pub fn evict_pending(&self) -> usize {
        if self.pending_len() == 0 {
            return 0;
        }
        let mut data = self.write();
        self.evict_locked(&mut data)
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashSet<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    fn evict_locked(&self, data: &mut HashMap<String, Entry>) -> usize {
        let keys = std::mem::take(&mut *self.lock_pending());

        let mut evicted = 0;
        for key in keys {
            if data.get(&key).is_some_and(Entry::is_expired) {
                data.remove(&key);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.expired_count
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Returns the number of stored entries, including expired entries that
    /// have not been evicted yet.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns table statistics.
    pub fn stats(&self) -> TableStats {
        TableStats {
            keys: self.len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

impl Storage for MemoryTable {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        MemoryTable::set(self, key, value);
        Ok(())
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        MemoryTable::set_with_ttl(self, key, value, ttl);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        MemoryTable::get(self, key)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(MemoryTable::delete(self, key))
    }
}

#[cfg(test)]
impl MemoryTable {
    /// Holds the read lock on another thread until the returned closure runs,
    /// so reads in the calling thread cannot evict.
    pub(crate) fn hold_read_lock(self: &std::sync::Arc<Self>) -> impl FnOnce() {
        use std::sync::mpsc;

        let table = std::sync::Arc::clone(self);
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = std::thread::spawn(move || {
            let _guard = table.read();
            locked_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        locked_rx.recv().unwrap();

        move || {
            drop(release_tx);
            holder.join().unwrap();
        }
    }
}
