//! Storage Module
//!
//! This module provides the storage layer for EmberKV: an in-memory table
//! with lazy TTL expiry, optionally made durable by an append-only
//! write-ahead log.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Engine                             │
//! │   ┌──────────────────────┐      ┌────────────────────────┐   │
//! │   │     MemoryTable      │      │     WriteAheadLog      │   │
//! │   │  RwLock<HashMap>     │      │  Mutex<File>, fsync    │   │
//! │   └──────────────────────┘      └────────────────────────┘   │
//! │              ▲   replay on open      │        ▲              │
//! │              └───────────────────────┘        │              │
//! └───────────────────────────────────────────────┼──────────────┘
//!                                                 │
//!                                   ┌─────────────┴─────────────┐
//!                                   │         Compactor         │
//!                                   │  (Background Tokio Task)  │
//!                                   └───────────────────────────┘
//! ```
//!
//! ## Log Format
//!
//! One UTF-8 line per mutation, fields separated by a single space:
//!
//! ```text
//! SET <key> <value>
//! SETTTL <key> <value> <ttl_ms>
//! DEL <key>
//! ```
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::MemoryTable;
//! use std::time::Duration;
//!
//! let table = MemoryTable::new();
//!
//! table.set("name", "ember");
//! assert_eq!(table.get("name"), Some("ember".to_string()));
//!
//! table.set_with_ttl("session", "token123", Duration::from_secs(3600));
//! assert_eq!(table.len(), 2);
//! ```

pub mod compaction;
pub mod engine;
pub mod error;
pub mod replay;
pub mod table;
pub mod wal;

use std::time::Duration;

// Re-export commonly used types
pub use compaction::{CompactionStats, Compactor};
pub use engine::{Engine, EngineConfig};
pub use error::{Result, StorageError};
pub use replay::ReplayStats;
pub use table::{Entry, MemoryTable, TableStats};
pub use wal::{LogEntry, LogParseError, LogWriter, WriteAheadLog};

/// Key-value operations shared by the volatile table and the durable engine.
///
/// Writes return `Result` because a durable backend can fail to persist
/// them; the memory table never does.
pub trait Storage: Send + Sync {
    /// Sets a key without expiry, replacing any previous value and TTL.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Sets a key that expires after `ttl`. A zero TTL means no expiry.
    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Returns the value for a key, or `None` if it is missing or expired.
    fn get(&self, key: &str) -> Option<String>;

    /// Removes a key, returning `true` if it was present.
    fn delete(&self, key: &str) -> Result<bool>;
}
