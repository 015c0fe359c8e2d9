//! # EmberKV - A Durable In-Memory Key-Value Store
//!
//! EmberKV keeps every key in memory and, when given a log path, records
//! each mutation in an append-only write-ahead log so the table survives
//! restarts. A background task compacts the log down to one line per key.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              EmberKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│   Service   │  hooks,          │
//! │  │ (Listener)  │    │  Handler    │    │             │  default TTL     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │ dyn Storage             │
//! │                                               ▼                         │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │                 Engine                       │    │
//! │                     │   MemoryTable  <── replay ──  WriteAheadLog  │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │              Compactor                          │ │
//! │                     │      (Background Tokio Task)                    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use emberkv::storage::{Engine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), emberkv::storage::StorageError> {
//!     let engine = Engine::open(EngineConfig::new("data/emberkv.log"))?;
//!
//!     engine.set("name", "ember")?;
//!     assert_eq!(engine.get("name"), Some("ember".to_string()));
//!
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `GET key`
//! - `SET key value [EX seconds | PX milliseconds]`
//! - `DEL key [key ...]`
//!
//! ## Module Overview
//!
//! - [`storage`]: Memory table, write-ahead log, replay and compaction
//! - [`service`]: Request execution with hooks and a default TTL
//! - [`protocol`]: Inline command parser and reply encoding
//! - [`connection`]: Client connection management
//!
//! ## Durability
//!
//! Every mutation is fsynced before the call returns. Reads never touch the
//! disk. TTLs are stored as durations, so a replayed key with a TTL starts a
//! fresh window when the process restarts.

pub mod connection;
pub mod protocol;
pub mod service;
pub mod storage;

// Re-export commonly used types for convenience
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, Reply, Request};
pub use service::{Service, ServiceBuilder};
pub use storage::{Engine, EngineConfig, MemoryTable, Storage, StorageError};

/// The default port EmberKV listens on
pub const DEFAULT_PORT: u16 = 7379;

/// The default host EmberKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
