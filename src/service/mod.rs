//! Service Module
//!
//! Executes parsed requests against a [`Storage`](crate::storage::Storage)
//! backend and turns the outcome into a reply.
//!
//! ## Architecture
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌─────────────────┐
//! │    pre-hook     │  error ──> -ERR reply, storage untouched
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │     Storage     │  MemoryTable or Engine
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │    post-hook    │  error logged, reply unchanged
//! └────────┬────────┘
//!          ▼
//!        Reply
//! ```

pub mod handler;

pub use handler::{HookError, PostHook, PreHook, Service, ServiceBuilder};
