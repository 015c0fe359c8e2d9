//! Wire Protocol
//!
//! Clients send inline text commands, one per line; the server answers
//! with RESP-framed replies.
//!
//! ## Modules
//!
//! - `types`: Defines the `Request` and `Reply` enums and reply serialization
//! - `parser`: Line framing and command parsing
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{parse_message, Reply, Request};
//!
//! let (request, consumed) = parse_message(b"SET name ember\r\n").unwrap().unwrap();
//! assert!(matches!(request, Ok(Some(Request::Set { .. }))));
//! assert_eq!(consumed, 16);
//!
//! assert_eq!(Reply::Ok.serialize(), b"+OK\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_line, parse_message, LineResult, ParseError, ParseResult, MAX_LINE_LENGTH};
pub use types::{Reply, Request};
