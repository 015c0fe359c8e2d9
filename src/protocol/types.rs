//! Request and Reply Types
//!
//! Requests arrive as inline text commands; replies go out with RESP
//! framing so that `redis-cli` and friends can talk to the server.
//!
//! ## Reply Format
//!
//! Each reply starts with a type prefix byte and ends with CRLF:
//! - `+` Status (`+OK`, `+PONG`)
//! - `-` Error (`-ERR unknown command 'FOO'`)
//! - `:` Integer (`:1`)
//! - `$` Bulk string (`$5\r\nhello\r\n`), or `$-1\r\n` when not found

use std::fmt;
use std::time::Duration;

/// The CRLF terminator used in replies
pub const CRLF: &[u8] = b"\r\n";

/// Reply type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `PING`
    Ping,

    /// `GET key`
    Get { key: String },

    /// `SET key value [EX seconds | PX milliseconds]`
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },

    /// `DEL key [key ...]`
    Del { keys: Vec<String> },
}

impl Request {
    /// Returns the upper-case command name.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "PING",
            Request::Get { .. } => "GET",
            Request::Set { .. } => "SET",
            Request::Del { .. } => "DEL",
        }
    }
}

/// A reply sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`
    Ok,

    /// `+PONG`
    Pong,

    /// A found value
    Bulk(String),

    /// Key not found
    Nil,

    /// Count of affected keys
    Integer(i64),

    /// Error message, sent as `-<message>`
    Error(String),
}

impl Reply {
    /// Creates an error reply.
    ///
    /// # Example
    /// ```
    /// use emberkv::protocol::Reply;
    /// let err = Reply::error("ERR unknown command 'FOO'");
    /// assert_eq!(err.serialize(), b"-ERR unknown command 'FOO'\r\n");
    /// ```
    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    /// Serializes the reply to its wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Ok => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(b"OK");
            }
            Reply::Pong => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(b"PONG");
            }
            Reply::Bulk(value) => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(value.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(value.as_bytes());
            }
            Reply::Nil => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(b"-1");
            }
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
            }
            Reply::Error(msg) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(msg.as_bytes());
            }
        }
        buf.extend_from_slice(CRLF);
    }

    /// Returns true if this reply is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Pong => write!(f, "PONG"),
            Reply::Bulk(value) => write!(f, "\"{}\"", value),
            Reply::Nil => write!(f, "(nil)"),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Error(msg) => write!(f, "(error) {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialize() {
        assert_eq!(Reply::Ok.serialize(), b"+OK\r\n");
        assert_eq!(Reply::Pong.serialize(), b"+PONG\r\n");
    }

    #[test]
    fn test_bulk_serialize() {
        assert_eq!(Reply::Bulk("hello".to_string()).serialize(), b"$5\r\nhello\r\n");
        assert_eq!(Reply::Bulk(String::new()).serialize(), b"$0\r\n\r\n");
    }

    #[test]
    fn test_bulk_length_counts_bytes() {
        assert_eq!(Reply::Bulk("é".to_string()).serialize(), "$2\r\né\r\n".as_bytes());
    }

    #[test]
    fn test_nil_serialize() {
        assert_eq!(Reply::Nil.serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(Reply::Integer(1).serialize(), b":1\r\n");
        assert_eq!(Reply::Integer(0).serialize(), b":0\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let reply = Reply::error("ERR syntax error");
        assert!(reply.is_error());
        assert_eq!(reply.serialize(), b"-ERR syntax error\r\n");
    }

    #[test]
    fn test_serialize_into_appends() {
        let mut buf = Vec::new();
        Reply::Ok.serialize_into(&mut buf);
        Reply::Nil.serialize_into(&mut buf);
        assert_eq!(buf, b"+OK\r\n$-1\r\n");
    }

    #[test]
    fn test_request_name() {
        let set = Request::Set {
            key: "k".to_string(),
            value: "v".to_string(),
            ttl: None,
        };
        assert_eq!(set.name(), "SET");
        assert_eq!(Request::Ping.name(), "PING");
    }
}
