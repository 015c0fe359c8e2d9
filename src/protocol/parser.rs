//! Inline Command Parser
//!
//! Commands are single text lines terminated by `\n` or `\r\n`, with
//! whitespace separated arguments:
//!
//! ```text
//! SET session token123 EX 60\r\n
//! GET session\n
//! ```
//!
//! ## How the Parser Works
//!
//! [`parse_message`] reads from a buffer and returns either:
//! - `Ok(Some((request, consumed)))` - A full line was read; `request` holds
//!   the parsed command or the reason it was rejected
//! - `Ok(None)` - Need more data, no line terminator yet
//! - `Err(ParseError::LineTooLong)` - The client is sending garbage; disconnect
//!
//! Blank lines parse to `Ok(None)` inside the request slot and are skipped by
//! the caller.

use crate::protocol::types::Request;
use std::time::Duration;
use thiserror::Error;

/// Longest accepted line, terminator excluded
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Errors that can occur while parsing a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line exceeds [`MAX_LINE_LENGTH`]
    #[error("line too long: {size} bytes (max: {max})")]
    LineTooLong { size: usize, max: usize },

    /// The line is not valid UTF-8
    #[error("invalid UTF-8 in command")]
    InvalidUtf8,

    /// Unknown command name
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Wrong number of arguments for a known command
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    /// EX/PX value is not a positive integer
    #[error("invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    /// Unrecognised or incomplete option
    #[error("syntax error")]
    Syntax,
}

impl ParseError {
    /// Returns true if the connection cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParseError::LineTooLong { .. })
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Outcome for one complete line: a request, a blank line, or a rejected
/// command to be answered with an error reply.
pub type LineResult = ParseResult<Option<Request>>;

/// Attempts to read one command line from `buf`.
///
/// Returns the parse outcome for the line and the number of bytes it
/// occupied, terminator included.
///
/// # Example
///
/// ```
/// use emberkv::protocol::{parse_message, Request};
///
/// let (request, consumed) = parse_message(b"GET name\r\n").unwrap().unwrap();
/// assert_eq!(request, Ok(Some(Request::Get { key: "name".to_string() })));
/// assert_eq!(consumed, 10);
/// ```
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(LineResult, usize)>> {
    let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_LINE_LENGTH {
            return Err(ParseError::LineTooLong {
                size: buf.len(),
                max: MAX_LINE_LENGTH,
            });
        }
        return Ok(None);
    };

    let line = &buf[..newline];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.len() > MAX_LINE_LENGTH {
        return Err(ParseError::LineTooLong {
            size: line.len(),
            max: MAX_LINE_LENGTH,
        });
    }

    Ok(Some((parse_line(line), newline + 1)))
}

/// Parses a single line without its terminator.
pub fn parse_line(line: &[u8]) -> LineResult {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
    let mut parts = line.split_whitespace();

    let Some(name) = parts.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = parts.collect();

    let request = match name.to_ascii_uppercase().as_str() {
        "PING" => match args.as_slice() {
            [] => Request::Ping,
            _ => return Err(ParseError::WrongArity("PING")),
        },
        "GET" => match args.as_slice() {
            [key] => Request::Get {
                key: key.to_string(),
            },
            _ => return Err(ParseError::WrongArity("GET")),
        },
        "DEL" => {
            if args.is_empty() {
                return Err(ParseError::WrongArity("DEL"));
            }
            Request::Del {
                keys: args.iter().map(|k| k.to_string()).collect(),
            }
        }
        "SET" => parse_set(&args)?,
        _ => return Err(ParseError::UnknownCommand(name.to_string())),
    };

    Ok(Some(request))
}

/// SET key value [EX seconds | PX milliseconds]
fn parse_set(args: &[&str]) -> ParseResult<Request> {
    let (key, value, options) = match args {
        [key, value, options @ ..] => (key, value, options),
        _ => return Err(ParseError::WrongArity("SET")),
    };

    let ttl = match options {
        [] => None,
        [unit, amount] => {
            let amount = amount
                .parse::<u64>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or(ParseError::InvalidExpireTime("SET"))?;
            match unit.to_ascii_uppercase().as_str() {
                "EX" => Some(Duration::from_secs(amount)),
                "PX" => Some(Duration::from_millis(amount)),
                _ => return Err(ParseError::Syntax),
            }
        }
        _ => return Err(ParseError::Syntax),
    };

    Ok(Request::Set {
        key: key.to_string(),
        value: value.to_string(),
        ttl,
    })
}
