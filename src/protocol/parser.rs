//! Incremental RESP Decoder
//!
//! Turns raw bytes into [`RespValue`] trees. The command layer never looks at
//! raw bytes; it only sees what this module produces, which makes this the
//! seam where malformed input can be injected in tests.
//!
//! ## How the Parser Works
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((value, consumed)))` - Successfully parsed a value, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the message is incomplete
//! - `Err(ParseError)` - Invalid protocol data
//!
//! This design allows the caller to:
//! 1. Append incoming network data to a buffer
//! 2. Call `parse()` to attempt parsing
//! 3. If successful, advance the buffer by `consumed` bytes
//! 4. If incomplete, wait for more data
//! 5. If error, report it and disconnect the client
//!
//! Besides the typed frames, two shapes are accepted that never come out of
//! [`RespValue::serialize`] for a request: a bare `\n` (keep-alive, decoded as
//! [`RespValue::NoReply`]) and inline commands such as `PING\r\n`, which are
//! split on whitespace into an array of bulk strings.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string, error message or length line
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for nil)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for nil)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The message exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// An incremental RESP decoder.
///
/// # Example
///
/// ```
/// use quickkv::protocol::{RespParser, RespValue};
///
/// let mut parser = RespParser::new();
/// let buffer = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
///
/// let (value, consumed) = parser.parse(buffer).unwrap().unwrap();
/// assert_eq!(consumed, buffer.len());
/// assert_eq!(value, RespValue::request("GET", ["name"]));
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Current nesting depth (for array parsing)
    depth: usize,
}

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one RESP value from the front of the buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((value, consumed)))` - Successfully parsed a value
    /// - `Ok(None)` - Incomplete data, need more bytes
    /// - `Err(e)` - Parse error
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => self.parse_simple_string(buf),
            prefix::ERROR => self.parse_error(buf),
            prefix::INTEGER => self.parse_integer(buf),
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            prefix::NO_REPLY => Ok(Some((RespValue::NoReply, 1))),
            _ => self.parse_inline(buf),
        }
    }

    /// Parses a simple string: `+<string>\r\n`
    fn parse_simple_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        Ok(read_line(buf)?.map(|(s, consumed)| (RespValue::SimpleString(s.to_string()), consumed)))
    }

    /// Parses an error: `-<error message>\r\n`
    fn parse_error(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        Ok(read_line(buf)?.map(|(s, consumed)| (RespValue::Error(s.to_string()), consumed)))
    }

    /// Parses an integer: `:<integer>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        Ok(read_int_line(buf)?.map(|(n, consumed)| (RespValue::Integer(n), consumed)))
    }

    /// Parses a bulk string: `$<length>\r\n<data>\r\n`
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (length, header_len) = match read_int_line(buf)? {
            Some(line) => line,
            None => return Ok(None),
        };

        if length == -1 {
            return Ok(Some((RespValue::BulkString(None), header_len)));
        }

        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;

        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let total_needed = header_len + length + 2;
        if buf.len() < total_needed {
            return Ok(None);
        }

        if &buf[header_len + length..total_needed] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[header_len..header_len + length]);

        Ok(Some((RespValue::BulkString(Some(data)), total_needed)))
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (count, header_len) = match read_int_line(buf)? {
            Some(line) => line,
            None => return Ok(None),
        };

        if count == -1 {
            return Ok(Some((RespValue::Array(None), header_len)));
        }

        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;

        // Cap the preallocation; a hostile header must not reserve gigabytes.
        let mut elements = Vec::with_capacity(count.min(1024));
        let mut consumed = header_len;

        self.depth += 1;
        let result = self.parse_elements(buf, count, &mut elements, &mut consumed);
        self.depth -= 1;

        if result? {
            Ok(Some((RespValue::Array(Some(elements)), consumed)))
        } else {
            Ok(None)
        }
    }

    /// Parses `count` consecutive values. Returns `false` if the buffer ran out.
    fn parse_elements(
        &mut self,
        buf: &[u8],
        count: usize,
        elements: &mut Vec<RespValue>,
        consumed: &mut usize,
    ) -> ParseResult<bool> {
        for _ in 0..count {
            if *consumed >= buf.len() {
                return Ok(false);
            }

            match self.parse_value(&buf[*consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    *consumed += element_consumed;
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Parses an inline command such as `SET foo bar\r\n`.
    ///
    /// An empty line is treated like a bare `\n` keep-alive.
    fn parse_inline(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if self.depth > 0 {
            return Err(ParseError::ProtocolError(format!(
                "unexpected byte {:#04x} inside array",
                buf[0]
            )));
        }

        let crlf_pos = match find_crlf(buf) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let line = std::str::from_utf8(&buf[..crlf_pos])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        let elements: Vec<RespValue> = line
            .split_whitespace()
            .map(|s| RespValue::BulkString(Some(Bytes::copy_from_slice(s.as_bytes()))))
            .collect();

        if elements.is_empty() {
            return Ok(Some((RespValue::NoReply, crlf_pos + 2)));
        }

        Ok(Some((RespValue::Array(Some(elements)), crlf_pos + 2)))
    }
}

/// Reads the UTF-8 line following the prefix byte.
///
/// Returns the line content and the total bytes consumed (prefix + line + CRLF).
fn read_line(buf: &[u8]) -> ParseResult<Option<(&str, usize)>> {
    match find_crlf(&buf[1..]) {
        Some(pos) => {
            let s = std::str::from_utf8(&buf[1..1 + pos])
                .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            Ok(Some((s, 1 + pos + 2)))
        }
        None => Ok(None),
    }
}

/// Reads a decimal integer line following the prefix byte.
fn read_int_line(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    match read_line(buf)? {
        Some((s, consumed)) => {
            let n: i64 = s
                .parse()
                .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;
            Ok(Some((n, consumed)))
        }
        None => Ok(None),
    }
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Helper function to parse a single RESP message from bytes.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
