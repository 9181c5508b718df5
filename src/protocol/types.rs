//! RESP Value Types
//!
//! This module defines the closed set of values that travel over the wire,
//! together with their canonical serialization.
//!
//! ## Protocol Format
//!
//! Each value starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String (`$-1` is nil)
//! - `*` Array (`*-1` is the nil array)
//!
//! All of the above are terminated with CRLF (`\r\n`). The keep-alive marker is
//! a single bare `\n` byte and carries no payload.
//!
//! ## Examples
//!
//! Simple String: `+OK\r\n`
//! Error: `-invalid key type for SET\r\n`
//! Integer: `:1000\r\n`
//! Bulk String: `$5\r\nhello\r\n`
//! Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//! Nil Bulk String: `$-1\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
    pub const NO_REPLY: u8 = b'\n';
}

/// The variant tag of a [`RespValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RespKind {
    SimpleString,
    Error,
    Integer,
    BulkString,
    Array,
    NoReply,
}

impl RespKind {
    /// The wire prefix byte for this kind.
    pub fn prefix(self) -> u8 {
        match self {
            RespKind::SimpleString => prefix::SIMPLE_STRING,
            RespKind::Error => prefix::ERROR,
            RespKind::Integer => prefix::INTEGER,
            RespKind::BulkString => prefix::BULK_STRING,
            RespKind::Array => prefix::ARRAY,
            RespKind::NoReply => prefix::NO_REPLY,
        }
    }
}

impl fmt::Display for RespKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RespKind::SimpleString => "<string>",
            RespKind::Error => "<error>",
            RespKind::Integer => "<int>",
            RespKind::BulkString => "<bulkbytes>",
            RespKind::Array => "<array>",
            RespKind::NoReply => "<ping>",
        };
        f.write_str(name)
    }
}

/// Represents a value in the RESP protocol.
///
/// The same type is used for decoded requests, stored values and replies.
/// A SET stores its value argument verbatim, so any variant can live in the
/// store and come back out of a GET unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe text without CR or LF.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// Error message.
    /// Format: `-<error message>\r\n`
    Error(String),

    /// 64-bit signed integer.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe string. `None` is the nil bulk string, which means absence
    /// and is distinct from an empty payload.
    /// Format: `$<length>\r\n<data>\r\n`, nil: `$-1\r\n`
    BulkString(Option<Bytes>),

    /// Ordered sequence of values, possibly nested. `None` is the nil array.
    /// Format: `*<count>\r\n<element1><element2>...`, nil: `*-1\r\n`
    Array(Option<Vec<RespValue>>),

    /// Keep-alive marker. Format: `\n`
    NoReply,
}

impl RespValue {
    /// Creates a new simple string value.
    ///
    /// # Example
    /// ```
    /// use quickkv::protocol::types::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// assert_eq!(ok.serialize(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates a new error value.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Creates a new integer value.
    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a present bulk string.
    ///
    /// # Example
    /// ```
    /// use quickkv::protocol::types::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// assert_eq!(bulk.serialize(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    /// Creates the nil bulk string.
    pub fn null() -> Self {
        RespValue::BulkString(None)
    }

    /// Creates an array value.
    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(Some(values))
    }

    /// Creates the nil array.
    pub fn null_array() -> Self {
        RespValue::Array(None)
    }

    /// Creates the keep-alive marker.
    pub fn no_reply() -> Self {
        RespValue::NoReply
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Common response for PONG
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Builds a request array of bulk strings from a command name and arguments.
    ///
    /// # Example
    /// ```
    /// use quickkv::protocol::types::RespValue;
    /// let req = RespValue::request("GET", ["foo"]);
    /// assert_eq!(req.serialize(), b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
    /// ```
    pub fn request<I, A>(cmd: &str, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let mut values = vec![RespValue::bulk_string(Bytes::copy_from_slice(
            cmd.as_bytes(),
        ))];
        values.extend(
            args.into_iter()
                .map(|a| RespValue::bulk_string(Bytes::copy_from_slice(a.as_ref()))),
        );
        RespValue::Array(Some(values))
    }

    /// Returns the variant tag.
    pub fn kind(&self) -> RespKind {
        match self {
            RespValue::SimpleString(_) => RespKind::SimpleString,
            RespValue::Error(_) => RespKind::Error,
            RespValue::Integer(_) => RespKind::Integer,
            RespValue::BulkString(_) => RespKind::BulkString,
            RespValue::Array(_) => RespKind::Array,
            RespValue::NoReply => RespKind::NoReply,
        }
    }

    /// Serializes the value to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    ///
    /// This is more efficient than `serialize()` when you want to reuse a buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::BulkString(Some(data)) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::BulkString(None) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(Some(values)) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
            RespValue::Array(None) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            RespValue::NoReply => buf.push(prefix::NO_REPLY),
        }
    }

    /// Returns true for the nil bulk string and the nil array.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::BulkString(None) | RespValue::Array(None))
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Attempts to extract the inner string from SimpleString or BulkString.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(Some(b)) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Consumes self and returns the elements if this is a non-nil array.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(Some(arr)) => Some(arr),
            _ => None,
        }
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "\"{}\"", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(Some(data)) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            RespValue::BulkString(None) | RespValue::Array(None) => write!(f, "(nil)"),
            RespValue::Array(Some(values)) => {
                if values.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    writeln!(f)?;
                    for (i, v) in values.iter().enumerate() {
                        writeln!(f, "{}) {}", i + 1, v)?;
                    }
                    Ok(())
                }
            }
            RespValue::NoReply => write!(f, "(no reply)"),
        }
    }
}
