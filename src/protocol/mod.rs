//! RESP Protocol Implementation
//!
//! The value model and codec for the wire protocol spoken by quickkv.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum and its serialization (encode)
//! - `parser`: Incremental decoder for incoming RESP data
//!
//! ## Example
//!
//! ```
//! use quickkv::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::{RespKind, RespValue};
