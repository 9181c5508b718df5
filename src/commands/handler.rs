//! Command Handler
//!
//! Interprets a decoded request array as a command name plus arguments,
//! validates arity and argument types, and runs the command against the
//! storage engine.
//!
//! ## Supported Commands
//!
//! - `ECHO message` - Returns `message` unchanged
//! - `PING` - Returns `PONG`, arguments are ignored
//! - `SET key value [PX milliseconds]` - Stores a value, optionally with a TTL
//! - `GET key` - Returns the stored value or nil
//!
//! Command names are case-insensitive. Every failure is reported as an
//! `Error` reply; nothing here panics or closes the connection.

use crate::protocol::RespValue;
use crate::storage::{ExpiryScheduler, StorageEngine};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Reply for a malformed request or an unknown command.
pub const ERR_NOT_A_COMMAND: &str = "first argument must be a command";

/// Handles commands by dispatching them to the appropriate handlers.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    expiry: Arc<ExpiryScheduler>,
}

impl CommandHandler {
    /// Creates a new command handler over the given store and its expiry
    /// scheduler.
    pub fn new(storage: Arc<StorageEngine>, expiry: Arc<ExpiryScheduler>) -> Self {
        Self { storage, expiry }
    }

    /// Executes a request and returns the reply.
    ///
    /// # Panics
    ///
    /// A valid `SET ... PX` spawns its expiry timer with `tokio::spawn`, so
    /// it must run inside a Tokio runtime. Every other request, including a
    /// rejected PX, can be executed from plain threads.
    ///
    /// # Example
    ///
    /// ```
    /// use quickkv::commands::CommandHandler;
    /// use quickkv::protocol::RespValue;
    /// use quickkv::storage::{ExpiryScheduler, StorageEngine};
    /// use std::sync::Arc;
    ///
    /// let storage = Arc::new(StorageEngine::new());
    /// let expiry = Arc::new(ExpiryScheduler::new(Arc::clone(&storage)));
    /// let handler = CommandHandler::new(storage, expiry);
    ///
    /// let reply = handler.execute(RespValue::request("SET", ["foo", "bar"]));
    /// assert_eq!(reply.serialize(), b"+OK\r\n");
    ///
    /// let reply = handler.execute(RespValue::request("GET", ["foo"]));
    /// assert_eq!(reply.serialize(), b"$3\r\nbar\r\n");
    /// ```
    pub fn execute(&self, request: RespValue) -> RespValue {
        let args = match request.into_array() {
            Some(args) => args,
            None => return RespValue::error(ERR_NOT_A_COMMAND),
        };

        let mut args = args.into_iter();
        let name = match args.next() {
            Some(RespValue::BulkString(Some(name))) => name.to_ascii_uppercase(),
            _ => return RespValue::error(ERR_NOT_A_COMMAND),
        };

        self.dispatch(&name, args.collect())
    }

    /// Dispatches a command to its handler.
    fn dispatch(&self, cmd: &[u8], args: Vec<RespValue>) -> RespValue {
        trace!(
            command = %String::from_utf8_lossy(cmd),
            args = args.len(),
            "Dispatching command"
        );

        match cmd {
            b"ECHO" => self.cmd_echo(args),
            b"PING" => self.cmd_ping(args),
            b"SET" => self.cmd_set(args),
            b"GET" => self.cmd_get(args),
            _ => RespValue::error(ERR_NOT_A_COMMAND),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: Vec<RespValue>) -> RespValue {
        match <[RespValue; 1]>::try_from(args) {
            Ok([message]) => message,
            Err(_) => RespValue::error("invalid arguments count for ECHO"),
        }
    }

    /// PING
    fn cmd_ping(&self, _args: Vec<RespValue>) -> RespValue {
        RespValue::pong()
    }

    /// SET key value [PX milliseconds]
    fn cmd_set(&self, args: Vec<RespValue>) -> RespValue {
        let (key, value, px) = match <[RespValue; 2]>::try_from(args) {
            Ok([key, value]) => (key, value, None),
            Err(args) => match <[RespValue; 4]>::try_from(args) {
                Ok([key, value, option, ttl]) => (key, value, Some((option, ttl))),
                Err(_) => return RespValue::error("invalid arguments count for SET"),
            },
        };

        let key = match key_bytes(&key) {
            Some(key) => key,
            None => return RespValue::error("invalid key type for SET"),
        };

        let ttl = match px {
            Some((option, ttl)) => match parse_px(&option, &ttl) {
                Ok(ttl) => Some(ttl),
                Err(reply) => return reply,
            },
            None => None,
        };

        match ttl {
            Some(ttl) => {
                let version = self.storage.set_with_ttl(key.clone(), value, ttl);
                self.expiry.schedule_expiry(key, version, ttl);
            }
            None => {
                self.storage.set(key, value);
            }
        }

        RespValue::ok()
    }

    /// GET key
    fn cmd_get(&self, args: Vec<RespValue>) -> RespValue {
        let [key] = match <[RespValue; 1]>::try_from(args) {
            Ok(args) => args,
            Err(_) => return RespValue::error("invalid arguments count for GET"),
        };

        let key = match key_bytes(&key) {
            Some(key) => key,
            None => return RespValue::error("invalid key type for GET"),
        };

        self.storage.get(&key).unwrap_or_else(RespValue::null)
    }
}

/// Extracts a key from a SimpleString or a present BulkString.
fn key_bytes(value: &RespValue) -> Option<Bytes> {
    match value {
        RespValue::SimpleString(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
        RespValue::BulkString(Some(b)) => Some(b.clone()),
        RespValue::BulkString(None)
        | RespValue::Error(_)
        | RespValue::Integer(_)
        | RespValue::Array(_)
        | RespValue::NoReply => None,
    }
}

/// Validates the `PX <milliseconds>` pair of a SET.
fn parse_px(option: &RespValue, ttl: &RespValue) -> Result<Duration, RespValue> {
    match option {
        RespValue::BulkString(Some(opt)) if opt.eq_ignore_ascii_case(b"PX") => {}
        _ => return Err(RespValue::error("invalid option for SET")),
    }

    ttl.as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .ok_or_else(|| RespValue::error("invalid ttl value for PX option"))
}
