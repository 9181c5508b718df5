//! Client Connections
//!
//! The glue between a socket and the command layer. Each accepted client is
//! served by its own Tokio task:
//!
//! ```text
//!  TcpListener::accept()            (main.rs)
//!          │ spawn
//!          ▼
//!  ConnectionHandler::run()
//!    bytes ──> RespParser ──> CommandHandler::execute ──> RespValue::serialize ──> bytes
//! ```
//!
//! Framing, buffering and pipelining live here; the command layer only ever
//! sees decoded values.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
