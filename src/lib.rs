//! # quickkv - A Minimal In-Memory Key-Value Server
//!
//! quickkv speaks the Redis serialization protocol (RESP) and implements a
//! small command set over one shared in-memory map with per-key expiry.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             quickkv                              │
//! │                                                                  │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐           │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │           │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │           │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘           │
//! │                            │                  │                  │
//! │                     ┌──────┴──────┐           ▼                  │
//! │                     │ RESP codec  │    ┌──────────────────────┐  │
//! │                     └─────────────┘    │    StorageEngine     │  │
//! │                                        │ 64 RwLock shards of  │  │
//! │                                        │ versioned entries    │  │
//! │                                        └──────────▲───────────┘  │
//! │                                                   │              │
//! │                                        ┌──────────┴───────────┐  │
//! │                                        │   ExpiryScheduler    │  │
//! │                                        │ one timer per PX SET │  │
//! │                                        └──────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use quickkv::commands::CommandHandler;
//! use quickkv::config::DEFAULT_MAX_BUFFER;
//! use quickkv::connection::{handle_connection, ConnectionStats};
//! use quickkv::storage::{ExpiryScheduler, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = Arc::new(StorageEngine::new());
//!     let expiry = Arc::new(ExpiryScheduler::new(Arc::clone(&storage)));
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await.unwrap();
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         let handler = CommandHandler::new(Arc::clone(&storage), Arc::clone(&expiry));
//!         let stats = Arc::clone(&stats);
//!
//!         tokio::spawn(handle_connection(stream, addr, handler, stats, DEFAULT_MAX_BUFFER));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message`
//! - `SET key value [PX milliseconds]`
//! - `GET key`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP value model, encoder and decoder
//! - [`commands`]: Request validation and dispatch
//! - [`storage`]: Sharded store and expiry timers
//! - [`connection`]: Client connection management
//! - [`config`]: Command-line configuration
//!
//! ## Expiry
//!
//! A `SET ... PX` stores the entry with a deadline and a fresh write version,
//! then spawns a timer for that version. A later SET of the same key gets a
//! new version, so the old timer finds a mismatch and leaves the key alone.
//! Reads also drop entries whose deadline has passed.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;

pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{ExpiryScheduler, StorageEngine};

/// The default port quickkv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host quickkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of quickkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
