//! Command Layer
//!
//! Turns a decoded request array into a reply. The first element names the
//! command; the rest are its arguments. Validation failures come back as
//! `Error` replies rather than Rust errors, so the connection keeps going.
//!
//! `SET ... PX` is the only command that touches the [`ExpiryScheduler`]:
//! the store hands back a write version and a timer is registered for it.
//!
//! [`ExpiryScheduler`]: crate::storage::ExpiryScheduler

pub mod handler;

pub use handler::{CommandHandler, ERR_NOT_A_COMMAND};
