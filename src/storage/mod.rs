//! Storage Module
//!
//! The shared key-value map and the timers that expire its entries.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ remove_if_version(key, version)
//!              ┌─────────────┴─────────────┐
//!              │     ExpiryScheduler       │
//!              │  (one Tokio task per TTL) │
//!              └───────────────────────────┘
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{Entry, StorageEngine, StorageStats};
pub use expiry::ExpiryScheduler;
