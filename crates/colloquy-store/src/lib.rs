//! # colloquy-store
//!
//! Durable, multi-backend persistence for conversation sessions and their
//! append-only event history.
//!
//! - **Backends**: SQLite, PostgreSQL, and MySQL behind one operation set,
//!   selected by connection URL
//! - **Dual schema layouts**: auto-detected legacy wide-column and modern
//!   single-JSON-column event representations, side by side, no migration
//! - **Three-tier state**: application / user / session scoping with
//!   key-prefix routing and a merged read view
//! - **Pooled connections**: bounded pool with overflow, acquire timeout,
//!   and recycle interval
//! - **Atomic appends**: event insert and state-delta routing commit as
//!   one transaction

#![deny(unsafe_code)]

pub mod config;
pub mod dialect;
pub mod error;
pub mod events;
pub mod pool;
pub mod row;
pub mod schema;
pub mod serializer;
pub mod sessions;
pub mod state;
pub mod store;

pub use config::{RetryConfig, StoreConfig};
pub use dialect::Dialect;
pub use error::{Result, StoreError};
pub use events::ListEventsOptions;
pub use schema::SchemaVersion;
pub use store::SessionStore;
