//! # colloquy-core
//!
//! Foundation types for the colloquy session persistence engine.
//!
//! This crate provides the shared vocabulary the store crate builds on:
//!
//! - **Branded IDs**: `SessionId`, `EventId`, `InvocationId` as newtypes for type safety
//! - **Content**: `Content` and `Part` — the role + parts payload of a conversation event
//! - **Events**: `Event` with actions (state/artifact deltas), streaming flags, token usage
//! - **Sessions**: `Session` keyed by (application, user, session id)
//! - **State**: three-tier state maps with explicit key-prefix scope dispatch
//! - **Time**: microsecond-precision UTC timestamps in the store's persisted format

#![deny(unsafe_code)]

pub mod content;
pub mod event;
pub mod ids;
pub mod session;
pub mod state;
pub mod time;

pub use content::{Content, Part};
pub use event::{ActionPayload, Event, EventActions, TokenUsage};
pub use ids::{EventId, InvocationId, SessionId};
pub use session::Session;
pub use state::{merge_state, split_delta, SplitDelta, StateMap, StateScope};
