//! docchat memory - durable conversation history.
//!
//! This crate owns the conversation data model and the storage seam:
//! - `HistoryStore`: email → session handle binding and handle → message list
//! - SQLite backend for production
//! - In-process backend for tests and local runs
//!
//! ```text
//! ConversationCache ──flush──► HistoryStore ──► SQLite
//!        ▲                         │
//!        └────── load-through ─────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use memory::MemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;
pub use traits::HistoryStore;
pub use types::{Message, MessageRole, SessionHandle};
