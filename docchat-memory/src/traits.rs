//! Durable history storage trait.

use crate::types::{Message, SessionHandle};
use async_trait::async_trait;
use docchat_common::Result;

/// Durable key → message-list storage, plus the email → session handle binding.
///
/// Implementations report store unavailability as `Error::Persistence` and
/// undecodable stored content as `Error::Serialization`.
/// They must not panic: release builds abort on panic, which takes the
/// process down along with every unflushed turn.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Backend name (e.g., "sqlite", "memory")
    fn name(&self) -> &str;

    /// Look up the session handle bound to `email`.
    async fn get_session_handle(&self, email: &str) -> Result<Option<SessionHandle>>;

    /// Bind `candidate` to `email` unless a handle is already bound.
    ///
    /// First writer wins: returns whichever handle is bound after the call,
    /// which is `candidate` only if no earlier writer got there first.
    async fn upsert_session_handle(
        &self,
        email: &str,
        candidate: &SessionHandle,
    ) -> Result<SessionHandle>;

    /// Load the stored message sequence for a session, in conversation order.
    ///
    /// A session with no durable record yields an empty sequence.
    async fn load_messages(&self, handle: &SessionHandle) -> Result<Vec<Message>>;

    /// Replace the stored message sequence for a session.
    ///
    /// Last write wins for a given handle.
    async fn save_messages(&self, handle: &SessionHandle, messages: &[Message]) -> Result<()>;

    /// Whether the backend is reachable.
    async fn health_check(&self) -> bool;
}
