//! Principal → durable session handle.

use docchat_common::{Error, Result};
use docchat_memory::{HistoryStore, SessionHandle};
use std::sync::Arc;

/// Gives each principal one stable session handle, created on first use.
///
/// Creation is insert-if-absent: when two resolvers race for a new email,
/// the loser adopts the handle the winner stored instead of overwriting it.
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn HistoryStore>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Resolve the handle for `email`, creating it if none exists.
    ///
    /// Store failures surface as errors; a handle that could not be
    /// persisted is never handed out.
    pub async fn resolve(&self, email: &str) -> Result<SessionHandle> {
        if email.trim().is_empty() {
            return Err(Error::InvalidInput("email must not be empty".into()));
        }

        if let Some(existing) = self.store.get_session_handle(email).await? {
            return Ok(existing);
        }

        let candidate = SessionHandle::generate();
        let winner = self.store.upsert_session_handle(email, &candidate).await?;

        if winner == candidate {
            tracing::info!(session = %winner, "Created session handle");
        } else {
            tracing::debug!(session = %winner, "Lost session creation race, adopting stored handle");
        }

        Ok(winner)
    }
}
