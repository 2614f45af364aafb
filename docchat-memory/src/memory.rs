//! In-process history store.
//!
//! Useful for local runs and tests; nothing survives a restart.

use crate::traits::HistoryStore;
use crate::types::{Message, SessionHandle};
use async_trait::async_trait;
use docchat_common::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryHistoryStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    histories: RwLock<HashMap<SessionHandle, Vec<Message>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions with a stored history.
    pub async fn history_count(&self) -> usize {
        self.histories.read().await.len()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_session_handle(&self, email: &str) -> Result<Option<SessionHandle>> {
        Ok(self.sessions.read().await.get(email).cloned())
    }

    async fn upsert_session_handle(
        &self,
        email: &str,
        candidate: &SessionHandle,
    ) -> Result<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .entry(email.to_string())
            .or_insert_with(|| candidate.clone())
            .clone())
    }

    async fn load_messages(&self, handle: &SessionHandle) -> Result<Vec<Message>> {
        Ok(self
            .histories
            .read()
            .await
            .get(handle)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_messages(&self, handle: &SessionHandle, messages: &[Message]) -> Result<()> {
        self.histories
            .write()
            .await
            .insert(handle.clone(), messages.to_vec());
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_keeps_first_handle() {
        let store = MemoryHistoryStore::new();
        let first = SessionHandle::generate();
        let second = SessionHandle::generate();

        assert_eq!(store.upsert_session_handle("a@x.com", &first).await.unwrap(), first);
        assert_eq!(store.upsert_session_handle("a@x.com", &second).await.unwrap(), first);
    }

    #[tokio::test]
    async fn round_trip() {
        let store = MemoryHistoryStore::new();
        let handle = SessionHandle::generate();
        let seq = vec![Message::user("Hi"), Message::assistant("Hello")];

        assert!(store.load_messages(&handle).await.unwrap().is_empty());
        store.save_messages(&handle, &seq).await.unwrap();
        assert_eq!(store.load_messages(&handle).await.unwrap(), seq);
        assert_eq!(store.history_count().await, 1);
    }
}
