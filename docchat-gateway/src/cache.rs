//! Write-back conversation cache.
//!
//! Turns are appended in memory and reach the [`HistoryStore`] only when
//! [`ConversationCache::flush_all`] runs (periodically from the reconciler
//! and once more at shutdown).
//!
//! Dirtiness is tracked as a revision pair rather than a bare flag: every
//! append bumps `revision`, and a successful write records the revision it
//! serialized. A turn appended while its session is being written therefore
//! leaves the entry dirty for the next cycle.

use chrono::{DateTime, Utc};
use docchat_common::{Error, Result};
use docchat_memory::{HistoryStore, Message, SessionHandle};
use lru::LruCache;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Read-only view of a resident conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationEntry {
    pub session_handle: SessionHandle,
    pub messages: Vec<Message>,
    pub dirty: bool,
    pub last_flushed_at: Option<DateTime<Utc>>,
}

struct ResidentEntry {
    messages: Vec<Message>,
    revision: u64,
    flushed_revision: u64,
    last_flushed_at: Option<DateTime<Utc>>,
}

impl ResidentEntry {
    fn loaded(messages: Vec<Message>) -> Self {
        Self {
            messages,
            revision: 0,
            flushed_revision: 0,
            last_flushed_at: None,
        }
    }

    fn extend<I: IntoIterator<Item = Message>>(&mut self, messages: I) {
        let before = self.messages.len();
        self.messages.extend(messages);
        if self.messages.len() > before {
            self.revision += 1;
        }
    }

    fn is_dirty(&self) -> bool {
        self.revision != self.flushed_revision
    }

    fn view(&self, handle: &SessionHandle) -> ConversationEntry {
        ConversationEntry {
            session_handle: handle.clone(),
            messages: self.messages.clone(),
            dirty: self.is_dirty(),
            last_flushed_at: self.last_flushed_at,
        }
    }
}

/// Outcome of one flush cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Dirty entries written and marked clean.
    pub flushed: usize,
    /// Dirty entries whose write failed; still dirty.
    pub failed: usize,
    /// Entries with nothing to write.
    pub skipped: usize,
}

pub struct ConversationCache {
    store: Arc<dyn HistoryStore>,
    entries: Mutex<LruCache<SessionHandle, ResidentEntry>>,
    max_resident: Option<usize>,
    // Serializes flush cycles so an older snapshot never lands after a newer one.
    flush_gate: Mutex<()>,
}

impl ConversationCache {
    /// Cache over `store` that keeps every conversation resident.
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self::with_capacity(store, None)
    }

    /// Cache over `store`; with `Some(cap)`, clean entries beyond `cap` are
    /// evicted least-recently-used first. Dirty entries are never evicted.
    pub fn with_capacity(store: Arc<dyn HistoryStore>, max_resident: Option<usize>) -> Self {
        Self {
            store,
            entries: Mutex::new(LruCache::unbounded()),
            max_resident,
            flush_gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Resident entry for `handle`, loading it from the store on a miss.
    ///
    /// A session with no durable record starts empty. Never waits on a flush.
    pub async fn get_or_load(&self, handle: &SessionHandle) -> Result<ConversationEntry> {
        if let Some(entry) = self.entries.lock().await.get(handle) {
            return Ok(entry.view(handle));
        }

        let loaded = self.store.load_messages(handle).await.map_err(|e| {
            tracing::warn!(session = %handle, error = %e, "Failed to load conversation history");
            e
        })?;

        let mut entries = self.entries.lock().await;
        // Another task may have loaded and appended while the store was read.
        if !entries.contains(handle) {
            tracing::debug!(session = %handle, messages = loaded.len(), "Conversation loaded");
            entries.put(handle.clone(), ResidentEntry::loaded(loaded));
            self.evict_clean(&mut entries, handle);
        }

        entries
            .get(handle)
            .map(|entry| entry.view(handle))
            .ok_or_else(|| Error::Internal(format!("session {handle} vanished after load")))
    }

    /// Append one message to a resident conversation.
    pub async fn append(&self, handle: &SessionHandle, message: Message) -> Result<()> {
        self.append_all(handle, [message]).await
    }

    /// Append messages to a resident conversation as one contiguous run.
    ///
    /// In-memory only; fails with `NotFound` if the session is not resident.
    pub async fn append_all<I>(&self, handle: &SessionHandle, messages: I) -> Result<()>
    where
        I: IntoIterator<Item = Message>,
    {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(handle)
            .ok_or_else(|| Error::NotFound(format!("session {handle} is not resident")))?;

        entry.extend(messages);
        Ok(())
    }

    /// Append messages, loading the conversation first if it is not resident.
    ///
    /// The append happens under the same lock that makes the entry resident,
    /// so a concurrent load of another session cannot evict it in between.
    pub async fn load_and_append<I>(&self, handle: &SessionHandle, messages: I) -> Result<()>
    where
        I: IntoIterator<Item = Message>,
    {
        let messages: Vec<Message> = messages.into_iter().collect();
        let mut loaded: Option<Vec<Message>> = None;

        loop {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(handle) {
                entry.extend(messages);
                return Ok(());
            }

            if let Some(history) = loaded.take() {
                tracing::debug!(session = %handle, messages = history.len(), "Conversation loaded");
                let mut entry = ResidentEntry::loaded(history);
                entry.extend(messages);
                entries.put(handle.clone(), entry);
                self.evict_clean(&mut entries, handle);
                return Ok(());
            }
            drop(entries);

            loaded = Some(self.store.load_messages(handle).await.map_err(|e| {
                tracing::warn!(session = %handle, error = %e, "Failed to load conversation history");
                e
            })?);
        }
    }

    /// Write every dirty entry to the store.
    ///
    /// Per-entry failures are logged and left dirty for the next cycle;
    /// they never abort the cycle.
    pub async fn flush_all(&self) -> FlushReport {
        let _gate = self.flush_gate.lock().await;
        let mut report = FlushReport::default();

        let pending: Vec<(SessionHandle, Vec<Message>, u64)> = {
            let entries = self.entries.lock().await;
            let mut pending = Vec::new();
            for (handle, entry) in entries.iter() {
                if !entry.is_dirty() || entry.messages.is_empty() {
                    report.skipped += 1;
                    continue;
                }
                pending.push((handle.clone(), entry.messages.clone(), entry.revision));
            }
            pending
        };

        for (handle, messages, revision) in pending {
            match self.store.save_messages(&handle, &messages).await {
                Ok(()) => {
                    let mut entries = self.entries.lock().await;
                    if let Some(entry) = entries.peek_mut(&handle) {
                        entry.flushed_revision = entry.flushed_revision.max(revision);
                        entry.last_flushed_at = Some(Utc::now());
                    }
                    report.flushed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        session = %handle,
                        messages = messages.len(),
                        error = %e,
                        "Failed to flush conversation, will retry next cycle"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            flushed = report.flushed,
            failed = report.failed,
            skipped = report.skipped,
            "Flush cycle complete"
        );
        report
    }

    /// Whether `handle` has unflushed turns; `None` if not resident.
    pub async fn is_dirty(&self, handle: &SessionHandle) -> Option<bool> {
        self.entries.lock().await.peek(handle).map(ResidentEntry::is_dirty)
    }

    pub async fn resident_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn dirty_count(&self) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|(_, entry)| entry.is_dirty())
            .count()
    }

    fn evict_clean(&self, entries: &mut LruCache<SessionHandle, ResidentEntry>, keep: &SessionHandle) {
        let Some(cap) = self.max_resident else {
            return;
        };

        while entries.len() > cap {
            let victim = entries
                .iter()
                .rev()
                .find(|(handle, entry)| *handle != keep && !entry.is_dirty())
                .map(|(handle, _)| handle.clone());

            match victim {
                Some(handle) => {
                    entries.pop(&handle);
                    tracing::debug!(session = %handle, "Evicted clean conversation");
                }
                None => {
                    tracing::warn!(
                        resident = entries.len(),
                        cap,
                        "Resident conversations over cap; remaining entries are dirty"
                    );
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docchat_memory::MemoryHistoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn cache() -> (Arc<MemoryHistoryStore>, ConversationCache) {
        let store = Arc::new(MemoryHistoryStore::new());
        let cache = ConversationCache::new(store.clone());
        (store, cache)
    }

    #[tokio::test]
    async fn cold_session_starts_empty_and_clean() {
        let (_store, cache) = cache();
        let handle = SessionHandle::generate();
        let entry = cache.get_or_load(&handle).await.unwrap();
        assert!(entry.messages.is_empty());
        assert!(!entry.dirty);
        assert!(entry.last_flushed_at.is_none());
    }

    #[tokio::test]
    async fn load_through_uses_stored_history() {
        let (store, cache) = cache();
        let handle = SessionHandle::generate();
        let stored = vec![Message::user("earlier"), Message::assistant("reply")];
        store.save_messages(&handle, &stored).await.unwrap();

        let entry = cache.get_or_load(&handle).await.unwrap();
        assert_eq!(entry.messages, stored);
        assert!(!entry.dirty);
    }

    #[tokio::test]
    async fn appends_are_visible_in_order_before_flush() {
        let (store, cache) = cache();
        let handle = SessionHandle::generate();
        cache.get_or_load(&handle).await.unwrap();

        let seq: Vec<Message> = (0..5).map(|i| Message::user(format!("m{i}"))).collect();
        for m in &seq {
            cache.append(&handle, m.clone()).await.unwrap();
        }

        let entry = cache.get_or_load(&handle).await.unwrap();
        assert_eq!(entry.messages, seq);
        assert!(entry.dirty);
        assert!(store.load_messages(&handle).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_requires_resident_session() {
        let (_store, cache) = cache();
        let err = cache
            .append(&SessionHandle::generate(), Message::user("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn flush_persists_and_clears_dirty() {
        let (store, cache) = cache();
        let handle = SessionHandle::generate();
        cache.get_or_load(&handle).await.unwrap();
        cache.append(&handle, Message::user("Hi")).await.unwrap();

        let report = cache.flush_all().await;
        assert_eq!(report.flushed, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(cache.is_dirty(&handle).await, Some(false));
        assert_eq!(store.load_messages(&handle).await.unwrap().len(), 1);

        let entry = cache.get_or_load(&handle).await.unwrap();
        assert!(entry.last_flushed_at.is_some());
    }

    #[tokio::test]
    async fn clean_and_empty_entries_are_skipped() {
        let (store, cache) = cache();
        let empty = SessionHandle::generate();
        cache.get_or_load(&empty).await.unwrap();
        cache.append_all(&empty, Vec::new()).await.unwrap();

        let report = cache.flush_all().await;
        assert_eq!(report, FlushReport { flushed: 0, failed: 0, skipped: 1 });
        assert_eq!(store.history_count().await, 0);
    }

    #[tokio::test]
    async fn second_flush_is_a_no_op() {
        let (_store, cache) = cache();
        let handle = SessionHandle::generate();
        cache.get_or_load(&handle).await.unwrap();
        cache.append(&handle, Message::user("once")).await.unwrap();

        assert_eq!(cache.flush_all().await.flushed, 1);
        assert_eq!(cache.flush_all().await.flushed, 0);
    }

    #[tokio::test]
    async fn eviction_only_takes_clean_entries() {
        let store = Arc::new(MemoryHistoryStore::new());
        let cache = ConversationCache::with_capacity(store, Some(2));

        let a = SessionHandle::from("a");
        let b = SessionHandle::from("b");
        let c = SessionHandle::from("c");

        cache.get_or_load(&a).await.unwrap();
        cache.append(&a, Message::user("dirty")).await.unwrap();
        cache.get_or_load(&b).await.unwrap();
        cache.get_or_load(&c).await.unwrap();

        // `a` is least recently used but dirty, so clean `b` goes instead.
        assert_eq!(cache.resident_count().await, 2);
        assert_eq!(cache.is_dirty(&a).await, Some(true));
        assert_eq!(cache.is_dirty(&b).await, None);
        assert_eq!(cache.is_dirty(&c).await, Some(false));
    }

    #[tokio::test]
    async fn evicted_session_reloads_from_store() {
        let store = Arc::new(MemoryHistoryStore::new());
        let cache = ConversationCache::with_capacity(store, Some(1));

        let a = SessionHandle::from("a");
        cache.get_or_load(&a).await.unwrap();
        cache.append(&a, Message::user("keep me")).await.unwrap();
        cache.flush_all().await;

        cache.get_or_load(&SessionHandle::from("b")).await.unwrap();
        assert_eq!(cache.is_dirty(&a).await, None);

        let entry = cache.get_or_load(&a).await.unwrap();
        assert_eq!(entry.messages.len(), 1);
        assert_eq!(entry.messages[0].content, "keep me");
    }

    #[tokio::test]
    async fn over_cap_with_only_dirty_entries_keeps_them() {
        let store = Arc::new(MemoryHistoryStore::new());
        let cache = ConversationCache::with_capacity(store, Some(1));

        let a = SessionHandle::from("a");
        let b = SessionHandle::from("b");
        cache.get_or_load(&a).await.unwrap();
        cache.append(&a, Message::user("x")).await.unwrap();
        cache.get_or_load(&b).await.unwrap();

        assert_eq!(cache.resident_count().await, 2);
        assert_eq!(cache.dirty_count().await, 1);
    }

    /// Memory store whose loads yield first; the first load can be held open.
    #[derive(Default)]
    struct SlowStore {
        inner: MemoryHistoryStore,
        hold_first_load: Option<(Arc<Notify>, Arc<Notify>)>,
        loads: AtomicUsize,
    }

    impl SlowStore {
        fn holding_first_load(entered: Arc<Notify>, release: Arc<Notify>) -> Self {
            Self {
                hold_first_load: Some((entered, release)),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl HistoryStore for SlowStore {
        fn name(&self) -> &str {
            "slow"
        }
        async fn get_session_handle(&self, email: &str) -> Result<Option<SessionHandle>> {
            self.inner.get_session_handle(email).await
        }
        async fn upsert_session_handle(
            &self,
            email: &str,
            candidate: &SessionHandle,
        ) -> Result<SessionHandle> {
            self.inner.upsert_session_handle(email, candidate).await
        }
        async fn load_messages(&self, handle: &SessionHandle) -> Result<Vec<Message>> {
            let nth = self.loads.fetch_add(1, Ordering::SeqCst);
            if let (0, Some((entered, release))) = (nth, &self.hold_first_load) {
                entered.notify_one();
                release.notified().await;
            }
            tokio::task::yield_now().await;
            self.inner.load_messages(handle).await
        }
        async fn save_messages(&self, handle: &SessionHandle, messages: &[Message]) -> Result<()> {
            self.inner.save_messages(handle, messages).await
        }
        async fn health_check(&self) -> bool {
            true
        }
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn turn_survives_concurrent_loads_under_cap() {
        let cache = Arc::new(ConversationCache::with_capacity(
            Arc::new(SlowStore::default()),
            Some(1),
        ));

        for i in 0..200 {
            let turn = SessionHandle::from(format!("turn-{i}"));
            let others: Vec<_> = (0..4)
                .map(|j| {
                    let cache = Arc::clone(&cache);
                    let other = SessionHandle::from(format!("other-{i}-{j}"));
                    tokio::spawn(async move { cache.get_or_load(&other).await.map(|_| ()) })
                })
                .collect();

            let appended = cache
                .load_and_append(&turn, [Message::user("q"), Message::assistant("a")])
                .await;
            assert!(appended.is_ok(), "iteration {i}: {appended:?}");

            for other in others {
                other.await.unwrap().unwrap();
            }
            assert_eq!(cache.is_dirty(&turn).await, Some(true), "iteration {i}");
            cache.flush_all().await;
        }
    }

    #[tokio::test]
    async fn slow_load_keeps_append_made_meanwhile() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let store = Arc::new(SlowStore::holding_first_load(entered.clone(), release.clone()));
        let handle = SessionHandle::from("shared");
        store
            .inner
            .save_messages(&handle, &[Message::user("stored")])
            .await
            .unwrap();
        let cache = Arc::new(ConversationCache::new(store));

        let slow = tokio::spawn({
            let cache = Arc::clone(&cache);
            let handle = handle.clone();
            async move { cache.get_or_load(&handle).await }
        });
        entered.notified().await;

        // A second reader gets past the held load and appends.
        cache.get_or_load(&handle).await.unwrap();
        cache.append(&handle, Message::user("fresh")).await.unwrap();
        release.notify_one();

        let entry = slow.await.unwrap().unwrap();
        assert_eq!(contents(&entry.messages), vec!["stored", "fresh"]);
        assert!(entry.dirty);
    }

    #[tokio::test]
    async fn load_and_append_joins_entry_loaded_meanwhile() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let store = Arc::new(SlowStore::holding_first_load(entered.clone(), release.clone()));
        let handle = SessionHandle::from("shared");
        store
            .inner
            .save_messages(&handle, &[Message::user("stored")])
            .await
            .unwrap();
        let cache = Arc::new(ConversationCache::new(store));

        let slow = tokio::spawn({
            let cache = Arc::clone(&cache);
            let handle = handle.clone();
            async move {
                cache
                    .load_and_append(&handle, [Message::assistant("late")])
                    .await
            }
        });
        entered.notified().await;

        cache.get_or_load(&handle).await.unwrap();
        cache.append(&handle, Message::user("fresh")).await.unwrap();
        release.notify_one();

        slow.await.unwrap().unwrap();
        let entry = cache.get_or_load(&handle).await.unwrap();
        assert_eq!(contents(&entry.messages), vec!["stored", "fresh", "late"]);
    }

    #[tokio::test]
    async fn load_and_append_on_cold_session_keeps_history() {
        let (store, cache) = cache();
        let handle = SessionHandle::generate();
        store
            .save_messages(&handle, &[Message::user("earlier")])
            .await
            .unwrap();

        cache
            .load_and_append(&handle, [Message::user("now")])
            .await
            .unwrap();

        let entry = cache.get_or_load(&handle).await.unwrap();
        assert_eq!(contents(&entry.messages), vec!["earlier", "now"]);
        assert!(entry.dirty);
    }
}
