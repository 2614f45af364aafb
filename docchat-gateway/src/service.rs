//! Facade over the gateway components, as seen by a request handler.
//!
//! A turn goes: [`ConversationService::authenticate`] →
//! [`ConversationService::get_session`] →
//! [`ConversationService::get_context_window`] → (model call, elsewhere) →
//! [`ConversationService::record_turn`].

use crate::assembler::ConversationAssembler;
use crate::auth::{AuthError, IdentityVerifier, Principal, TokenVerifier};
use crate::cache::{ConversationCache, FlushReport};
use crate::reconciler::Reconciler;
use crate::session::SessionResolver;
use crate::tokenizer::{TiktokenCounter, TokenCounter};
use docchat_common::config::HistoryBackend;
use docchat_common::{Config, Error, Result};
use docchat_memory::{
    HistoryStore, MemoryHistoryStore, Message, MessageRole, SessionHandle, SqliteHistoryStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct ConversationService {
    verifier: Arc<dyn TokenVerifier>,
    resolver: SessionResolver,
    cache: Arc<ConversationCache>,
    assembler: ConversationAssembler,
    flush_interval: Duration,
    default_budget: usize,
    reconciler: Mutex<Option<Reconciler>>,
}

impl ConversationService {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        store: Arc<dyn HistoryStore>,
        counter: Arc<dyn TokenCounter>,
        flush_interval: Duration,
        default_budget: usize,
        max_resident: Option<usize>,
    ) -> Self {
        Self {
            verifier,
            resolver: SessionResolver::new(Arc::clone(&store)),
            cache: Arc::new(ConversationCache::with_capacity(store, max_resident)),
            assembler: ConversationAssembler::new(counter),
            flush_interval,
            default_budget,
            reconciler: Mutex::new(None),
        }
    }

    /// Wire up the production components described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn HistoryStore> = match config.history.backend {
            HistoryBackend::Sqlite => Arc::new(SqliteHistoryStore::open(&config.history.db_path())?),
            HistoryBackend::Memory => {
                tracing::warn!("Using in-process history store; conversations are lost on exit");
                Arc::new(MemoryHistoryStore::new())
            }
        };
        tracing::info!(backend = store.name(), "History store ready");

        Ok(Self::new(
            Arc::new(IdentityVerifier::new(&config.auth)?),
            store,
            Arc::new(TiktokenCounter::for_model(&config.assembler.model)?),
            config.history.flush_interval(),
            config.assembler.max_context_tokens,
            config.history.max_resident_sessions,
        ))
    }

    pub async fn authenticate(&self, token: &str) -> std::result::Result<Principal, AuthError> {
        self.verifier.verify(token).await
    }

    pub async fn get_session(&self, principal: &Principal) -> Result<SessionHandle> {
        self.resolver.resolve(&principal.email).await
    }

    /// Append one completed exchange to the session's history.
    ///
    /// Both messages land together and in order; persistence happens on the
    /// next flush.
    pub async fn record_turn(
        &self,
        handle: &SessionHandle,
        user_message: Message,
        assistant_message: Message,
    ) -> Result<()> {
        if user_message.role != MessageRole::User {
            return Err(Error::InvalidInput(format!(
                "expected a user message, got {}",
                user_message.role
            )));
        }
        if assistant_message.role != MessageRole::Assistant {
            return Err(Error::InvalidInput(format!(
                "expected an assistant message, got {}",
                assistant_message.role
            )));
        }

        self.cache
            .load_and_append(handle, [user_message, assistant_message])
            .await
    }

    /// Newest messages of the session that fit `budget` tokens.
    pub async fn get_context_window(
        &self,
        handle: &SessionHandle,
        budget: usize,
    ) -> Result<Vec<Message>> {
        let entry = self.cache.get_or_load(handle).await?;
        Ok(self.assembler.trim(&entry.messages, budget))
    }

    pub fn default_budget(&self) -> usize {
        self.default_budget
    }

    pub fn cache(&self) -> &Arc<ConversationCache> {
        &self.cache
    }

    /// Start the background reconciler. Calling twice is a no-op.
    pub async fn start(&self) {
        let mut reconciler = self.reconciler.lock().await;
        if reconciler.is_none() {
            *reconciler = Some(Reconciler::spawn(
                Arc::clone(&self.cache),
                self.flush_interval,
            ));
        }
    }

    /// Stop the reconciler, flushing whatever is still dirty.
    pub async fn stop(&self) {
        let running = self.reconciler.lock().await.take();
        match running {
            Some(mut reconciler) => reconciler.stop().await,
            None => {
                let report: FlushReport = self.cache.flush_all().await;
                tracing::info!(flushed = report.flushed, failed = report.failed, "Final flush");
            }
        }
    }

    /// False when the store is unreachable or a started reconciler has died.
    pub async fn health_check(&self) -> bool {
        let reconciler_dead = matches!(
            self.reconciler.lock().await.as_ref(),
            Some(reconciler) if !reconciler.is_running()
        );
        if reconciler_dead {
            tracing::error!("Reconciler is no longer running");
            return false;
        }
        self.cache.store().health_check().await
    }
}
