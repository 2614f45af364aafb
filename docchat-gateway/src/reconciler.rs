//! Background flush loop for the conversation cache.

use crate::cache::{ConversationCache, FlushReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Periodically writes dirty conversations to the durable store.
///
/// Runs independently of request handling; requests never wait on it.
/// Stopping performs one last flush before the task exits.
pub struct Reconciler {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Reconciler {
    /// Start flushing `cache` every `interval`.
    pub fn spawn(cache: Arc<ConversationCache>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval_ms = interval.as_millis() as u64, "Reconciler started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let Some(report) = run_cycle(&cache).await else { continue };
                        if report.failed > 0 {
                            tracing::warn!(
                                flushed = report.flushed,
                                failed = report.failed,
                                "Flush cycle left conversations dirty"
                            );
                        }
                    }
                }
            }

            if let Some(report) = run_cycle(&cache).await {
                tracing::info!(
                    flushed = report.flushed,
                    failed = report.failed,
                    "Reconciler stopped after final flush"
                );
            }
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Signal the loop to stop and wait for its final flush.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            // A closed channel means the loop already exited.
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Reconciler task failed");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    #[cfg(test)]
    pub(crate) fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// One flush cycle on its own task, so a store that panics costs the cycle
/// and not the loop. Entries it was writing stay dirty for the next tick.
async fn run_cycle(cache: &Arc<ConversationCache>) -> Option<FlushReport> {
    let cache = Arc::clone(cache);
    match tokio::spawn(async move { cache.flush_all().await }).await {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::error!(error = %e, "Flush cycle aborted");
            None
        }
    }
}
