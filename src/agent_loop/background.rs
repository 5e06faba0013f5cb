//! Detached background work with its own failure channel.
//!
//! Jobs run in FIFO order on one worker task. The turn enqueues and moves on;
//! a failed job is logged and reported on the failure channel, never to the
//! live event stream.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ScriptoriumError;
use crate::types::ChatMessage;

type Job = BoxFuture<'static, Result<(), ScriptoriumError>>;

/// A background job that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundFailure {
    pub label: String,
    pub error: String,
}

#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

/// Handle for scheduling background jobs.
#[derive(Clone)]
pub struct BackgroundQueue {
    tx: mpsc::UnboundedSender<(String, Job)>,
    pending: Arc<Pending>,
}

impl std::fmt::Debug for BackgroundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundQueue")
            .field("pending", &self.pending.count.load(Ordering::SeqCst))
            .finish()
    }
}

impl BackgroundQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn start() -> (
        Self,
        mpsc::UnboundedReceiver<BackgroundFailure>,
        JoinHandle<()>,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Job)>();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending::default());

        let worker_pending = pending.clone();
        let worker = tokio::spawn(async move {
            while let Some((label, job)) = rx.recv().await {
                match job.await {
                    Ok(()) => debug!(job = %label, "background job finished"),
                    Err(err) => {
                        warn!(job = %label, error = %err, "background job failed");
                        let _ = failure_tx.send(BackgroundFailure {
                            label,
                            error: err.to_string(),
                        });
                    }
                }
                if worker_pending.count.fetch_sub(1, Ordering::SeqCst) == 1 {
                    worker_pending.idle.notify_waiters();
                }
            }
        });

        (Self { tx, pending }, failure_rx, worker)
    }

    /// Schedule a job. Returns false if the worker has stopped.
    pub fn enqueue<F>(&self, label: impl Into<String>, job: F) -> bool
    where
        F: Future<Output = Result<(), ScriptoriumError>> + Send + 'static,
    {
        let label = label.into();
        self.pending.count.fetch_add(1, Ordering::SeqCst);
        if self.tx.send((label.clone(), job.boxed())).is_err() {
            self.pending.count.fetch_sub(1, Ordering::SeqCst);
            warn!(job = %label, "background worker stopped; job discarded");
            return false;
        }
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Wait until every job enqueued so far has finished.
    pub async fn drained(&self) {
        loop {
            let notified = self.pending.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Persistence of conversation messages. Owned by the calling layer.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
    ) -> Result<(), ScriptoriumError>;
}

/// Queue a message for persistence without waiting for it.
pub fn persist_in_background(
    queue: &BackgroundQueue,
    store: Arc<dyn ConversationStore>,
    conversation_id: &str,
    message: ChatMessage,
) -> bool {
    let conversation_id = conversation_id.to_string();
    let label = format!("persist {} message", message.role.as_str());
    queue.enqueue(label, async move {
        store.append_message(&conversation_id, &message).await
    })
}

/// In-memory store keyed by conversation id.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    conversations: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
    ) -> Result<(), ScriptoriumError> {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }
}
