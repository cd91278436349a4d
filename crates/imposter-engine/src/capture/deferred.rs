//! Bounded single-consumer queue for work that must not block responses.
//!
//! Producers await only while the queue is full. A single worker task drains
//! items strictly in order; a failing item is logged and never reaches the
//! producer.

use crate::error::EngineError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// A unit of deferred work.
pub type DeferredTask = Box<dyn FnOnce() -> Result<(), EngineError> + Send + 'static>;

enum Message {
    Task { label: String, task: DeferredTask },
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct DeferredQueue {
    tx: mpsc::Sender<Message>,
}

impl DeferredQueue {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn start(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(Self::run(rx));
        debug!("Deferred queue started with capacity {}", capacity);
        Self { tx }
    }

    async fn run(mut rx: mpsc::Receiver<Message>) {
        while let Some(message) = rx.recv().await {
            match message {
                Message::Task { label, task } => {
                    if let Err(e) = task() {
                        error!("Deferred task '{}' failed: {}", label, e);
                    }
                }
                Message::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Deferred queue stopped");
    }

    /// Enqueue a task, waiting for space if the queue is full.
    pub async fn submit(&self, label: impl Into<String>, task: DeferredTask) {
        let label = label.into();
        if self
            .tx
            .send(Message::Task {
                label: label.clone(),
                task,
            })
            .await
            .is_err()
        {
            error!("Deferred queue is closed; dropping task '{}'", label);
        }
    }

    /// Wait until every task submitted before this call has run.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}
