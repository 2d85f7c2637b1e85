//! Posts RPC method invocations onto a single dedicated task, so
//! `Callable::execute` — synchronous, and never meant to run concurrently
//! with itself — is always called from the same logical thread regardless
//! of how many I/O tasks are handling connections.
//!
//! Realizes "method invocation is posted to the main thread (a
//! single-threaded scheduler) and its result posted back to the I/O thread
//! for send" without introducing a second runtime: a bounded
//! `tokio::sync::mpsc` channel plus a `oneshot` reply per call.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use tapestry_core::{Callable, CallableError};

struct Job {
    callable: Callable,
    args: Vec<Value>,
    reply: oneshot::Sender<Result<Value, CallableError>>,
}

/// Handle to the engine task. Cloning shares the same underlying channel and
/// therefore the same serialized execution order.
#[derive(Clone)]
pub struct EngineTask {
    tx: mpsc::Sender<Job>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineTaskStopped;

impl std::fmt::Display for EngineTaskStopped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine task is no longer running")
    }
}

impl std::error::Error for EngineTaskStopped {}

impl EngineTask {
    /// Spawn the engine task with a bounded mailbox of `capacity` pending
    /// invocations. Requires a running Tokio runtime.
    pub fn spawn(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = job.callable.execute(job.args);
                let _ = job.reply.send(result);
            }
        });
        Self { tx }
    }

    /// Enqueue `callable(args)` and await its result. Serialized with every
    /// other call on this (or a cloned) handle.
    pub async fn invoke(&self, callable: Callable, args: Vec<Value>) -> Result<Value, CallableError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job { callable, args, reply: reply_tx })
            .await
            .map_err(|_| EngineTaskStopped.to_string())?;
        reply_rx.await.map_err(|_| EngineTaskStopped.to_string())?
    }
}
