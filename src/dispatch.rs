//! Dispatch queue – serializes transitions so at most one is in flight.
//!
//! Messages from the network and from local input are appended to one FIFO.
//! The first entry that finds no active drain loop spawns one; the drain
//! task processes entries in arrival order (reducer, then pipeline) until
//! the queue is empty.  "Queue empty, stop draining" is decided under the
//! same lock as the append, so no entry is ever stranded.
//!
//! Every entry carries its own reply channel, so each caller gets the
//! outcome of its own transition no matter which call started the drain.
//! The drain runs on its own task: dropping a caller's future never cuts a
//! renderer batch short.

use crate::error::TransitionError;
use crate::message::{Operation, SceneMessage};
use crate::pipeline::{ReconcileResult, ReconciliationPipeline};
use crate::reducer;
use crate::state::SceneState;
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

/// One queued unit of work.
#[derive(Debug, Clone)]
enum Dispatch {
    Message {
        message: SceneMessage,
        timestamp: u64,
    },
    /// Wholesale replacement by an authoritative snapshot (full sync).
    Replace(SceneState),
    /// Re-render the committed state.
    Repopulate,
    /// Delete every tracked element and drop back to an empty scene.
    Clear,
}

struct Entry {
    item: Dispatch,
    reply: oneshot::Sender<TransitionOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Reducer accepted the message and the renderer applied it.
    Committed(ReconcileResult),
    /// Reducer accepted the message but the renderer batch failed; the
    /// committed state did not change.
    Failed(ReconcileResult),
    /// Reducer refused the message.
    Rejected {
        kind: &'static str,
        error: TransitionError,
    },
    /// The drain task went away before reporting (runtime shutting down).
    Abandoned,
}

impl TransitionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// Pipeline result, for outcomes that reached the renderer.
    pub fn result(&self) -> Option<&ReconcileResult> {
        match self {
            Self::Committed(result) | Self::Failed(result) => Some(result),
            Self::Rejected { .. } | Self::Abandoned => None,
        }
    }
}

#[derive(Default)]
struct Inbox {
    pending: VecDeque<Entry>,
    draining: bool,
}

struct Shared {
    inbox: Mutex<Inbox>,
    pipeline: tokio::sync::Mutex<ReconciliationPipeline>,
}

pub struct DispatchQueue {
    shared: Arc<Shared>,
}

/// Clears the `draining` flag if the drain task is torn down mid-way
/// (runtime shutdown), so the next entry spawns a fresh one.
struct DrainGuard<'a> {
    inbox: &'a Mutex<Inbox>,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inbox.lock().draining = false;
        }
    }
}

impl DispatchQueue {
    pub fn new(pipeline: ReconciliationPipeline) -> Self {
        Self {
            shared: Arc::new(Shared {
                inbox: Mutex::new(Inbox::default()),
                pipeline: tokio::sync::Mutex::new(pipeline),
            }),
        }
    }

    /// Queue a message and wait for its outcome.  Must be called from
    /// within a tokio runtime.
    pub async fn enqueue(&self, message: SceneMessage, timestamp: u64) -> TransitionOutcome {
        self.submit(Dispatch::Message { message, timestamp }).await
    }

    /// Queue a sequenced operation.
    pub async fn enqueue_operation(&self, op: &Operation) -> TransitionOutcome {
        self.enqueue(op.message.clone(), op.timestamp).await
    }

    /// Decode and queue a raw JSON message.  Undecodable messages (unknown
    /// `type`, malformed body) are logged and discarded.
    pub async fn enqueue_json(&self, json: &str, timestamp: u64) -> Option<TransitionOutcome> {
        match SceneMessage::decode(json) {
            Ok(message) => Some(self.enqueue(message, timestamp).await),
            Err(e) => {
                warn!("Discarding message: {}", e);
                None
            }
        }
    }

    /// Queue a wholesale replacement of the committed state.
    pub async fn replace(&self, snapshot: SceneState) -> TransitionOutcome {
        self.submit(Dispatch::Replace(snapshot)).await
    }

    /// Queue a re-render of the committed state.
    pub async fn repopulate(&self) -> TransitionOutcome {
        self.submit(Dispatch::Repopulate).await
    }

    /// Queue a hard clear: every tracked element is deleted and both the
    /// committed and rendered state become empty.
    pub async fn clear(&self) -> TransitionOutcome {
        self.submit(Dispatch::Clear).await
    }

    /// Copy of the current committed state.
    pub async fn committed(&self) -> SceneState {
        self.shared.pipeline.lock().await.committed().clone()
    }

    /// Entries waiting behind the active drain loop.
    pub fn pending(&self) -> usize {
        self.shared.inbox.lock().pending.len()
    }

    pub fn is_draining(&self) -> bool {
        self.shared.inbox.lock().draining
    }

    async fn submit(&self, item: Dispatch) -> TransitionOutcome {
        let (reply, outcome) = oneshot::channel();
        let spawn = {
            let mut inbox = self.shared.inbox.lock();
            inbox.pending.push_back(Entry { item, reply });
            !std::mem::replace(&mut inbox.draining, true)
        };
        if spawn {
            tokio::spawn(drain(self.shared.clone()));
        }
        outcome.await.unwrap_or_else(|_| {
            error!("Drain task ended before reporting an outcome");
            TransitionOutcome::Abandoned
        })
    }
}

async fn drain(shared: Arc<Shared>) {
    let mut guard = DrainGuard {
        inbox: &shared.inbox,
        armed: true,
    };
    loop {
        let entry = {
            let mut inbox = shared.inbox.lock();
            match inbox.pending.pop_front() {
                Some(entry) => entry,
                None => {
                    inbox.draining = false;
                    guard.armed = false;
                    return;
                }
            }
        };
        let mut pipeline = shared.pipeline.lock().await;
        let outcome = process(&mut pipeline, entry.item).await;
        drop(pipeline);
        if entry.reply.send(outcome).is_err() {
            debug!("Caller went away before its transition finished");
        }
    }
}

async fn process(pipeline: &mut ReconciliationPipeline, item: Dispatch) -> TransitionOutcome {
    let candidate = match item {
        Dispatch::Message { message, timestamp } => {
            match reducer::reduce(pipeline.committed(), &message, timestamp) {
                Ok(next) => next,
                Err(error) => {
                    warn!("Rejected '{}' transition: {}", message.kind(), error);
                    return TransitionOutcome::Rejected {
                        kind: message.kind(),
                        error,
                    };
                }
            }
        }
        Dispatch::Replace(snapshot) => {
            debug!(
                "Replacing scene v{} with snapshot v{}",
                pipeline.committed().version(),
                snapshot.version()
            );
            snapshot
        }
        Dispatch::Repopulate => return reported(pipeline.repopulate().await),
        Dispatch::Clear => return reported(pipeline.clear().await),
    };

    reported(pipeline.reconcile(candidate).await)
}

fn reported(result: ReconcileResult) -> TransitionOutcome {
    if result.success {
        TransitionOutcome::Committed(result)
    } else {
        TransitionOutcome::Failed(result)
    }
}
