//! OperationLog – the authoritative, gap-free sequence of operations.
//!
//! The log keeps the fold of everything it holds, so a snapshot is always at
//! hand and a submission can be checked against the reducer before it is
//! sequenced.  A message the reducer rejects never gets a `seq_num`.

use crate::error::TransitionError;
use crate::message::{Operation, SceneMessage};
use crate::reducer;
use crate::state::SceneState;
use log::debug;

#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    operations: Vec<Operation>,
    state: SceneState,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence `message` as the next operation.  The first operation of a
    /// log is `1`.
    pub fn append(
        &mut self,
        message: SceneMessage,
        timestamp: u64,
    ) -> Result<Operation, TransitionError> {
        let next = reducer::reduce(&self.state, &message, timestamp)?;
        let op = Operation::new(self.head() + 1, message, timestamp);
        debug!("Sequenced #{} ({})", op.seq_num, op.message.kind());
        self.state = next;
        self.operations.push(op.clone());
        Ok(op)
    }

    /// Operations with `from <= seq_num < to`.
    pub fn range(&self, from: u64, to: u64) -> &[Operation] {
        let start = from.max(1).saturating_sub(1);
        let end = to.saturating_sub(1).min(self.head());
        if start >= end {
            return &[];
        }
        &self.operations[start as usize..end as usize]
    }

    /// `seq_num` of the latest operation; `0` for an empty log.
    pub fn head(&self) -> u64 {
        self.operations.len() as u64
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Current fold of the log.
    pub fn state(&self) -> &SceneState {
        &self.state
    }

    /// `(state, head)` pair for a full sync.
    pub fn snapshot(&self) -> (SceneState, u64) {
        (self.state.clone(), self.head())
    }
}
