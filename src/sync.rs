//! Sync protocol client.
//!
//! ```text
//! push / range reply ──► SyncCursor ──► DispatchQueue ──► pipeline
//!                           │
//!                           ├── seq == last + 1   apply, drain buffered
//!                           ├── seq >  last + 1   buffer, fetch [last + 1, seq)
//!                           ├── gap > max_gap     full sync
//!                           └── seq <= last       duplicate, dropped
//! ```
//!
//! [`SyncClient`] is an explicit service object: it owns its transport, its
//! cursor and its connection state, and feeds the [`DispatchQueue`] it was
//! handed.  Local edits go through [`SyncClient::submit`] and only become
//! visible when the sequenced operation comes back from the server.

use crate::config::SyncConfig;
use crate::connection::{ConnectionMachine, ConnectionState, ReconnectOutcome};
use crate::dispatch::{DispatchQueue, TransitionOutcome};
use crate::error::SyncError;
use crate::identity::{ClientId, IdentityStore};
use crate::message::{Operation, SceneMessage};
use crate::protocol::{FullSyncReply, Welcome};
use crate::state::SceneState;
use crate::types::SyncStats;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// What the client should do with an incoming operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Receive {
    /// In order: apply these, ascending.
    Apply(Vec<Operation>),
    /// Buffered; fetch `[from, to)` to close the gap.
    RequestRange { from: u64, to: u64 },
    /// Buffered behind a gap that is already being recovered.
    Buffered,
    /// Gap too wide; rebuild from a snapshot.
    FullSync,
    /// Already seen or already buffered.
    Duplicate(u64),
}

/// Per-connection record of what has been applied and what is waiting.
#[derive(Debug, Clone)]
pub struct SyncCursor {
    last_seen_seq: u64,
    buffered: BTreeMap<u64, Operation>,
    max_gap: u64,
}

impl SyncCursor {
    pub fn new(max_gap: u64) -> Self {
        Self {
            last_seen_seq: 0,
            buffered: BTreeMap::new(),
            max_gap,
        }
    }

    pub fn last_seen_seq(&self) -> u64 {
        self.last_seen_seq
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// `true` when buffered operations are waiting on a missing one.
    pub fn has_gap(&self) -> bool {
        self.buffered
            .keys()
            .next()
            .is_some_and(|&seq| seq > self.last_seen_seq + 1)
    }

    pub fn receive(&mut self, op: Operation) -> Receive {
        let seq = op.seq_num;
        if seq <= self.last_seen_seq || self.buffered.contains_key(&seq) {
            return Receive::Duplicate(seq);
        }
        if seq == self.last_seen_seq + 1 {
            self.last_seen_seq = seq;
            let mut ready = vec![op];
            ready.extend(self.drain_contiguous());
            return Receive::Apply(ready);
        }

        let gap_already_open = self.has_gap();
        self.buffered.insert(seq, op);
        let from = self.last_seen_seq + 1;
        if seq - from > self.max_gap {
            Receive::FullSync
        } else if gap_already_open {
            Receive::Buffered
        } else {
            Receive::RequestRange { from, to: seq }
        }
    }

    /// Merge a range reply.  Returns the operations that became applicable,
    /// ascending.  Anything already seen is ignored.
    pub fn fill(&mut self, mut operations: Vec<Operation>) -> Vec<Operation> {
        operations.sort_by_key(|op| op.seq_num);
        for op in operations {
            if op.seq_num > self.last_seen_seq {
                self.buffered.entry(op.seq_num).or_insert(op);
            }
        }
        self.drain_contiguous()
    }

    /// Adopt a snapshot taken at `head`.  Buffered operations at or below
    /// `head` are dropped; later contiguous ones are returned for applying.
    pub fn reset(&mut self, head: u64) -> Vec<Operation> {
        self.last_seen_seq = head;
        self.buffered = self.buffered.split_off(&(head + 1));
        self.drain_contiguous()
    }

    fn drain_contiguous(&mut self) -> Vec<Operation> {
        let mut ready = Vec::new();
        while let Some(op) = self.buffered.remove(&(self.last_seen_seq + 1)) {
            self.last_seen_seq = op.seq_num;
            ready.push(op);
        }
        ready
    }
}

// ---------------------------------------------------------------------------
// Transport boundary
// ---------------------------------------------------------------------------

/// An open session: the server's welcome plus the push stream.
#[derive(Debug)]
pub struct Session {
    pub welcome: Welcome,
    pub pushes: broadcast::Receiver<Operation>,
}

#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Open a session, presenting `client_id` if the client has one.
    async fn connect(&self, client_id: Option<ClientId>) -> Result<Session, SyncError>;
    /// Submit a message for sequencing; returns its `seq_num`.
    async fn submit(&self, message: SceneMessage) -> Result<u64, SyncError>;
    async fn full_sync(&self) -> Result<FullSyncReply, SyncError>;
    /// Operations with `from <= seq < to`.
    async fn missing_range(&self, from: u64, to: u64) -> Result<Vec<Operation>, SyncError>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SyncClient {
    transport: Arc<dyn SyncTransport>,
    queue: Arc<DispatchQueue>,
    identity: Arc<dyn IdentityStore>,
    config: SyncConfig,
    cursor: SyncCursor,
    connection: ConnectionMachine,
    pushes: Option<broadcast::Receiver<Operation>>,
    welcome: Option<Welcome>,
    stats: SyncStats,
    resync_needed: bool,
    reset_pending: bool,
}

impl SyncClient {
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        queue: Arc<DispatchQueue>,
        identity: Arc<dyn IdentityStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            cursor: SyncCursor::new(config.max_gap),
            transport,
            queue,
            identity,
            config,
            connection: ConnectionMachine::new(),
            pushes: None,
            welcome: None,
            stats: SyncStats::default(),
            resync_needed: false,
            reset_pending: false,
        }
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn welcome(&self) -> Option<&Welcome> {
        self.welcome.as_ref()
    }

    pub fn is_reset_pending(&self) -> bool {
        self.reset_pending
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            last_seen_seq: self.cursor.last_seen_seq(),
            buffered_operation_count: self.cursor.buffered_len(),
            ..self.stats.clone()
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Open a session and rebuild local state from a full sync.  On any
    /// failure the client is left `Disconnected`.
    pub async fn connect(&mut self) -> Result<Welcome, SyncError> {
        if self.reset_pending {
            return Err(SyncError::ResetPending);
        }
        self.connection.transition(ConnectionState::Connecting)?;
        match self.open_session().await {
            Ok(welcome) => Ok(welcome),
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    async fn open_session(&mut self) -> Result<Welcome, SyncError> {
        let presented = self.identity.load()?;
        let session = self.transport.connect(presented).await?;
        self.identity.store(&session.welcome.client_id)?;
        self.connection.transition(ConnectionState::Connected)?;
        info!(
            "Connected as {} ({}, avatar {})",
            session.welcome.client_id,
            if session.welcome.resumed { "resumed" } else { "new" },
            session.welcome.avatar_id
        );

        let welcome = session.welcome.clone();
        self.pushes = Some(session.pushes);
        self.welcome = Some(session.welcome);
        self.full_sync().await?;
        Ok(welcome)
    }

    pub fn disconnect(&mut self) {
        if self.connection.state() != ConnectionState::Disconnected {
            debug!("Dropping connection");
        }
        self.connection.drop_connection();
        self.pushes = None;
    }

    /// Reconnect with exponential backoff.  A successful attempt returns
    /// immediately.  When every attempt fails the client performs its single
    /// cold reset; after that `connect` and `reconnect` fail with
    /// [`SyncError::ResetPending`] until [`reload`](Self::reload).
    pub async fn reconnect(&mut self) -> Result<ReconnectOutcome, SyncError> {
        if self.reset_pending {
            return Err(SyncError::ResetPending);
        }
        self.disconnect();

        let backoff = self.config.backoff();
        let mut attempts = 0;
        while let Some(delay) = backoff.delay(attempts) {
            tokio::time::sleep(delay).await;
            attempts += 1;
            match self.connect().await {
                Ok(welcome) => {
                    info!("Reconnected after {} attempt(s)", attempts);
                    return Ok(ReconnectOutcome::Reconnected {
                        attempts,
                        resumed: welcome.resumed,
                    });
                }
                Err(e) => warn!(
                    "Reconnect attempt {}/{} failed: {}",
                    attempts, backoff.max_attempts, e
                ),
            }
        }

        self.cold_reset().await?;
        Ok(ReconnectOutcome::ColdReset { attempts })
    }

    async fn cold_reset(&mut self) -> Result<(), SyncError> {
        warn!("Reconnect attempts exhausted; cold reset");
        self.reset_pending = true;
        self.stats.cold_resets += 1;
        self.welcome = None;
        self.cursor = SyncCursor::new(self.config.max_gap);
        let outcome = self.queue.replace(SceneState::default()).await;
        if !outcome.is_committed() {
            warn!("Emptying the scene failed ({:?}); clearing every element", outcome);
            self.queue.clear().await;
        }
        self.identity.clear()?;
        Ok(())
    }

    /// Start over after a cold reset: connect as a new participant and
    /// rebuild from a full sync.
    pub async fn reload(&mut self) -> Result<Welcome, SyncError> {
        if self.reset_pending {
            info!("Reloading after cold reset");
            self.reset_pending = false;
        }
        self.connect().await
    }

    // -----------------------------------------------------------------------
    // Inbound operations
    // -----------------------------------------------------------------------

    /// Handle one pushed operation.
    pub async fn receive(&mut self, op: Operation) -> Result<Vec<TransitionOutcome>, SyncError> {
        self.connection.transition(ConnectionState::Receiving)?;
        let result = self.process(op).await;
        match &result {
            Err(SyncError::Disconnected | SyncError::Transport(_)) => self.disconnect(),
            _ => self.connection.transition(ConnectionState::Connected)?,
        }
        result
    }

    async fn process(&mut self, op: Operation) -> Result<Vec<TransitionOutcome>, SyncError> {
        let mut outcomes = match self.cursor.receive(op) {
            Receive::Apply(ready) => self.apply(ready).await,
            Receive::Buffered => Vec::new(),
            Receive::Duplicate(seq) => {
                debug!("Dropping duplicate operation #{}", seq);
                self.stats.duplicates_dropped += 1;
                Vec::new()
            }
            Receive::FullSync => {
                info!(
                    "Gap after #{} exceeds {}; full sync",
                    self.cursor.last_seen_seq(),
                    self.config.max_gap
                );
                return self.full_sync().await;
            }
            Receive::RequestRange { from, to } => self.recover_range(from, to).await?,
        };

        if std::mem::take(&mut self.resync_needed) {
            warn!("Local state diverged after a failed render; full sync");
            outcomes.extend(self.full_sync().await?);
        }
        Ok(outcomes)
    }

    async fn recover_range(
        &mut self,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransitionOutcome>, SyncError> {
        self.stats.range_requests += 1;
        debug!("Requesting missing operations [{}, {})", from, to);
        match self.transport.missing_range(from, to).await {
            Ok(operations) => {
                let ready = self.cursor.fill(operations);
                let mut outcomes = self.apply(ready).await;
                if self.cursor.has_gap() {
                    warn!("Range reply left a gap after #{}; full sync", self.cursor.last_seen_seq());
                    outcomes.extend(self.full_sync().await?);
                }
                Ok(outcomes)
            }
            Err(e) => {
                warn!("Range fetch [{}, {}) failed: {}; full sync", from, to, e);
                self.full_sync().await
            }
        }
    }

    /// Replace local state with the server snapshot and reset the cursor to
    /// its head.
    pub async fn full_sync(&mut self) -> Result<Vec<TransitionOutcome>, SyncError> {
        let FullSyncReply {
            snapshot,
            head_seq,
            digest,
        } = self.transport.full_sync().await?;

        let actual = snapshot.digest();
        if actual != digest {
            return Err(SyncError::DigestMismatch {
                expected: digest,
                actual,
            });
        }
        self.stats.full_syncs += 1;
        self.resync_needed = false;

        let outcome = self.queue.replace(snapshot).await;
        if !outcome.is_committed() {
            // Retried on the next inbound operation.
            self.resync_needed = true;
            let error = outcome.result().and_then(|r| r.error.clone());
            return Err(SyncError::Apply(
                error.unwrap_or_else(|| "render failed".into()),
            ));
        }
        let mut outcomes = vec![outcome];

        let ready = self.cursor.reset(head_seq);
        debug!(
            "Full sync at #{} ({} buffered operation(s) follow)",
            head_seq,
            ready.len()
        );
        outcomes.extend(self.apply(ready).await);
        Ok(outcomes)
    }

    async fn apply(&mut self, ready: Vec<Operation>) -> Vec<TransitionOutcome> {
        let mut outcomes = Vec::with_capacity(ready.len());
        for op in &ready {
            let outcome = self.queue.enqueue_operation(op).await;
            if matches!(outcome, TransitionOutcome::Failed(_) | TransitionOutcome::Abandoned) {
                self.resync_needed = true;
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Send a local edit for sequencing.  Returns the assigned `seq_num`; the
    /// change is applied when that operation arrives back.
    pub async fn submit(&self, message: SceneMessage) -> Result<u64, SyncError> {
        if self.connection.state() == ConnectionState::Disconnected {
            return Err(SyncError::Disconnected);
        }
        self.transport.submit(message).await
    }

    // -----------------------------------------------------------------------
    // Push loop
    // -----------------------------------------------------------------------

    /// Process every push already waiting, without blocking.
    pub async fn pump(&mut self) -> Result<Vec<TransitionOutcome>, SyncError> {
        let mut waiting = Vec::new();
        let mut lagged = false;
        {
            let Some(pushes) = self.pushes.as_mut() else {
                return Err(SyncError::Disconnected);
            };
            loop {
                match pushes.try_recv() {
                    Ok(op) => waiting.push(op),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!("Push stream lagged by {} operation(s)", skipped);
                        lagged = true;
                    }
                    Err(TryRecvError::Closed) => {
                        self.disconnect();
                        return Err(SyncError::Disconnected);
                    }
                }
            }
        }

        let mut outcomes = Vec::new();
        if lagged {
            outcomes.extend(self.full_sync().await?);
        }
        for op in waiting {
            outcomes.extend(self.receive(op).await?);
        }
        Ok(outcomes)
    }

    /// Follow the push stream until the client is cold-reset.  Lag triggers
    /// a full sync; a closed stream or a transport failure triggers
    /// [`reconnect`](Self::reconnect).
    pub async fn run(&mut self) -> Result<ReconnectOutcome, SyncError> {
        loop {
            let next = match self.pushes.as_mut() {
                Some(pushes) => pushes.recv().await,
                None => Err(RecvError::Closed),
            };

            let result = match next {
                Ok(op) => self.receive(op).await.map(|_| ()),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Push stream lagged by {} operation(s); full sync", skipped);
                    self.full_sync().await.map(|_| ())
                }
                Err(RecvError::Closed) => Err(SyncError::Disconnected),
            };

            if let Err(e) = result {
                warn!("Sync interrupted: {}", e);
                if let outcome @ ReconnectOutcome::ColdReset { .. } = self.reconnect().await? {
                    return Ok(outcome);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(seq: u64) -> Operation {
        Operation::new(seq, SceneMessage::Clear, seq * 10)
    }

    fn seqs(ops: &[Operation]) -> Vec<u64> {
        ops.iter().map(|o| o.seq_num).collect()
    }

    #[test]
    fn in_order_operations_apply_immediately() {
        let mut c = SyncCursor::new(10);
        assert_eq!(c.receive(op(1)), Receive::Apply(vec![op(1)]));
        assert_eq!(c.receive(op(2)), Receive::Apply(vec![op(2)]));
        assert_eq!(c.last_seen_seq(), 2);
    }

    #[test]
    fn gap_requests_missing_range_then_drains() {
        let mut c = SyncCursor::new(10);
        c.reset(3);
        assert_eq!(c.receive(op(7)), Receive::RequestRange { from: 4, to: 7 });
        assert_eq!(c.receive(op(8)), Receive::Buffered);
        assert!(c.has_gap());

        let ready = c.fill(vec![op(6), op(4), op(5)]);
        assert_eq!(seqs(&ready), vec![4, 5, 6, 7, 8]);
        assert_eq!(c.last_seen_seq(), 8);
        assert!(!c.has_gap());
    }

    #[test]
    fn duplicates_are_reported() {
        let mut c = SyncCursor::new(10);
        c.receive(op(1));
        c.receive(op(3));
        assert_eq!(c.receive(op(1)), Receive::Duplicate(1));
        assert_eq!(c.receive(op(3)), Receive::Duplicate(3));
        assert_eq!(c.buffered_len(), 1);
    }

    #[test]
    fn wide_gap_asks_for_full_sync() {
        let mut c = SyncCursor::new(5);
        assert_eq!(c.receive(op(7)), Receive::FullSync);

        let mut c = SyncCursor::new(5);
        assert_eq!(c.receive(op(6)), Receive::RequestRange { from: 1, to: 6 });
    }

    #[test]
    fn reset_drops_stale_buffered_operations() {
        let mut c = SyncCursor::new(100);
        c.receive(op(3));
        c.receive(op(6));
        c.receive(op(7));
        let ready = c.reset(5);
        assert_eq!(seqs(&ready), vec![6, 7]);
        assert_eq!(c.buffered_len(), 0);
        assert_eq!(c.last_seen_seq(), 7);
    }

    #[test]
    fn short_range_reply_leaves_gap() {
        let mut c = SyncCursor::new(100);
        c.receive(op(5));
        let ready = c.fill(vec![op(1), op(2)]);
        assert_eq!(seqs(&ready), vec![1, 2]);
        assert!(c.has_gap());
    }
}
