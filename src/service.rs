//! SceneService – operation log, sessions and push fan-out.
//!
//! One service instance is the authority for one scene.  It is shared as
//! `Arc<Mutex<SceneService>>` between the TCP front end and any in-process
//! transports; every method is synchronous and short.

use crate::config::ServerConfig;
use crate::error::{SyncError, TransitionError};
use crate::identity::ClientId;
use crate::message::{Operation, SceneMessage};
use crate::oplog::OperationLog;
use crate::protocol::{ClientRequest, FullSyncReply, ServerMessage, Welcome};
use crate::types::{now_millis, Entity, EntityId, EntityKind, LogStats};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
struct SessionRecord {
    avatar_id: EntityId,
    connected: bool,
}

pub struct SceneService {
    config: ServerConfig,
    log: OperationLog,
    sessions: BTreeMap<ClientId, SessionRecord>,
    pushes: broadcast::Sender<Operation>,
}

impl SceneService {
    pub fn new(config: ServerConfig) -> Self {
        let (pushes, _) = broadcast::channel(config.push_buffer.max(1));
        Self {
            config,
            log: OperationLog::new(),
            sessions: BTreeMap::new(),
            pushes,
        }
    }

    /// New receiver for every operation sequenced from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Operation> {
        self.pushes.subscribe()
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    // -----------------------------------------------------------------------
    // Request dispatch
    // -----------------------------------------------------------------------

    pub fn handle(&mut self, request: ClientRequest) -> ServerMessage {
        match request {
            ClientRequest::Submit { message } => match self.submit(message) {
                Ok(op) => ServerMessage::Submitted { seq_num: op.seq_num },
                Err(e) => ServerMessage::error(e.to_string()),
            },
            ClientRequest::FullSync => ServerMessage::FullSync(self.full_sync()),
            ClientRequest::MissingRange { from, to } => match self.missing_range(from, to) {
                Ok(operations) => ServerMessage::Operations { operations },
                Err(e) => ServerMessage::error(e.to_string()),
            },
            ClientRequest::Stats => ServerMessage::Stats(self.stats()),
            ClientRequest::Reconnect { client_id } => {
                ServerMessage::Welcome(self.reconnect(client_id))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Log
    // -----------------------------------------------------------------------

    /// Validate, sequence and broadcast `message`.
    pub fn submit(&mut self, message: SceneMessage) -> Result<Operation, TransitionError> {
        let kind = message.kind();
        let op = self.log.append(message, now_millis()).map_err(|e| {
            warn!("Refusing '{}' submission: {}", kind, e);
            e
        })?;
        if self.pushes.send(op.clone()).is_err() {
            debug!("No subscribers for #{}", op.seq_num);
        }
        Ok(op)
    }

    pub fn full_sync(&self) -> FullSyncReply {
        let (snapshot, head_seq) = self.log.snapshot();
        let digest = snapshot.digest();
        FullSyncReply {
            snapshot,
            head_seq,
            digest,
        }
    }

    /// Operations with `from <= seq < to`.  Ranges wider than
    /// `max_range` are refused; the client falls back to a full sync.
    pub fn missing_range(&self, from: u64, to: u64) -> Result<Vec<Operation>, SyncError> {
        if from > to || to - from > self.config.max_range {
            return Err(SyncError::RangeUnavailable { from, to });
        }
        Ok(self.log.range(from, to).to_vec())
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Resume the session for a known `client_id`, or register a new
    /// participant with a fresh id and avatar.
    pub fn reconnect(&mut self, client_id: Option<ClientId>) -> Welcome {
        if let Some(id) = client_id {
            if let Some(record) = self.sessions.get_mut(&id) {
                record.connected = true;
                let avatar_id = record.avatar_id.clone();
                info!("Resumed session {} (avatar {})", id, avatar_id);
                if !self.log.state().contains(&avatar_id) {
                    self.spawn_avatar(&id, &avatar_id);
                }
                return Welcome {
                    client_id: id,
                    resumed: true,
                    avatar_id,
                };
            }
            debug!("Unknown client id {}; assigning a new one", id);
        }

        let id = ClientId::generate();
        let avatar_id = format!("avatar-{}", id);
        self.spawn_avatar(&id, &avatar_id);
        self.sessions.insert(
            id.clone(),
            SessionRecord {
                avatar_id: avatar_id.clone(),
                connected: true,
            },
        );
        info!("New participant {} (avatar {})", id, avatar_id);
        Welcome {
            client_id: id,
            resumed: false,
            avatar_id,
        }
    }

    /// Mark a session as disconnected.  The binding is kept so the client
    /// can resume it.
    pub fn disconnect(&mut self, client_id: &ClientId) {
        if let Some(record) = self.sessions.get_mut(client_id) {
            record.connected = false;
            debug!("Session {} disconnected", client_id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.values().filter(|s| s.connected).count()
    }

    pub fn stats(&self) -> LogStats {
        LogStats {
            log_size: self.log.len(),
            head_seq: self.log.head(),
            sessions: self.connected_count(),
            entities: self.log.state().len(),
        }
    }

    fn spawn_avatar(&mut self, client_id: &ClientId, avatar_id: &str) {
        let mut avatar = Entity::new(avatar_id, EntityKind::Avatar).with_tag("avatar");
        avatar.name = client_id.to_string();
        let message = SceneMessage::Create {
            entities: vec![avatar],
        };
        if let Err(e) = self.submit(message) {
            warn!("Failed to spawn avatar {}: {}", avatar_id, e);
        }
    }
}
