//! In-process [`SyncTransport`] bound directly to a [`SceneService`].
//!
//! Used to embed a client next to the server, and as the test transport:
//! it can be taken offline and can refuse range requests.

use crate::error::SyncError;
use crate::identity::ClientId;
use crate::message::{Operation, SceneMessage};
use crate::protocol::FullSyncReply;
use crate::service::SceneService;
use crate::sync::{Session, SyncTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub struct LocalTransport {
    service: Arc<Mutex<SceneService>>,
    online: AtomicBool,
    fail_ranges: AtomicBool,
    connects: AtomicU64,
}

impl LocalTransport {
    pub fn new(service: Arc<Mutex<SceneService>>) -> Self {
        Self {
            service,
            online: AtomicBool::new(true),
            fail_ranges: AtomicBool::new(false),
            connects: AtomicU64::new(0),
        }
    }

    pub fn service(&self) -> &Arc<Mutex<SceneService>> {
        &self.service
    }

    /// While offline every call fails with [`SyncError::Disconnected`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Make `missing_range` fail so callers fall back to a full sync.
    pub fn set_fail_ranges(&self, fail: bool) {
        self.fail_ranges.store(fail, Ordering::SeqCst);
    }

    /// Connection attempts seen, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<(), SyncError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Disconnected)
        }
    }
}

#[async_trait]
impl SyncTransport for LocalTransport {
    async fn connect(&self, client_id: Option<ClientId>) -> Result<Session, SyncError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        let mut service = self.service.lock();
        let welcome = service.reconnect(client_id);
        let pushes = service.subscribe();
        Ok(Session { welcome, pushes })
    }

    async fn submit(&self, message: SceneMessage) -> Result<u64, SyncError> {
        self.ensure_online()?;
        self.service
            .lock()
            .submit(message)
            .map(|op| op.seq_num)
            .map_err(|e| SyncError::Server(e.to_string()))
    }

    async fn full_sync(&self) -> Result<FullSyncReply, SyncError> {
        self.ensure_online()?;
        Ok(self.service.lock().full_sync())
    }

    async fn missing_range(&self, from: u64, to: u64) -> Result<Vec<Operation>, SyncError> {
        self.ensure_online()?;
        if self.fail_ranges.load(Ordering::SeqCst) {
            return Err(SyncError::Transport(format!(
                "range [{}, {}) dropped",
                from, to
            )));
        }
        self.service.lock().missing_range(from, to)
    }
}
