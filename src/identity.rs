//! Durable client identity.
//!
//! The client presents its [`ClientId`] when it reconnects so the server can
//! resume its avatar/session binding instead of treating it as a new
//! participant.  A cold reset clears the store.

use crate::error::IdentityError;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    /// Fresh random identity (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Result<Option<ClientId>, IdentityError>;
    fn store(&self, id: &ClientId) -> Result<(), IdentityError>;
    fn clear(&self) -> Result<(), IdentityError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    id: Mutex<Option<ClientId>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<ClientId>, IdentityError> {
        Ok(self.id.lock().clone())
    }

    fn store(&self, id: &ClientId) -> Result<(), IdentityError> {
        *self.id.lock() = Some(id.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), IdentityError> {
        *self.id.lock() = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    client_id: ClientId,
}

/// Keeps the identity in a small JSON file: `{"client_id": "..."}`.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<ClientId>, IdentityError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let file: IdentityFile = serde_json::from_slice(&bytes)?;
                Ok(Some(file.client_id))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, id: &ClientId) -> Result<(), IdentityError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let bytes = serde_json::to_vec(&IdentityFile {
            client_id: id.clone(),
        })?;
        fs::write(&self.path, bytes)?;
        debug!("Persisted client identity to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<(), IdentityError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_differ() {
        assert_ne!(ClientId::generate(), ClientId::generate());
    }

    #[test]
    fn file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIdentityStore::new(dir.path().join("nested").join("identity.json"));
        assert_eq!(store.load().unwrap(), None);

        let id = ClientId::generate();
        store.store(&id).unwrap();
        assert_eq!(store.load().unwrap(), Some(id));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, b"not json").unwrap();
        let store = FileIdentityStore::new(path);
        assert!(matches!(store.load(), Err(IdentityError::Json(_))));
    }
}
