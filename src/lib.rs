//! Scene Sync
//!
//! State synchronization and reconciliation for a shared, live 3D scene.
//!
//! ## Architecture
//!
//! ```text
//! SyncClient  (sync.rs)            ← cursor, gap recovery, full sync, backoff
//!   ├── SyncTransport  (sync.rs)   ← LocalTransport (transport.rs) / network
//!   ├── IdentityStore  (identity.rs)
//!   └── DispatchQueue  (dispatch.rs)        ← FIFO, single drain loop
//!         ├── reduce  (reducer.rs, props.rs) ← pure (state, message) -> state
//!         └── ReconciliationPipeline  (pipeline.rs)
//!               ├── SceneDiff  (diff.rs)
//!               └── Renderer  (renderer.rs) ← HeadlessRenderer / 3D engine
//!
//! SceneServer  (server.rs)         ← TCP, JSON lines
//!   └── SceneService  (service.rs) ← sessions, push fan-out
//!         └── OperationLog  (oplog.rs)
//! ```
//!
//! A [`SceneState`] is immutable; the committed state only changes when every
//! renderer call of a transition succeeded.  The operation log is the source
//! of truth and every client state is a fold of it.

// Engine and protocol types are always available (no server feature needed).
pub mod config;
pub mod connection;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod message;
pub mod pipeline;
pub mod props;
pub mod protocol;
pub mod reducer;
pub mod renderer;
pub mod state;
pub mod sync;
pub mod types;

// Server-side modules require the `server` feature.
#[cfg(feature = "server")]
pub mod oplog;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "server")]
pub mod service;
#[cfg(feature = "server")]
pub mod transport;

pub use crate::config::{ServerConfig, Settings, SyncConfig};
pub use connection::{Backoff, ConnectionState, ReconnectOutcome};
pub use diff::SceneDiff;
pub use dispatch::{DispatchQueue, TransitionOutcome};
pub use error::{RenderError, SyncError, TransitionError};
pub use identity::{ClientId, FileIdentityStore, IdentityStore, MemoryIdentityStore};
pub use message::{Operation, SceneMessage};
pub use pipeline::{ReconcileResult, ReconciliationPipeline};
pub use renderer::{HeadlessRenderer, Renderer};
pub use state::SceneState;
pub use sync::{SyncClient, SyncCursor, SyncTransport};
pub use types::{Entity, EntityId, EntityKind, SyncStats, Vec3};

// Convenience re-exports (server only)
#[cfg(feature = "server")]
pub use oplog::OperationLog;
#[cfg(feature = "server")]
pub use server::SceneServer;
#[cfg(feature = "server")]
pub use service::SceneService;
#[cfg(feature = "server")]
pub use transport::LocalTransport;
