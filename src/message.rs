//! Scene transition messages and sequenced operations.
//!
//! [`SceneMessage`] is the closed set of transitions a reducer understands.
//! On the wire it is a JSON object tagged by `type`:
//!
//! ```json
//! {"type": "create", "entities": [{"id": "e1", "kind": "cube"}]}
//! {"type": "set_gravity", "gravity": 1.62}
//! ```
//!
//! An [`Operation`] is a message the server has placed in the authoritative
//! log under a `seq_num`.

use crate::error::ProtocolError;
use crate::types::{Entity, EntityId, Environment, ScaleToken, Vec3, WorldSettings};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SceneMessage {
    /// Upsert entities by id.
    Create { entities: Vec<Entity> },
    /// Replace entities that already exist; unknown ids are skipped.
    Update { entities: Vec<Entity> },
    /// Remove entities (and their descendants) by id.
    Delete { ids: Vec<EntityId> },
    Clear,
    /// Shallow merge into the camera.
    Camera {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Vec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fov: Option<f32>,
    },
    WorldInitialized { world: WorldSettings },
    /// Shallow merge into the world settings.
    GridControl {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        grid_size: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transparency: Option<f32>,
    },
    InitEnvironment { environment: Environment },
    ChangeScale { scale: ScaleToken },
    SetGravity { gravity: f32 },
    SetAtmosphere { atmosphere: String },
    SetTemperature { temperature: f32 },
    /// Optionally clear objects and optionally replace the environment, as a
    /// single transition.
    InitScene {
        #[serde(default)]
        clear: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        environment: Option<Environment>,
    },
    CreateProp {
        id: EntityId,
        prop: String,
        #[serde(default)]
        position: Vec3,
    },
    DeleteProp { id: EntityId },
}

impl SceneMessage {
    /// Every `type` tag the decoder accepts.
    pub const TYPES: &'static [&'static str] = &[
        "create",
        "update",
        "delete",
        "clear",
        "camera",
        "world_initialized",
        "grid_control",
        "init_environment",
        "change_scale",
        "set_gravity",
        "set_atmosphere",
        "set_temperature",
        "init_scene",
        "create_prop",
        "delete_prop",
    ];

    /// Wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Clear => "clear",
            Self::Camera { .. } => "camera",
            Self::WorldInitialized { .. } => "world_initialized",
            Self::GridControl { .. } => "grid_control",
            Self::InitEnvironment { .. } => "init_environment",
            Self::ChangeScale { .. } => "change_scale",
            Self::SetGravity { .. } => "set_gravity",
            Self::SetAtmosphere { .. } => "set_atmosphere",
            Self::SetTemperature { .. } => "set_temperature",
            Self::InitScene { .. } => "init_scene",
            Self::CreateProp { .. } => "create_prop",
            Self::DeleteProp { .. } => "delete_prop",
        }
    }

    /// Decode a JSON message, telling an unknown `type` apart from a
    /// malformed body.
    pub fn decode(json: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?;
        if !Self::TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownMessageType(kind.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// A message placed in the authoritative log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Server-assigned, strictly increasing, gap-free.  The first operation
    /// of a log is `1`.
    pub seq_num: u64,
    pub message: SceneMessage,
    /// Milliseconds since the Unix epoch, assigned by the server.
    pub timestamp: u64,
}

impl Operation {
    pub fn new(seq_num: u64, message: SceneMessage, timestamp: u64) -> Self {
        Self {
            seq_num,
            message,
            timestamp,
        }
    }
}
