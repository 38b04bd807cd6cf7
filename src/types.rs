//! Core scene types shared across all modules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

pub type EntityId = String;

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub const fn one() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

impl std::ops::Add for Vec3 {
    type Output = Vec3;

    fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Linear RGBA, each channel in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    #[serde(default = "opaque")]
    pub a: f32,
}

fn opaque() -> f32 {
    1.0
}

impl Color {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Cube,
    Sphere,
    Cylinder,
    Cone,
    Plane,
    Torus,
    /// Root of a hierarchical object built from the prop table.
    Prop,
    Light,
    Text,
    Avatar,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform {
    #[serde(default)]
    pub position: Vec3,
    #[serde(default = "Vec3::one")]
    pub scale: Vec3,
    /// Euler angles in radians.
    #[serde(default)]
    pub rotation: Vec3,
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zero(),
            scale: Vec3::one(),
            rotation: Vec3::zero(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Physics {
    /// Mass in kilograms.
    pub mass: f32,
    #[serde(default)]
    pub is_static: bool,
}

/// A uniquely identified scene object.  Two entities with the same `id` are
/// "changed" relative to each other whenever any field differs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub color: Color,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physics: Option<Physics>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityId>,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, kind: EntityKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            transform: Transform::default(),
            color: Color::default(),
            physics: None,
            tags: BTreeSet::new(),
            parent: None,
        }
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Camera / world / environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 5.0, 10.0),
            target: Vec3::zero(),
            fov: 75.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WorldSettings {
    pub grid_size: f32,
    /// Ground-plane transparency, `0.0` opaque to `1.0` invisible.
    pub transparency: f32,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            grid_size: 20.0,
            transparency: 0.0,
        }
    }
}

/// SI magnitude prefix the scene is expressed in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScaleToken {
    Yocto,
    Zepto,
    Atto,
    Femto,
    Pico,
    Nano,
    Micro,
    Milli,
    Centi,
    Deci,
    #[default]
    Unit,
    Deca,
    Hecto,
    Kilo,
    Mega,
    Giga,
    Tera,
    Peta,
    Exa,
    Zetta,
    Yotta,
}

impl ScaleToken {
    /// Power of ten this prefix stands for.
    pub fn exponent(self) -> i32 {
        match self {
            Self::Yocto => -24,
            Self::Zepto => -21,
            Self::Atto => -18,
            Self::Femto => -15,
            Self::Pico => -12,
            Self::Nano => -9,
            Self::Micro => -6,
            Self::Milli => -3,
            Self::Centi => -2,
            Self::Deci => -1,
            Self::Unit => 0,
            Self::Deca => 1,
            Self::Hecto => 2,
            Self::Kilo => 3,
            Self::Mega => 6,
            Self::Giga => 9,
            Self::Tera => 12,
            Self::Peta => 15,
            Self::Exa => 18,
            Self::Zetta => 21,
            Self::Yotta => 24,
        }
    }

    pub fn multiplier(self) -> f64 {
        10f64.powi(self.exponent())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub scale: ScaleToken,
    /// m/s², positive pulls towards -Y.
    pub gravity: f32,
    pub atmosphere: String,
    /// Degrees Celsius.
    pub temperature: f32,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            scale: ScaleToken::Unit,
            gravity: 9.81,
            atmosphere: "earth".into(),
            temperature: 20.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Client-side sync diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStats {
    pub last_seen_seq: u64,
    pub buffered_operation_count: usize,
    pub duplicates_dropped: u64,
    pub range_requests: u64,
    pub full_syncs: u64,
    pub cold_resets: u64,
}

/// Server-side operation log diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogStats {
    pub log_size: usize,
    pub head_seq: u64,
    pub sessions: usize,
    pub entities: usize,
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
