//! `SceneState` – immutable, versioned snapshot of the scene.
//!
//! A state is never mutated after construction.  Reducers derive a successor
//! with [`SceneState::successor`], which shares the object map structurally
//! with its parent (`im::OrdMap`), so copies are cheap and iteration order is
//! deterministic (by entity id).

use crate::types::{Camera, Entity, EntityId, Environment, WorldSettings};
use im::OrdMap;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneState {
    pub(crate) version: u64,
    pub(crate) timestamp: u64,
    pub(crate) objects: OrdMap<EntityId, Entity>,
    pub(crate) camera: Camera,
    pub(crate) world: WorldSettings,
    pub(crate) environment: Environment,
}

/// The part of a state that [`SceneState::digest`] covers.
#[derive(Serialize)]
struct DigestView<'a> {
    objects: &'a OrdMap<EntityId, Entity>,
    camera: &'a Camera,
    world: &'a WorldSettings,
    environment: &'a Environment,
}

impl SceneState {
    /// Empty scene at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of `self` at `version + 1`, stamped with `timestamp`.
    pub(crate) fn successor(&self, timestamp: u64) -> Self {
        Self {
            version: self.version + 1,
            timestamp,
            ..self.clone()
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn objects(&self) -> &OrdMap<EntityId, Entity> {
        &self.objects
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn world(&self) -> &WorldSettings {
        &self.world
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Ids of every entity whose parent chain leads to `root` (excluding
    /// `root` itself).
    pub fn descendants(&self, root: &str) -> Vec<EntityId> {
        let mut children: HashMap<&str, Vec<&EntityId>> = HashMap::new();
        for (id, entity) in self.objects.iter() {
            if let Some(parent) = entity.parent.as_deref() {
                children.entry(parent).or_default().push(id);
            }
        }

        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let mut frontier = vec![root];
        while let Some(parent) = frontier.pop() {
            for &id in children.get(parent).into_iter().flatten() {
                if id != root && seen.insert(id) {
                    found.push(id.clone());
                    frontier.push(id.as_str());
                }
            }
        }
        found
    }

    /// md5 hex digest of the scene content (objects, camera, world,
    /// environment).  Version and timestamp are not part of the digest.
    pub fn digest(&self) -> String {
        let view = DigestView {
            objects: &self.objects,
            camera: &self.camera,
            world: &self.world,
            environment: &self.environment,
        };
        let bytes = match serde_json::to_vec(&view) {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to encode scene v{} for digest: {}", self.version, e);
                Vec::new()
            }
        };
        format!("{:x}", md5::compute(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityKind, Vec3};

    fn with_objects(entities: Vec<Entity>) -> SceneState {
        let mut s = SceneState::new();
        for e in entities {
            s.objects.insert(e.id.clone(), e);
        }
        s
    }

    #[test]
    fn successor_bumps_version_and_leaves_parent_untouched() {
        let s0 = with_objects(vec![Entity::new("a", EntityKind::Cube)]);
        let mut s1 = s0.successor(99);
        s1.objects.remove("a");

        assert_eq!(s1.version(), 1);
        assert_eq!(s1.timestamp(), 99);
        assert!(s0.contains("a"));
        assert!(!s1.contains("a"));
    }

    #[test]
    fn digest_ignores_version_and_timestamp() {
        let a = with_objects(vec![Entity::new("a", EntityKind::Cube)]);
        let b = a.successor(1234);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_changes_with_content() {
        let a = with_objects(vec![Entity::new("a", EntityKind::Cube)]);
        let b = with_objects(vec![Entity::new("a", EntityKind::Cube).at(Vec3::one())]);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn descendants_walks_the_hierarchy() {
        let mut child = Entity::new("root/leg", EntityKind::Cube);
        child.parent = Some("root".into());
        let mut grandchild = Entity::new("root/leg/foot", EntityKind::Cube);
        grandchild.parent = Some("root/leg".into());
        let s = with_objects(vec![
            Entity::new("root", EntityKind::Prop),
            child,
            grandchild,
            Entity::new("other", EntityKind::Sphere),
        ]);

        let mut found = s.descendants("root");
        found.sort();
        assert_eq!(found, vec!["root/leg".to_string(), "root/leg/foot".to_string()]);
        assert!(s.descendants("other").is_empty());
    }

    #[test]
    fn descendants_of_a_large_subtree() {
        let mut entities = vec![Entity::new("root", EntityKind::Prop)];
        for i in 0..2_000 {
            let mut e = Entity::new(format!("n{:04}", i), EntityKind::Cube);
            // 20 subtrees under root, each a line 100 deep.
            e.parent = Some(if i % 100 == 0 {
                "root".to_string()
            } else {
                format!("n{:04}", i - 1)
            });
            entities.push(e);
        }
        let s = with_objects(entities);
        assert_eq!(s.descendants("root").len(), 2_000);
        assert_eq!(s.descendants("n1950").len(), 49);
    }

    #[test]
    fn descendants_terminates_on_parent_cycles() {
        let mut a = Entity::new("a", EntityKind::Cube);
        a.parent = Some("b".into());
        let mut b = Entity::new("b", EntityKind::Cube);
        b.parent = Some("a".into());
        let s = with_objects(vec![a, b]);

        assert_eq!(s.descendants("a"), vec!["b".to_string()]);
    }
}
