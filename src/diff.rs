//! Structural diff between two scene states.

use crate::state::SceneState;
use crate::types::{Entity, EntityId};

/// What has to be pushed to a renderer to turn `old` into `new`.
///
/// The three entity lists are disjoint: an id appears in at most one of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneDiff {
    /// Present in `new`, absent from `old`.
    pub to_create: Vec<Entity>,
    /// Present in both with different values; holds the `new` value.
    pub to_update: Vec<Entity>,
    /// Present in `old`, absent from `new`.
    pub to_delete: Vec<EntityId>,
    pub camera_changed: bool,
    pub world_changed: bool,
    pub environment_changed: bool,
}

impl SceneDiff {
    pub fn between(old: &SceneState, new: &SceneState) -> Self {
        let mut diff = SceneDiff {
            camera_changed: old.camera() != new.camera(),
            world_changed: old.world() != new.world(),
            environment_changed: old.environment() != new.environment(),
            ..Default::default()
        };

        // Identical maps share structure after a no-op transition.
        if old.objects().ptr_eq(new.objects()) {
            return diff;
        }

        for (id, entity) in new.objects().iter() {
            match old.get(id) {
                None => diff.to_create.push(entity.clone()),
                Some(prev) if prev != entity => diff.to_update.push(entity.clone()),
                Some(_) => {}
            }
        }
        for id in old.objects().keys() {
            if !new.contains(id) {
                diff.to_delete.push(id.clone());
            }
        }

        diff
    }

    /// Number of entity-level changes.
    pub fn entity_changes(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_changes() == 0
            && !self.camera_changed
            && !self.world_changed
            && !self.environment_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SceneMessage;
    use crate::reducer::reduce;
    use crate::types::{EntityKind, Vec3};

    fn state_with(ids: &[&str]) -> SceneState {
        reduce(
            &SceneState::new(),
            &SceneMessage::Create {
                entities: ids.iter().map(|id| Entity::new(*id, EntityKind::Cube)).collect(),
            },
            1,
        )
        .unwrap()
    }

    #[test]
    fn partitions_create_update_delete() {
        let old = state_with(&["a", "b", "c"]);
        let new = reduce(
            &old,
            &SceneMessage::Delete {
                ids: vec!["a".into()],
            },
            2,
        )
        .unwrap();
        let new = reduce(
            &new,
            &SceneMessage::Create {
                entities: vec![
                    Entity::new("b", EntityKind::Cube).at(Vec3::one()),
                    Entity::new("d", EntityKind::Sphere),
                ],
            },
            3,
        )
        .unwrap();

        let diff = SceneDiff::between(&old, &new);
        assert_eq!(diff.to_create.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["d"]);
        assert_eq!(diff.to_update.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(diff.to_delete, vec!["a".to_string()]);
        assert!(!diff.camera_changed);
    }

    #[test]
    fn identical_states_produce_empty_diff() {
        let s = state_with(&["a"]);
        assert!(SceneDiff::between(&s, &s).is_empty());
    }

    #[test]
    fn flags_sub_object_changes() {
        let old = SceneState::new();
        let new = reduce(
            &old,
            &SceneMessage::GridControl {
                grid_size: Some(5.0),
                transparency: None,
            },
            1,
        )
        .unwrap();
        let diff = SceneDiff::between(&old, &new);
        assert!(diff.world_changed);
        assert!(!diff.environment_changed);
        assert_eq!(diff.entity_changes(), 0);
    }
}
