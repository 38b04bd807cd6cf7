//! Renderer boundary consumed by the reconciliation pipeline.
//!
//! Any concrete 3D engine implements [`Renderer`].  Calls for distinct ids
//! may run concurrently, so implementations must be `Send + Sync`.
//!
//! [`HeadlessRenderer`] keeps the rendered scene in memory.  It serves as the
//! server-side no-op renderer and as the test double (with failure
//! injection).  It is strict: creating an existing element or touching a
//! missing one is an error, which keeps the pipeline honest.

use crate::error::RenderError;
use crate::types::{Camera, Entity, EntityId, Environment, WorldSettings};
use async_trait::async_trait;
use log::trace;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn create_element(&self, entity: &Entity) -> Result<(), RenderError>;
    async fn update_element(&self, entity: &Entity) -> Result<(), RenderError>;
    async fn delete_element(&self, id: &str) -> Result<(), RenderError>;
    async fn set_camera(&self, camera: &Camera) -> Result<(), RenderError>;
    async fn set_world(&self, world: &WorldSettings) -> Result<(), RenderError>;
    async fn set_environment(&self, environment: &Environment) -> Result<(), RenderError>;
}

// ---------------------------------------------------------------------------
// Headless renderer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HeadlessScene {
    elements: BTreeMap<EntityId, Entity>,
    camera: Option<Camera>,
    world: Option<WorldSettings>,
    environment: Option<Environment>,
    calls: u64,
}

/// Element call kinds, for targeted failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementOp {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Default)]
struct Failures {
    entities: HashSet<EntityId>,
    once: HashSet<(EntityId, ElementOp)>,
    camera: bool,
}

#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    scene: Mutex<HeadlessScene>,
    failures: Mutex<Failures>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every create/update/delete for `id` fail until cleared.
    pub fn fail_entity(&self, id: impl Into<EntityId>) {
        self.failures.lock().entities.insert(id.into());
    }

    /// Make the next `op` call for `id` fail, once.
    pub fn fail_next(&self, id: impl Into<EntityId>, op: ElementOp) {
        self.failures.lock().once.insert((id.into(), op));
    }

    /// Make `set_camera` fail until cleared.
    pub fn fail_camera(&self) {
        self.failures.lock().camera = true;
    }

    pub fn clear_failures(&self) {
        *self.failures.lock() = Failures::default();
    }

    /// Copy of every rendered element.
    pub fn elements(&self) -> BTreeMap<EntityId, Entity> {
        self.scene.lock().elements.clone()
    }

    pub fn element_ids(&self) -> Vec<EntityId> {
        self.scene.lock().elements.keys().cloned().collect()
    }

    pub fn element_count(&self) -> usize {
        self.scene.lock().elements.len()
    }

    pub fn camera(&self) -> Option<Camera> {
        self.scene.lock().camera
    }

    pub fn world(&self) -> Option<WorldSettings> {
        self.scene.lock().world
    }

    pub fn environment(&self) -> Option<Environment> {
        self.scene.lock().environment.clone()
    }

    /// Total renderer calls received, failed ones included.
    pub fn call_count(&self) -> u64 {
        self.scene.lock().calls
    }

    fn check_entity(&self, id: &str, op: ElementOp) -> Result<(), RenderError> {
        let mut failures = self.failures.lock();
        if failures.entities.contains(id) || failures.once.remove(&(id.to_string(), op)) {
            return Err(RenderError::Backend(format!(
                "injected {:?} failure for '{}'",
                op, id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Renderer for HeadlessRenderer {
    async fn create_element(&self, entity: &Entity) -> Result<(), RenderError> {
        self.scene.lock().calls += 1;
        self.check_entity(&entity.id, ElementOp::Create)?;
        let mut scene = self.scene.lock();
        if scene.elements.contains_key(&entity.id) {
            return Err(RenderError::AlreadyExists(entity.id.clone()));
        }
        trace!("headless: create {}", entity.id);
        scene.elements.insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn update_element(&self, entity: &Entity) -> Result<(), RenderError> {
        self.scene.lock().calls += 1;
        self.check_entity(&entity.id, ElementOp::Update)?;
        let mut scene = self.scene.lock();
        match scene.elements.get_mut(&entity.id) {
            Some(slot) => {
                trace!("headless: update {}", entity.id);
                *slot = entity.clone();
                Ok(())
            }
            None => Err(RenderError::NotFound(entity.id.clone())),
        }
    }

    async fn delete_element(&self, id: &str) -> Result<(), RenderError> {
        self.scene.lock().calls += 1;
        self.check_entity(id, ElementOp::Delete)?;
        let mut scene = self.scene.lock();
        match scene.elements.remove(id) {
            Some(_) => {
                trace!("headless: delete {}", id);
                Ok(())
            }
            None => Err(RenderError::NotFound(id.to_string())),
        }
    }

    async fn set_camera(&self, camera: &Camera) -> Result<(), RenderError> {
        let mut scene = self.scene.lock();
        scene.calls += 1;
        if self.failures.lock().camera {
            return Err(RenderError::Backend("injected camera failure".into()));
        }
        scene.camera = Some(*camera);
        Ok(())
    }

    async fn set_world(&self, world: &WorldSettings) -> Result<(), RenderError> {
        let mut scene = self.scene.lock();
        scene.calls += 1;
        scene.world = Some(*world);
        Ok(())
    }

    async fn set_environment(&self, environment: &Environment) -> Result<(), RenderError> {
        let mut scene = self.scene.lock();
        scene.calls += 1;
        scene.environment = Some(environment.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;

    #[tokio::test]
    async fn headless_is_strict_about_existence() {
        let r = HeadlessRenderer::new();
        let e = Entity::new("a", EntityKind::Cube);

        r.create_element(&e).await.unwrap();
        assert_eq!(
            r.create_element(&e).await,
            Err(RenderError::AlreadyExists("a".into()))
        );
        r.delete_element("a").await.unwrap();
        assert_eq!(r.delete_element("a").await, Err(RenderError::NotFound("a".into())));
        assert_eq!(r.update_element(&e).await, Err(RenderError::NotFound("a".into())));
    }

    #[tokio::test]
    async fn injected_failures_can_be_cleared() {
        let r = HeadlessRenderer::new();
        r.fail_entity("a");
        let e = Entity::new("a", EntityKind::Cube);
        assert!(r.create_element(&e).await.is_err());
        assert_eq!(r.element_count(), 0);

        r.clear_failures();
        r.create_element(&e).await.unwrap();
        assert_eq!(r.element_ids(), vec!["a".to_string()]);
        assert_eq!(r.call_count(), 2);
    }

    #[tokio::test]
    async fn one_shot_failure_targets_a_single_call_kind() {
        let r = HeadlessRenderer::new();
        let e = Entity::new("a", EntityKind::Cube);
        r.fail_next("a", ElementOp::Delete);

        r.create_element(&e).await.unwrap();
        assert!(r.delete_element("a").await.is_err());
        r.delete_element("a").await.unwrap();
    }
}
