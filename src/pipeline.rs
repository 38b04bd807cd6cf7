//! Reconciliation pipeline – diff, apply, then commit or roll back.
//!
//! ```text
//! reconcile(next)
//!   ├── SceneDiff::between(rendered, next)
//!   ├── one renderer call per diff item, all joined (barrier)
//!   ├── every call Ok  → rendered = committed = next
//!   └── any call Err   → rollback(journal of the calls that succeeded)
//!                          ├── unwind each entry → pre-transition scene
//!                          └── unwind failed     → clear every tracked element
//! ```
//!
//! `rendered` is what the renderer currently shows.  It equals `committed`
//! except after a hard rollback, when it is reset to an empty scene so the
//! next successful reconciliation repopulates everything.

use crate::diff::SceneDiff;
use crate::error::{RenderError, RollbackError};
use crate::renderer::Renderer;
use crate::state::SceneState;
use crate::types::{Camera, Entity, EntityId, Environment, WorldSettings};
use futures::future::{join_all, BoxFuture, FutureExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of one reconciliation.  `version` is the version that was being
/// applied, whether or not it committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub success: bool,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconcileResult {
    fn committed(version: u64) -> Self {
        Self {
            success: true,
            version,
            error: None,
        }
    }

    fn failed(version: u64, error: String) -> Self {
        Self {
            success: false,
            version,
            error: Some(error),
        }
    }
}

/// A renderer call that succeeded during the current transition, with what
/// is needed to undo it.
#[derive(Debug, Clone)]
enum Applied {
    Created(EntityId),
    Updated(Entity),
    Deleted(Entity),
    Camera(Camera),
    World(WorldSettings),
    Environment(Environment),
}

type Call<'a> = BoxFuture<'a, (Applied, Result<(), RenderError>)>;

/// Held for the duration of a rollback; a second acquisition fails.
pub(crate) struct RollbackGuard(Arc<AtomicBool>);

impl RollbackGuard {
    pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ReconciliationPipeline {
    renderer: Arc<dyn Renderer>,
    committed: SceneState,
    rendered: SceneState,
    /// Ids of every element this pipeline has created on the renderer.
    handles: BTreeSet<EntityId>,
    rollback_active: Arc<AtomicBool>,
}

impl ReconciliationPipeline {
    /// `initial` becomes the committed state; nothing is rendered until the
    /// first reconciliation.
    pub fn new(renderer: Arc<dyn Renderer>, initial: SceneState) -> Self {
        Self {
            renderer,
            committed: initial,
            rendered: SceneState::default(),
            handles: BTreeSet::new(),
            rollback_active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn committed(&self) -> &SceneState {
        &self.committed
    }

    pub fn handles(&self) -> &BTreeSet<EntityId> {
        &self.handles
    }

    pub fn is_rolling_back(&self) -> bool {
        self.rollback_active.load(Ordering::Acquire)
    }

    /// Push the committed state to the renderer again (after a hard
    /// rollback emptied it).
    pub async fn repopulate(&mut self) -> ReconcileResult {
        let committed = self.committed.clone();
        self.reconcile(committed).await
    }

    /// Render `next` and commit it if every renderer call succeeds.
    pub async fn reconcile(&mut self, next: SceneState) -> ReconcileResult {
        let version = next.version();
        let diff = SceneDiff::between(&self.rendered, &next);

        let results = {
            let renderer = self.renderer.as_ref();
            let prev = &self.rendered;
            let mut calls: Vec<Call<'_>> = Vec::with_capacity(diff.entity_changes() + 3);

            for entity in &diff.to_create {
                calls.push(
                    async move {
                        let r = renderer.create_element(entity).await;
                        (Applied::Created(entity.id.clone()), r)
                    }
                    .boxed(),
                );
            }
            for entity in &diff.to_update {
                let Some(previous) = prev.get(&entity.id).cloned() else {
                    continue;
                };
                calls.push(
                    async move { (Applied::Updated(previous), renderer.update_element(entity).await) }
                        .boxed(),
                );
            }
            for id in &diff.to_delete {
                let Some(previous) = prev.get(id).cloned() else {
                    continue;
                };
                calls.push(
                    async move { (Applied::Deleted(previous), renderer.delete_element(id).await) }
                        .boxed(),
                );
            }
            if diff.camera_changed {
                let before = *prev.camera();
                let camera = next.camera();
                calls.push(
                    async move { (Applied::Camera(before), renderer.set_camera(camera).await) }
                        .boxed(),
                );
            }
            if diff.world_changed {
                let before = *prev.world();
                let world = next.world();
                calls.push(
                    async move { (Applied::World(before), renderer.set_world(world).await) }
                        .boxed(),
                );
            }
            if diff.environment_changed {
                let before = prev.environment().clone();
                let environment = next.environment();
                calls.push(
                    async move {
                        let r = renderer.set_environment(environment).await;
                        (Applied::Environment(before), r)
                    }
                    .boxed(),
                );
            }

            join_all(calls).await
        };

        let mut journal = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for (applied, result) in results {
            match result {
                Ok(()) => journal.push(applied),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            for entry in &journal {
                match entry {
                    Applied::Created(id) => {
                        self.handles.insert(id.clone());
                    }
                    Applied::Deleted(previous) => {
                        self.handles.remove(&previous.id);
                    }
                    _ => {}
                }
            }
            debug!(
                "Committed scene v{} (+{} ~{} -{})",
                version,
                diff.to_create.len(),
                diff.to_update.len(),
                diff.to_delete.len()
            );
            self.rendered = next.clone();
            self.committed = next;
            return ReconcileResult::committed(version);
        }

        let message = format!(
            "{} of {} renderer call(s) failed, first: {}",
            errors.len(),
            errors.len() + journal.len(),
            errors[0]
        );
        warn!("Scene v{} not committed: {}", version, message);

        if let Err(e) = self.rollback(journal).await {
            error!("Rollback after v{}: {}", version, e);
        }
        ReconcileResult::failed(version, message)
    }

    /// Undo the calls recorded in `journal`.  If any undo call fails, every
    /// tracked element is deleted and the rendered baseline becomes empty.
    async fn rollback(&mut self, journal: Vec<Applied>) -> Result<(), RollbackError> {
        let Some(_guard) = RollbackGuard::acquire(&self.rollback_active) else {
            error!("Invariant violation: rollback requested while one is in progress");
            return Err(RollbackError::Reentrant);
        };

        let renderer = self.renderer.as_ref();
        let undo: Vec<BoxFuture<'_, Result<(), RenderError>>> = journal
            .iter()
            .map(|applied| match applied {
                Applied::Created(id) => renderer.delete_element(id),
                Applied::Updated(previous) => renderer.update_element(previous),
                Applied::Deleted(previous) => renderer.create_element(previous),
                Applied::Camera(camera) => renderer.set_camera(camera),
                Applied::World(world) => renderer.set_world(world),
                Applied::Environment(env) => renderer.set_environment(env),
            })
            .collect();

        let mut failed = 0;
        for result in join_all(undo).await {
            if let Err(e) = result {
                warn!("Unwind call failed: {}", e);
                failed += 1;
            }
        }
        if failed == 0 {
            debug!("Rolled back {} renderer call(s)", journal.len());
            return Ok(());
        }

        // Hard reset: everything tracked plus anything this batch created.
        let created = journal.iter().filter_map(|applied| match applied {
            Applied::Created(id) => Some(id.clone()),
            _ => None,
        });
        let cleared = self.hard_reset(created).await;
        warn!("Hard rollback cleared {} element(s)", cleared);
        Err(RollbackError::Partial { failed })
    }

    /// Delete every element this pipeline knows of and commit an empty
    /// scene.  Always succeeds; delete failures are logged.
    pub async fn clear(&mut self) -> ReconcileResult {
        let cleared = self.hard_reset(std::iter::empty()).await;
        self.committed = SceneState::default();
        info!("Cleared {} element(s)", cleared);
        ReconcileResult::committed(0)
    }

    /// Delete the tracked elements plus `extra`, forget them, and reset the
    /// rendered baseline to an empty scene.  Returns how many were deleted.
    async fn hard_reset(&mut self, extra: impl IntoIterator<Item = EntityId>) -> usize {
        let mut doomed = std::mem::take(&mut self.handles);
        doomed.extend(extra);
        let renderer = self.renderer.as_ref();
        let results = join_all(doomed.iter().map(|id| renderer.delete_element(id))).await;
        for (id, result) in doomed.iter().zip(results) {
            if let Err(e) = result {
                debug!("Clearing element {} during hard reset: {}", id, e);
            }
        }
        self.rendered = SceneState::default();
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_guard_refuses_second_acquisition() {
        let flag = Arc::new(AtomicBool::new(false));
        let first = RollbackGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(RollbackGuard::acquire(&flag).is_none());

        drop(first);
        assert!(RollbackGuard::acquire(&flag).is_some());
    }
}
