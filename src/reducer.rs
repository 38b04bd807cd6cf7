//! Transition reducers – pure `(state, message) -> state` functions.
//!
//! Every accepted message produces a successor at `version + 1`, even when
//! the message turns out to be a no-op (updating or deleting an unknown id).
//! A rejected message returns a [`TransitionError`] and the input state is
//! left as it was.  Reducers never read the clock: the timestamp comes from
//! the caller (the operation envelope), so folding a log is reproducible.

use crate::error::TransitionError;
use crate::message::{Operation, SceneMessage};
use crate::props;
use crate::state::SceneState;
use crate::types::{Entity, EntityId, Environment};
use log::warn;

/// Apply one message to `state`.
pub fn reduce(
    state: &SceneState,
    message: &SceneMessage,
    timestamp: u64,
) -> Result<SceneState, TransitionError> {
    let mut next = state.successor(timestamp);

    match message {
        SceneMessage::Create { entities } => {
            validate_ids(entities)?;
            for e in entities {
                next.objects.insert(e.id.clone(), e.clone());
            }
        }

        SceneMessage::Update { entities } => {
            validate_ids(entities)?;
            for e in entities {
                if next.objects.contains_key(&e.id) {
                    next.objects.insert(e.id.clone(), e.clone());
                }
            }
        }

        SceneMessage::Delete { ids } => {
            for id in ids {
                remove_subtree(&mut next, id);
            }
        }

        SceneMessage::Clear => {
            next.objects.clear();
        }

        SceneMessage::Camera {
            position,
            target,
            fov,
        } => {
            if let Some(p) = position {
                next.camera.position = *p;
            }
            if let Some(t) = target {
                next.camera.target = *t;
            }
            if let Some(f) = fov {
                next.camera.fov = *f;
            }
        }

        SceneMessage::WorldInitialized { world } => {
            next.world = *world;
        }

        SceneMessage::GridControl {
            grid_size,
            transparency,
        } => {
            if let Some(g) = grid_size {
                next.world.grid_size = *g;
            }
            if let Some(t) = transparency {
                next.world.transparency = *t;
            }
        }

        SceneMessage::InitEnvironment { environment } => {
            next.environment = validated(environment.clone())?;
        }

        SceneMessage::ChangeScale { scale } => {
            next.environment = Environment {
                scale: *scale,
                ..state.environment.clone()
            };
        }

        SceneMessage::SetGravity { gravity } => {
            next.environment = validated(Environment {
                gravity: *gravity,
                ..state.environment.clone()
            })?;
        }

        SceneMessage::SetAtmosphere { atmosphere } => {
            next.environment = Environment {
                atmosphere: atmosphere.clone(),
                ..state.environment.clone()
            };
        }

        SceneMessage::SetTemperature { temperature } => {
            next.environment = validated(Environment {
                temperature: *temperature,
                ..state.environment.clone()
            })?;
        }

        SceneMessage::InitScene { clear, environment } => {
            if let Some(env) = environment {
                next.environment = validated(env.clone())?;
            }
            if *clear {
                next.objects.clear();
            }
        }

        SceneMessage::CreateProp { id, prop, position } => {
            if id.is_empty() {
                return Err(TransitionError::EmptyEntityId);
            }
            let spec = props::lookup(prop).ok_or_else(|| {
                warn!("Rejected create_prop '{}': unknown prop type '{}'", id, prop);
                TransitionError::UnknownProp(prop.clone())
            })?;
            // Re-creating a prop replaces the whole hierarchy.
            remove_subtree(&mut next, id);
            for e in spec.instantiate(id, *position) {
                next.objects.insert(e.id.clone(), e);
            }
        }

        SceneMessage::DeleteProp { id } => {
            remove_subtree(&mut next, id);
        }
    }

    Ok(next)
}

/// Apply a sequenced operation, stamping the state with its timestamp.
pub fn apply_operation(state: &SceneState, op: &Operation) -> Result<SceneState, TransitionError> {
    reduce(state, &op.message, op.timestamp)
}

/// Fold operations in order onto `initial`.  Rejected operations are logged
/// and skipped.
pub fn fold<'a, I>(initial: SceneState, operations: I) -> SceneState
where
    I: IntoIterator<Item = &'a Operation>,
{
    operations
        .into_iter()
        .fold(initial, |state, op| match apply_operation(&state, op) {
            Ok(next) => next,
            Err(e) => {
                warn!(
                    "Skipping operation #{} ({}): {}",
                    op.seq_num,
                    op.message.kind(),
                    e
                );
                state
            }
        })
}

fn validate_ids(entities: &[Entity]) -> Result<(), TransitionError> {
    if entities.iter().any(|e| e.id.is_empty()) {
        return Err(TransitionError::EmptyEntityId);
    }
    Ok(())
}

fn validated(env: Environment) -> Result<Environment, TransitionError> {
    if !env.gravity.is_finite() {
        return Err(TransitionError::InvalidEnvironment(format!(
            "gravity must be finite, got {}",
            env.gravity
        )));
    }
    if !env.temperature.is_finite() {
        return Err(TransitionError::InvalidEnvironment(format!(
            "temperature must be finite, got {}",
            env.temperature
        )));
    }
    Ok(env)
}

fn remove_subtree(state: &mut SceneState, id: &EntityId) {
    if !state.objects.contains_key(id) {
        return;
    }
    for child in state.descendants(id) {
        state.objects.remove(&child);
    }
    state.objects.remove(id);
}
