//! World-space bounds derivation

use bevy_ecs::prelude::*;

use crate::jobs::{FrameContext, JobError, UpdateJob};
use crate::scene::{Aabb, GlobalTransform, MeshSource};

/// Attaches a world-space [`Aabb`] to every mesh entity whose model or
/// global transform changed. Models not yet in the cache are scheduled for a
/// background load and picked up on a later frame.
#[derive(Default)]
pub struct AabbJob;

impl UpdateJob for AabbJob {
    fn name(&self) -> &str {
        "aabb"
    }

    fn update(&mut self, world: &mut World, ctx: &mut FrameContext) -> Result<(), JobError> {
        let mut updates = Vec::new();
        let mut query = world.query_filtered::<(Entity, &MeshSource, &GlobalTransform), Or<(
            Changed<MeshSource>,
            Changed<GlobalTransform>,
        )>>();
        for (entity, source, global) in query.iter(world) {
            match ctx.models.get(&source.model) {
                Some(model) => {
                    updates.push((entity, model.bounds.transformed(global.matrix())));
                }
                None => match ctx.models.get_async(&source.model) {
                    // Resolves on a later frame through the cache tick.
                    Ok(_) => {}
                    Err(err) => {
                        log::warn!("bounds unavailable for '{}': {err}", source.model);
                    }
                },
            }
        }
        for (entity, aabb) in updates {
            world.entity_mut(entity).insert(aabb);
        }
        Ok(())
    }
}
