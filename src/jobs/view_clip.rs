//! Frustum culling

use bevy_ecs::prelude::*;

use crate::jobs::{FrameContext, JobError, UpdateJob};
use crate::pipeline::{GEOMETRY_PASS, SHADOW_PASS};
use crate::scene::{Aabb, Renderable};

/// Tests every bounded entity against the camera frustum each frame and
/// toggles the [`Renderable`] tag. Passes only draw tagged entities, so a
/// visibility change re-records the draw passes.
#[derive(Default)]
pub struct RenderViewClipJob;

impl UpdateJob for RenderViewClipJob {
    fn name(&self) -> &str {
        "view_clip"
    }

    fn update(&mut self, world: &mut World, ctx: &mut FrameContext) -> Result<(), JobError> {
        let frustum = ctx.camera.frustum;
        let mut entered = Vec::new();
        let mut exited = Vec::new();

        let mut query = world.query::<(Entity, &Aabb, Option<&Renderable>)>();
        for (entity, aabb, renderable) in query.iter(world) {
            let visible = frustum.intersects_aabb(aabb);
            match (visible, renderable.is_some()) {
                (true, false) => entered.push(entity),
                (false, true) => exited.push(entity),
                _ => {}
            }
        }

        let changed = !entered.is_empty() || !exited.is_empty();
        for entity in entered {
            world.entity_mut(entity).insert(Renderable);
        }
        for entity in exited {
            world.entity_mut(entity).remove::<Renderable>();
        }
        if changed {
            ctx.graph.mark_pass_dirty(GEOMETRY_PASS);
            ctx.graph.mark_pass_dirty(SHADOW_PASS);
        }
        Ok(())
    }
}
