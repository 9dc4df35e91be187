//! Render graph execution step

use bevy_ecs::prelude::*;

use crate::jobs::{FrameContext, JobError, UpdateJob};
use crate::render_graph::RenderResources;

/// Executes the compiled render graph. Runs before the reconciliation jobs,
/// so passes see the render data produced on the previous frame; new
/// entities become visible one frame later.
#[derive(Default)]
pub struct RenderGraphJob;

impl UpdateJob for RenderGraphJob {
    fn name(&self) -> &str {
        "render_graph"
    }

    fn update(&mut self, world: &mut World, ctx: &mut FrameContext) -> Result<(), JobError> {
        let resources = RenderResources {
            models: ctx.models,
            textures: ctx.textures,
        };
        ctx.graph.execute(&mut *ctx.backend, world, &resources)?;
        Ok(())
    }
}
