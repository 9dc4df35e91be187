//! Per-frame update jobs
//!
//! Jobs bridge scene data to render data. Each frame they run in a fixed
//! order over the ECS world: transforms first, then bounds, then the render
//! graph itself, then the jobs that reconcile render-derived components.
//! Jobs that consume render-graph output read last frame's results; one
//! frame of staleness is accepted.

mod aabb;
mod light_data;
mod mesh_data;
mod render_graph;
mod transform;
mod view_clip;
mod vxgi;

pub use aabb::AabbJob;
pub use light_data::RenderLightDataJob;
pub use mesh_data::RenderMeshDataJob;
pub use render_graph::RenderGraphJob;
pub use transform::TransformJob;
pub use view_clip::RenderViewClipJob;
pub use vxgi::RenderVxgiJob;

use bevy_ecs::prelude::*;
use glam::{Mat4, Vec3};
use thiserror::Error;

use crate::assets::{AssetCache, ModelAsset, TextureAsset};
use crate::render_graph::{RenderGraph, RenderGraphError};
use crate::rhi::{BackendError, GraphicsBackend};
use crate::scene::{Camera, Frustum};
use crate::EngineConfig;

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Graph(#[from] RenderGraphError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Camera state snapshotted at the start of the frame so every job sees the
/// same view.
#[derive(Debug, Clone, Copy)]
pub struct CameraState {
    pub view_proj: Mat4,
    pub position: Vec3,
    pub frustum: Frustum,
    pub near: f32,
    pub far: f32,
}

impl CameraState {
    pub fn capture(camera: &Camera) -> Self {
        Self {
            view_proj: camera.view_projection_matrix(),
            position: camera.position,
            frustum: camera.frustum(),
            near: camera.projection.near(),
            far: camera.projection.far(),
        }
    }
}

/// Everything a job may touch besides the world itself.
pub struct FrameContext<'a> {
    pub dt: f32,
    pub frame_index: u64,
    pub camera: CameraState,
    pub backend: &'a mut dyn GraphicsBackend,
    pub graph: &'a mut RenderGraph,
    pub models: &'a AssetCache<ModelAsset>,
    pub textures: &'a AssetCache<TextureAsset>,
    pub config: &'a EngineConfig,
}

/// One step of the per-frame update.
pub trait UpdateJob: Send {
    fn name(&self) -> &str;

    fn update(&mut self, world: &mut World, ctx: &mut FrameContext) -> Result<(), JobError>;
}

/// Ordered job list run once per frame.
pub struct JobPipeline {
    jobs: Vec<Box<dyn UpdateJob>>,
}

impl JobPipeline {
    /// The standard editor frame: transforms, bounds, graph execution, then
    /// light, mesh, visibility and GI reconciliation.
    pub fn editor() -> Self {
        Self {
            jobs: vec![
                Box::new(TransformJob::default()),
                Box::new(AabbJob::default()),
                Box::new(RenderGraphJob::default()),
                Box::new(RenderLightDataJob::default()),
                Box::new(RenderMeshDataJob::default()),
                Box::new(RenderViewClipJob::default()),
                Box::new(RenderVxgiJob::default()),
            ],
        }
    }

    /// Custom job order, mostly for tests.
    pub fn with_jobs(jobs: Vec<Box<dyn UpdateJob>>) -> Self {
        Self { jobs }
    }

    pub fn run(&mut self, world: &mut World, ctx: &mut FrameContext) -> Result<(), JobError> {
        for job in &mut self.jobs {
            log::trace!("job '{}'", job.name());
            job.update(world, ctx)?;
        }
        Ok(())
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }
}
