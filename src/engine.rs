//! Engine facade tying world, jobs, graph and caches into a frame loop

use std::sync::Arc;

use bevy_ecs::prelude::*;
use thiserror::Error;

use crate::assets::{AssetCache, AssetSource, ModelAsset, TextureAsset};
use crate::jobs::{CameraState, FrameContext, JobError, JobPipeline};
use crate::pipeline::{build_editor_graph, COMPOSED_TARGET};
use crate::render_graph::{RenderGraph, RenderGraphError, RenderTargetNode};
use crate::rhi::GraphicsBackend;
use crate::scene::{despawn_recursive, Camera, MeshRenderData, VxgiRenderData};
use crate::EngineConfig;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] RenderGraphError),
    #[error(transparent)]
    Job(#[from] JobError),
}

/// The editor's frame orchestrator.
///
/// Owns the ECS world, the compiled render graph, the update job pipeline
/// and one asset cache per asset type. [`Engine::frame`] runs one complete
/// update-and-render cycle.
pub struct Engine {
    config: EngineConfig,
    backend: Box<dyn GraphicsBackend>,
    world: World,
    jobs: JobPipeline,
    graph: RenderGraph,
    models: AssetCache<ModelAsset>,
    textures: AssetCache<TextureAsset>,
    frame_index: u64,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        mut backend: Box<dyn GraphicsBackend>,
        model_source: Arc<dyn AssetSource>,
        texture_source: Arc<dyn AssetSource>,
    ) -> Result<Self, EngineError> {
        let graph = build_editor_graph(backend.as_mut(), &config)?;
        log::info!(
            "engine up: {} passes over {} targets, order {:?}",
            graph.pass_count(),
            graph.target_count(),
            graph.ordered_pass_names()
        );
        Ok(Self {
            models: AssetCache::new(model_source, config.model_cache_capacity),
            textures: AssetCache::new(texture_source, config.texture_cache_capacity),
            config,
            backend,
            world: World::new(),
            jobs: JobPipeline::editor(),
            graph,
            frame_index: 0,
        })
    }

    pub fn world(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn backend(&mut self) -> &mut dyn GraphicsBackend {
        self.backend.as_mut()
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn models(&self) -> &AssetCache<ModelAsset> {
        &self.models
    }

    pub fn textures(&self) -> &AssetCache<TextureAsset> {
        &self.textures
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// The final composed output target.
    pub fn output(&self) -> Result<&RenderTargetNode, RenderGraphError> {
        self.graph.target(COMPOSED_TARGET)
    }

    /// Run one frame: snapshot the camera, run every update job (which
    /// executes the render graph), tick the asset caches, then clear the
    /// ECS change trackers so the next frame only sees new edits.
    pub fn frame(&mut self, dt: f32) -> Result<(), EngineError> {
        let camera = {
            let mut query = self.world.query::<&Camera>();
            query.iter(&self.world).next().cloned().unwrap_or_default()
        };
        let mut ctx = FrameContext {
            dt,
            frame_index: self.frame_index,
            camera: CameraState::capture(&camera),
            backend: self.backend.as_mut(),
            graph: &mut self.graph,
            models: &self.models,
            textures: &self.textures,
            config: &self.config,
        };
        self.jobs.run(&mut self.world, &mut ctx)?;

        self.models.tick();
        self.textures.tick();
        self.world.clear_trackers();
        self.frame_index += 1;
        Ok(())
    }

    /// Recreate size-relative targets and adjust the camera aspect ratio.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        self.config.width = width;
        self.config.height = height;
        self.graph.resize(self.backend.as_mut(), width, height)?;
        let mut query = self.world.query::<&mut Camera>();
        for mut camera in query.iter_mut(&mut self.world) {
            camera.set_aspect(width as f32, height as f32);
        }
        Ok(())
    }

    /// Destroy an entity and its descendants, releasing their GPU objects.
    pub fn despawn(&mut self, entity: Entity) {
        despawn_recursive(&mut self.world, self.backend.as_mut(), entity);
    }

    /// Release every GPU object the engine still owns.
    pub fn shutdown(mut self) {
        let entities: Vec<Entity> = self
            .world
            .query_filtered::<Entity, Or<(With<MeshRenderData>, With<VxgiRenderData>)>>()
            .iter(&self.world)
            .collect();
        for entity in entities {
            if let Some(render) = self.world.entity_mut(entity).take::<MeshRenderData>() {
                render.release(self.backend.as_mut());
            }
            if let Some(render) = self.world.entity_mut(entity).take::<VxgiRenderData>() {
                render.release(self.backend.as_mut());
            }
        }
        self.graph.shutdown(self.backend.as_mut());
    }
}
