//! ECS-driven 3D scene editor core.
//!
//! Three pieces cooperate every frame:
//!
//! - a render graph of passes and shared targets, topologically sorted at
//!   compile time and re-recorded only when something changed,
//! - a fixed pipeline of update jobs that derive render data (transforms,
//!   bounds, lights, GPU meshes, visibility, GI probes) from scene
//!   components through ECS change detection,
//! - reference-counted LRU asset caches that load models and textures in
//!   the background.
//!
//! Concrete GPU backends implement [`rhi::GraphicsBackend`]; the bundled
//! [`rhi::headless::HeadlessBackend`] drives everything without a device.

pub mod assets;
pub mod engine;
pub mod jobs;
pub mod pipeline;
pub mod render_graph;
pub mod rhi;
pub mod scene;

pub use engine::{Engine, EngineError};

/// Engine-wide limits and initial dimensions.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub width: u32,
    pub height: u32,
    /// Capacity of the global light buffer.
    pub max_lights: usize,
    /// Voxelization slots for GI probes inside the frustum.
    pub max_probe_count: usize,
    pub shadow_atlas_size: u32,
    /// Log/uniform mix for cascade split placement.
    pub cascade_lambda: f32,
    /// Equirectangular HDR image for the environment cubemap.
    pub environment_hdr: Option<String>,
    pub model_cache_capacity: usize,
    pub texture_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            max_lights: 64,
            max_probe_count: 8,
            shadow_atlas_size: 4096,
            cascade_lambda: 0.75,
            environment_hdr: None,
            model_cache_capacity: 256,
            texture_cache_capacity: 256,
        }
    }
}
