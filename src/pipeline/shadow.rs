//! Cascaded shadow map pass over the shared atlas

use bevy_ecs::prelude::*;
use glam::Vec4;

use crate::pipeline::{attachment_view, SHADOW_ATLAS_TARGET, SHADOW_PASS};
use crate::render_graph::{AttachmentKind, PassTargets, RenderPass, RenderResources};
use crate::rhi::*;
use crate::scene::{DirectionShadow, LightRenderData, MeshRenderData, Renderable};

pub const SHADOW_SHADER: &str = r#"
struct CascadeUniform {
    light_view_proj: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> cascade: CascadeUniform;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return cascade.light_view_proj * vec4<f32>(position, 1.0);
}
"#;

/// Depth-only pass rendering every shadow caster's cascades into its tile of
/// the shared atlas. Each light owns one normalized viewport assigned by the
/// light-data job; cascades subdivide the tile in a 2x2 layout.
pub struct ShadowPass {
    inputs: Vec<String>,
    outputs: Vec<String>,
    pipeline: Option<RenderPipelineHandle>,
    cascade_buffer: Option<BufferHandle>,
    cascade_bind_group: Option<BindGroupHandle>,
}

impl ShadowPass {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: vec![SHADOW_ATLAS_TARGET.to_owned()],
            pipeline: None,
            cascade_buffer: None,
            cascade_bind_group: None,
        }
    }

    /// Pixel rectangle of one cascade inside a light's atlas tile.
    fn cascade_viewport(tile: Vec4, cascade: u32, atlas_size: f32) -> (f32, f32, f32, f32) {
        let half_w = tile.z * 0.5;
        let half_h = tile.w * 0.5;
        let col = (cascade % 2) as f32;
        let row = (cascade / 2) as f32;
        (
            (tile.x + col * half_w) * atlas_size,
            (tile.y + row * half_h) * atlas_size,
            half_w * atlas_size,
            half_h * atlas_size,
        )
    }
}

impl Default for ShadowPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        SHADOW_PASS
    }

    fn inputs(&self) -> &[String] {
        &self.inputs
    }

    fn outputs(&self) -> &[String] {
        &self.outputs
    }

    fn initialize(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        let layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            ty: BindingType::UniformBuffer,
        }])?;
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("shadow/cascade".into()),
            size: 64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        let bind_group = backend.create_bind_group(
            layout,
            &[(
                0,
                BindGroupEntry::Buffer {
                    buffer,
                    offset: 0,
                    size: None,
                },
            )],
        )?;
        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(SHADOW_PASS.into()),
            shader_source: SHADOW_SHADER.into(),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            // Front-face culling reduces peter-panning on closed meshes.
            cull_mode: CullMode::Front,
            depth_stencil: Some(DepthStencilState {
                format: TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            }),
            color_targets: Vec::new(),
        })?;
        self.pipeline = Some(pipeline);
        self.cascade_buffer = Some(buffer);
        self.cascade_bind_group = Some(bind_group);
        Ok(())
    }

    fn prepare(
        &mut self,
        _backend: &mut dyn GraphicsBackend,
        world: &mut World,
        _resources: &RenderResources,
    ) -> BackendResult<bool> {
        let added = world
            .query_filtered::<Entity, Added<MeshRenderData>>()
            .iter(world)
            .next()
            .is_some();
        Ok(added)
    }

    fn record(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        world: &mut World,
        targets: &PassTargets,
    ) -> BackendResult<()> {
        let output = targets.output(0);
        let depth = attachment_view(output, AttachmentKind::Depth, 0)?;
        let atlas_size = output.gbuffer().map(|g| g.width as f32).unwrap_or(0.0);

        let casters: Vec<(Vec4, u32)> = {
            let mut query = world.query::<(&DirectionShadow, &LightRenderData)>();
            query
                .iter(world)
                .filter(|(_, render)| render.atlas_index.is_some())
                .map(|(shadow, _)| (shadow.atlas_viewport, shadow.cascade_count))
                .collect()
        };

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(SHADOW_PASS.into()),
            color_attachments: Vec::new(),
            depth_attachment: Some(DepthAttachment {
                view: depth,
                load_op: LoadOp::Clear([0.0; 4]),
                store_op: StoreOp::Store,
                clear_value: 1.0,
            }),
        });
        if let (Some(pipeline), Some(bind_group)) = (self.pipeline, self.cascade_bind_group) {
            backend.set_render_pipeline(pipeline);
            backend.set_bind_group(0, bind_group);
            for (tile, cascade_count) in casters {
                for cascade in 0..cascade_count.min(4) {
                    let (x, y, w, h) = Self::cascade_viewport(tile, cascade, atlas_size);
                    backend.set_viewport(x, y, w, h);
                    let mut query = world.query_filtered::<&MeshRenderData, With<Renderable>>();
                    for render in query.iter(world) {
                        backend.set_vertex_buffer(0, render.vertex_buffer, 0);
                        backend.set_index_buffer(render.index_buffer, 0, IndexFormat::Uint32);
                        backend.draw_indexed(0..render.index_count, 0, 0..1);
                    }
                }
            }
        }
        backend.end_render_pass();
        Ok(())
    }
}
