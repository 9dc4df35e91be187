//! Forward PBR geometry pass

use bevy_ecs::prelude::*;

use crate::pipeline::{attachment_view, GEOMETRY_PASS, SCENE_COLOR_TARGET};
use crate::render_graph::{AttachmentKind, PassTargets, RenderPass, RenderResources};
use crate::rhi::*;
use crate::scene::{Camera, CameraUniformData, MeshRenderData, Renderable};

pub const GEOMETRY_SHADER: &str = r#"
struct CameraUniform {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
}

struct MaterialUniform {
    base_color: vec4<f32>,
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniform;
@group(0) @binding(1) var shadow_atlas: texture_depth_2d;
@group(0) @binding(2) var irradiance_map: texture_cube<f32>;
@group(0) @binding(3) var prefilter_map: texture_cube<f32>;
@group(0) @binding(4) var env_sampler: sampler;
@group(0) @binding(5) var shadow_sampler: sampler_comparison;

@group(1) @binding(0) var<uniform> material: MaterialUniform;
@group(1) @binding(1) var base_color_texture: texture_2d<f32>;
@group(1) @binding(2) var material_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_normal: vec3<f32>,
    @location(1) uv: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = camera.view_proj * vec4<f32>(in.position, 1.0);
    out.world_normal = in.normal;
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = material.base_color * textureSample(base_color_texture, material_sampler, in.uv);
    let ambient = textureSample(irradiance_map, env_sampler, in.world_normal).rgb;
    return vec4<f32>(albedo.rgb * ambient, albedo.a);
}
"#;

/// Draws every renderable mesh into the HDR scene color target, sampling
/// the shadow atlas and both IBL cubemaps.
pub struct GeometryPass {
    inputs: Vec<String>,
    outputs: Vec<String>,
    pipeline: Option<RenderPipelineHandle>,
    camera_buffer: Option<BufferHandle>,
    frame_layout: Option<BindGroupLayoutHandle>,
    frame_bind_group: Option<BindGroupHandle>,
    env_sampler: Option<SamplerHandle>,
    shadow_sampler: Option<SamplerHandle>,
}

impl GeometryPass {
    pub fn new() -> Self {
        Self {
            inputs: vec![
                crate::pipeline::SHADOW_ATLAS_TARGET.to_owned(),
                crate::pipeline::IRRADIANCE_TARGET.to_owned(),
                crate::pipeline::PREFILTER_TARGET.to_owned(),
            ],
            outputs: vec![SCENE_COLOR_TARGET.to_owned()],
            pipeline: None,
            camera_buffer: None,
            frame_layout: None,
            frame_bind_group: None,
            env_sampler: None,
            shadow_sampler: None,
        }
    }
}

impl Default for GeometryPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPass for GeometryPass {
    fn name(&self) -> &str {
        GEOMETRY_PASS
    }

    fn inputs(&self) -> &[String] {
        &self.inputs
    }

    fn outputs(&self) -> &[String] {
        &self.outputs
    }

    fn initialize(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        let camera_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("geometry/camera".into()),
            size: std::mem::size_of::<CameraUniformData>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        let frame_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 1,
                ty: BindingType::Texture,
            },
            BindGroupLayoutEntry {
                binding: 2,
                ty: BindingType::Texture,
            },
            BindGroupLayoutEntry {
                binding: 3,
                ty: BindingType::Texture,
            },
            BindGroupLayoutEntry {
                binding: 4,
                ty: BindingType::Sampler { comparison: false },
            },
            BindGroupLayoutEntry {
                binding: 5,
                ty: BindingType::Sampler { comparison: true },
            },
        ])?;
        // Layout shape of the per-object bind group built by the mesh-data
        // job: material uniform, base color texture, sampler.
        let object_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 1,
                ty: BindingType::Texture,
            },
            BindGroupLayoutEntry {
                binding: 2,
                ty: BindingType::Sampler { comparison: false },
            },
        ])?;
        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(GEOMETRY_PASS.into()),
            shader_source: GEOMETRY_SHADER.into(),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![frame_layout, object_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Back,
            depth_stencil: Some(DepthStencilState {
                format: TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            }),
            color_targets: vec![ColorTargetState {
                format: TextureFormat::Rgba16Float,
                blend: false,
            }],
        })?;
        self.env_sampler = Some(backend.create_sampler(&SamplerDescriptor {
            label: Some("geometry/env".into()),
            ..Default::default()
        })?);
        self.shadow_sampler = Some(backend.create_sampler(&SamplerDescriptor {
            label: Some("geometry/shadow".into()),
            compare: Some(CompareFunction::LessEqual),
            ..Default::default()
        })?);
        self.camera_buffer = Some(camera_buffer);
        self.frame_layout = Some(frame_layout);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn create_frame_buffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        targets: &PassTargets,
    ) -> BackendResult<()> {
        let (Some(layout), Some(camera_buffer), Some(env_sampler), Some(shadow_sampler)) = (
            self.frame_layout,
            self.camera_buffer,
            self.env_sampler,
            self.shadow_sampler,
        ) else {
            return Err(BackendError::Recording(
                "geometry pass used before initialize".into(),
            ));
        };
        let shadow_atlas = attachment_view(targets.input(0), AttachmentKind::Depth, 0)?;
        let irradiance = attachment_view(targets.input(1), AttachmentKind::Hdr, 0)?;
        let prefilter = attachment_view(targets.input(2), AttachmentKind::Hdr, 0)?;

        let bind_group = backend.create_bind_group(
            layout,
            &[
                (
                    0,
                    BindGroupEntry::Buffer {
                        buffer: camera_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (1, BindGroupEntry::Texture(shadow_atlas)),
                (2, BindGroupEntry::Texture(irradiance)),
                (3, BindGroupEntry::Texture(prefilter)),
                (4, BindGroupEntry::Sampler(env_sampler)),
                (5, BindGroupEntry::Sampler(shadow_sampler)),
            ],
        )?;
        if let Some(old) = self.frame_bind_group.replace(bind_group) {
            backend.destroy_bind_group(old);
        }
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
        let color = attachment_view(output, AttachmentKind::Hdr, 0)?;
        let depth = attachment_view(output, AttachmentKind::Depth, 0)?;

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(GEOMETRY_PASS.into()),
            color_attachments: vec![ColorAttachment {
                view: color,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
                store_op: StoreOp::Store,
            }],
            depth_attachment: Some(DepthAttachment {
                view: depth,
                load_op: LoadOp::Clear([0.0; 4]),
                store_op: StoreOp::Store,
                clear_value: 1.0,
            }),
        });
        if let (Some(pipeline), Some(frame)) = (self.pipeline, self.frame_bind_group) {
            backend.set_render_pipeline(pipeline);
            backend.set_bind_group(0, frame);
            let mut query = world.query_filtered::<&MeshRenderData, With<Renderable>>();
            for render in query.iter(world) {
                backend.set_bind_group(1, render.bind_group);
                backend.set_vertex_buffer(0, render.vertex_buffer, 0);
                backend.set_index_buffer(render.index_buffer, 0, IndexFormat::Uint32);
                backend.draw_indexed(0..render.index_count, 0, 0..1);
            }
        }
        backend.end_render_pass();
        Ok(())
    }

    fn update_uniforms(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        world: &mut World,
    ) -> BackendResult<()> {
        let Some(camera_buffer) = self.camera_buffer else {
            return Ok(());
        };
        let mut query = world.query::<&Camera>();
        if let Some(camera) = query.iter(world).next() {
            let data = camera.uniform_data();
            backend.write_buffer(camera_buffer, 0, bytemuck::bytes_of(&data));
        }
        Ok(())
    }
}
