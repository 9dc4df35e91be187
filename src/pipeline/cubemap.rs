//! Sky background and final composition

use bevy_ecs::prelude::*;

use crate::pipeline::fullscreen::FullscreenStatics;
use crate::pipeline::{
    attachment_view, COMPOSED_TARGET, CUBEMAP_PASS, ENVIRONMENT_TARGET, SCENE_COLOR_TARGET,
};
use crate::render_graph::{AttachmentKind, PassTargets, RenderPass};
use crate::rhi::*;
use crate::scene::{Camera, CameraUniformData};

pub const CUBEMAP_SHADER: &str = r#"
struct CameraUniform {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
}

@group(0) @binding(0) var environment: texture_cube<f32>;
@group(0) @binding(1) var env_sampler: sampler;
@group(0) @binding(2) var<uniform> camera: CameraUniform;
@group(0) @binding(3) var scene_color: texture_2d<f32>;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return camera.view_proj * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let sky = textureSample(environment, env_sampler, vec3<f32>(frag.xy, 1.0));
    let lit = textureSample(scene_color, env_sampler, frag.xy);
    return mix(sky, lit, lit.a);
}
"#;

/// Draws the environment cubemap as the background and composes the lit HDR
/// scene color over it into the final LDR output.
#[derive(Default)]
pub struct CubeMapPass {
    inputs: Vec<String>,
    outputs: Vec<String>,
    statics: Option<FullscreenStatics>,
    camera_buffer: Option<BufferHandle>,
    bind_group: Option<BindGroupHandle>,
}

impl CubeMapPass {
    pub fn new() -> Self {
        Self {
            inputs: vec![ENVIRONMENT_TARGET.to_owned(), SCENE_COLOR_TARGET.to_owned()],
            outputs: vec![COMPOSED_TARGET.to_owned()],
            ..Default::default()
        }
    }
}

impl RenderPass for CubeMapPass {
    fn name(&self) -> &str {
        CUBEMAP_PASS
    }

    fn inputs(&self) -> &[String] {
        &self.inputs
    }

    fn outputs(&self) -> &[String] {
        &self.outputs
    }

    fn initialize(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        self.statics = Some(FullscreenStatics::create(
            backend,
            CUBEMAP_PASS,
            CUBEMAP_SHADER,
            &[
                BindGroupLayoutEntry {
                    binding: 2,
                    ty: BindingType::UniformBuffer,
                },
                BindGroupLayoutEntry {
                    binding: 3,
                    ty: BindingType::Texture,
                },
            ],
            TextureFormat::Rgba8UnormSrgb,
            // The camera sits inside the sky cube.
            CullMode::Front,
        )?);
        self.camera_buffer = Some(backend.create_buffer(&BufferDescriptor {
            label: Some("cubemap/camera".into()),
            size: std::mem::size_of::<CameraUniformData>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?);
        Ok(())
    }

    fn create_frame_buffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        targets: &PassTargets,
    ) -> BackendResult<()> {
        let (Some(statics), Some(camera_buffer)) = (&self.statics, self.camera_buffer) else {
            return Err(BackendError::Recording(
                "cubemap pass used before initialize".into(),
            ));
        };
        let environment = attachment_view(targets.input(0), AttachmentKind::Hdr, 0)?;
        let scene_color = attachment_view(targets.input(1), AttachmentKind::Hdr, 0)?;
        let bind_group = statics.bind(
            backend,
            environment,
            &[
                (
                    2,
                    BindGroupEntry::Buffer {
                        buffer: camera_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (3, BindGroupEntry::Texture(scene_color)),
            ],
        )?;
        if let Some(old) = self.bind_group.replace(bind_group) {
            backend.destroy_bind_group(old);
        }
        Ok(())
    }

    fn record(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        _world: &mut World,
        targets: &PassTargets,
    ) -> BackendResult<()> {
        let view = attachment_view(targets.output(0), AttachmentKind::Color, 0)?;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(CUBEMAP_PASS.into()),
            color_attachments: vec![ColorAttachment {
                view,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_attachment: None,
        });
        if let (Some(statics), Some(bind_group)) = (&self.statics, self.bind_group) {
            backend.set_render_pipeline(statics.pipeline);
            backend.set_bind_group(0, bind_group);
            // Sky cube, then the fullscreen composition triangle.
            backend.draw(0..36, 0..1);
            backend.draw(36..39, 0..1);
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
