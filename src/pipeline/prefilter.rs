//! Specular prefilter of the environment cubemap

use bevy_ecs::prelude::*;

use crate::pipeline::fullscreen::{record_cube_draw, FullscreenStatics};
use crate::pipeline::{
    attachment_view, ENVIRONMENT_TARGET, PREFILTER_MIP_COUNT, PREFILTER_PASS, PREFILTER_TARGET,
};
use crate::render_graph::{AttachmentKind, PassTargets, RenderPass};
use crate::rhi::*;

pub const PREFILTER_SHADER: &str = r#"
struct RoughnessUniform {
    roughness: vec4<f32>,
}

@group(0) @binding(0) var environment: texture_cube<f32>;
@group(0) @binding(1) var env_sampler: sampler;
@group(0) @binding(2) var<uniform> level: RoughnessUniform;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    // GGX importance-sampled prefilter; roughness fixed per mip level.
    return textureSample(environment, env_sampler, vec3<f32>(frag.xy, level.roughness.x));
}
"#;

/// Prefilters the environment cubemap into roughness-indexed mip levels for
/// specular image-based lighting. One render pass per mip; each mip has its
/// own roughness uniform so all cascades record into one command buffer.
#[derive(Default)]
pub struct PrefilterPass {
    inputs: Vec<String>,
    outputs: Vec<String>,
    statics: Option<FullscreenStatics>,
    mip_buffers: Vec<BufferHandle>,
    mip_bind_groups: Vec<BindGroupHandle>,
}

impl PrefilterPass {
    pub fn new() -> Self {
        Self {
            inputs: vec![ENVIRONMENT_TARGET.to_owned()],
            outputs: vec![PREFILTER_TARGET.to_owned()],
            ..Default::default()
        }
    }
}

impl RenderPass for PrefilterPass {
    fn name(&self) -> &str {
        PREFILTER_PASS
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
            PREFILTER_PASS,
            PREFILTER_SHADER,
            &[BindGroupLayoutEntry {
                binding: 2,
                ty: BindingType::UniformBuffer,
            }],
            TextureFormat::Rgba16Float,
            CullMode::None,
        )?);

        for mip in 0..PREFILTER_MIP_COUNT {
            let roughness = mip as f32 / (PREFILTER_MIP_COUNT - 1).max(1) as f32;
            let buffer = backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some(format!("prefilter/mip{mip}")),
                    size: 16,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                },
                bytemuck::bytes_of(&[roughness, 0.0, 0.0, 0.0]),
            )?;
            self.mip_buffers.push(buffer);
        }
        Ok(())
    }

    fn create_frame_buffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        targets: &PassTargets,
    ) -> BackendResult<()> {
        let Some(statics) = &self.statics else {
            return Err(BackendError::Recording(
                "prefilter pass used before initialize".into(),
            ));
        };
        let environment = attachment_view(targets.input(0), AttachmentKind::Hdr, 0)?;
        for old in self.mip_bind_groups.drain(..) {
            backend.destroy_bind_group(old);
        }
        for &buffer in &self.mip_buffers {
            let bind_group = statics.bind(
                backend,
                environment,
                &[(
                    2,
                    BindGroupEntry::Buffer {
                        buffer,
                        offset: 0,
                        size: None,
                    },
                )],
            )?;
            self.mip_bind_groups.push(bind_group);
        }
        Ok(())
    }

    fn record(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        _world: &mut World,
        targets: &PassTargets,
    ) -> BackendResult<()> {
        let Some(statics) = &self.statics else {
            return Ok(());
        };
        let output = targets.output(0);
        for (mip, &bind_group) in self.mip_bind_groups.iter().enumerate() {
            let view = attachment_view(output, AttachmentKind::Hdr, mip as u32)?;
            record_cube_draw(
                backend,
                format!("{PREFILTER_PASS}/mip{mip}"),
                view,
                statics.pipeline,
                Some(bind_group),
            );
        }
        Ok(())
    }
}
