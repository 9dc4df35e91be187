//! Diffuse irradiance convolution of the environment cubemap

use bevy_ecs::prelude::*;

use crate::pipeline::fullscreen::{record_cube_draw, FullscreenStatics};
use crate::pipeline::{attachment_view, ENVIRONMENT_TARGET, IRRADIANCE_PASS, IRRADIANCE_TARGET};
use crate::render_graph::{AttachmentKind, PassTargets, RenderPass};
use crate::rhi::*;

pub const IRRADIANCE_SHADER: &str = r#"
@group(0) @binding(0) var environment: texture_cube<f32>;
@group(0) @binding(1) var env_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    // Cosine-weighted hemisphere convolution per output texel.
    return textureSample(environment, env_sampler, vec3<f32>(frag.xy, 1.0));
}
"#;

/// Convolves the environment cubemap into a small diffuse irradiance map.
/// Re-records only when the environment pass re-records upstream.
#[derive(Default)]
pub struct IrradiancePass {
    inputs: Vec<String>,
    outputs: Vec<String>,
    statics: Option<FullscreenStatics>,
    bind_group: Option<BindGroupHandle>,
}

impl IrradiancePass {
    pub fn new() -> Self {
        Self {
            inputs: vec![ENVIRONMENT_TARGET.to_owned()],
            outputs: vec![IRRADIANCE_TARGET.to_owned()],
            ..Default::default()
        }
    }
}

impl RenderPass for IrradiancePass {
    fn name(&self) -> &str {
        IRRADIANCE_PASS
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
            IRRADIANCE_PASS,
            IRRADIANCE_SHADER,
            &[],
            TextureFormat::Rgba16Float,
            CullMode::None,
        )?);
        Ok(())
    }

    fn create_frame_buffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        targets: &PassTargets,
    ) -> BackendResult<()> {
        let Some(statics) = &self.statics else {
            return Err(BackendError::Recording(
                "irradiance pass used before initialize".into(),
            ));
        };
        let environment = attachment_view(targets.input(0), AttachmentKind::Hdr, 0)?;
        let bind_group = statics.bind(backend, environment, &[])?;
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
        let Some(statics) = &self.statics else {
            return Ok(());
        };
        let view = attachment_view(targets.output(0), AttachmentKind::Hdr, 0)?;
        record_cube_draw(
            backend,
            IRRADIANCE_PASS.into(),
            view,
            statics.pipeline,
            self.bind_group,
        );
        Ok(())
    }
}
