//! Equirectangular HDR image to environment cubemap

use bevy_ecs::prelude::*;

use crate::pipeline::fullscreen::{record_cube_draw, FullscreenStatics};
use crate::pipeline::{attachment_view, ENVIRONMENT_TARGET, HDR_IMAGE_PASS};
use crate::render_graph::{AttachmentKind, PassTargets, RenderPass, RenderResources};
use crate::rhi::*;

pub const HDR_IMAGE_SHADER: &str = r#"
@group(0) @binding(0) var equirect: texture_2d<f32>;
@group(0) @binding(1) var equirect_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    return textureSample(equirect, equirect_sampler, frag.xy);
}
"#;

/// Projects an equirectangular HDR source image onto the environment
/// cubemap. The source asset loads in the background; until it arrives the
/// pass clears the cubemap and re-records once the upload happens.
#[derive(Default)]
pub struct HdrImagePass {
    source: Option<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    statics: Option<FullscreenStatics>,
    source_texture: Option<TextureHandle>,
    bind_group: Option<BindGroupHandle>,
}

impl HdrImagePass {
    pub fn new(source: Option<String>) -> Self {
        Self {
            source,
            outputs: vec![ENVIRONMENT_TARGET.to_owned()],
            ..Default::default()
        }
    }
}

impl RenderPass for HdrImagePass {
    fn name(&self) -> &str {
        HDR_IMAGE_PASS
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
            HDR_IMAGE_PASS,
            HDR_IMAGE_SHADER,
            &[],
            TextureFormat::Rgba16Float,
            CullMode::None,
        )?);
        Ok(())
    }

    fn prepare(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        _world: &mut World,
        resources: &RenderResources,
    ) -> BackendResult<bool> {
        if self.bind_group.is_some() {
            return Ok(false);
        }
        let (Some(source), Some(statics)) = (self.source.as_deref(), self.statics.as_ref()) else {
            return Ok(false);
        };
        let Some(asset) = resources.textures.get(source) else {
            if let Err(err) = resources.textures.get_async(source) {
                log::warn!("environment image '{source}' unavailable: {err}");
            }
            return Ok(false);
        };

        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(source.to_owned()),
            width: asset.width,
            height: asset.height,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?;
        backend.write_texture(texture, &asset.pixels, asset.width, asset.height);
        let view = backend.create_texture_view(texture, 0)?;
        self.bind_group = Some(statics.bind(backend, view, &[])?);
        self.source_texture = Some(texture);
        // The cubemap content changes, so the commands must be re-encoded.
        Ok(true)
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
            HDR_IMAGE_PASS.into(),
            view,
            statics.pipeline,
            self.bind_group,
        );
        Ok(())
    }
}
