//! Concrete render passes and the editor frame graph
//!
//! Pass names and target names are shared constants so the update jobs can
//! mark passes dirty without holding pass references.

mod cubemap;
mod fullscreen;
mod geometry;
mod hdr_image;
mod irradiance;
mod prefilter;
mod shadow;

pub use cubemap::CubeMapPass;
pub use geometry::GeometryPass;
pub use hdr_image::HdrImagePass;
pub use irradiance::IrradiancePass;
pub use prefilter::PrefilterPass;
pub use shadow::ShadowPass;

use crate::render_graph::{
    AttachmentDesc, AttachmentKind, RenderGraph, RenderGraphError, RenderTargetNode, TargetSize,
};
use crate::rhi::{GraphicsBackend, TextureFormat};
use crate::EngineConfig;

pub const GEOMETRY_PASS: &str = "geometry";
pub const SHADOW_PASS: &str = "shadow";
pub const CUBEMAP_PASS: &str = "cubemap";
pub const HDR_IMAGE_PASS: &str = "hdr_image";
pub const IRRADIANCE_PASS: &str = "irradiance";
pub const PREFILTER_PASS: &str = "prefilter";

pub const SHADOW_ATLAS_TARGET: &str = "shadow_atlas";
pub const ENVIRONMENT_TARGET: &str = "environment";
pub const IRRADIANCE_TARGET: &str = "irradiance";
pub const PREFILTER_TARGET: &str = "prefilter";
pub const SCENE_COLOR_TARGET: &str = "scene_color";
pub const COMPOSED_TARGET: &str = "composed";

pub const PREFILTER_MIP_COUNT: u32 = 5;

/// Build and compile the standard editor frame graph.
///
/// The environment cubemap fans out to the irradiance convolution, the
/// specular prefilter and the background pass; the geometry pass consumes
/// the shadow atlas and both IBL targets; the background pass composes the
/// lit scene over the sky into the final output.
pub fn build_editor_graph(
    backend: &mut dyn GraphicsBackend,
    config: &EngineConfig,
) -> Result<RenderGraph, RenderGraphError> {
    let mut graph = RenderGraph::new(config.width, config.height);

    graph.register_target(RenderTargetNode::new(
        SHADOW_ATLAS_TARGET,
        TargetSize::Absolute {
            width: config.shadow_atlas_size,
            height: config.shadow_atlas_size,
        },
        vec![AttachmentDesc::new(
            AttachmentKind::Depth,
            TextureFormat::Depth32Float,
        )],
    ))?;
    graph.register_target(RenderTargetNode::new(
        ENVIRONMENT_TARGET,
        TargetSize::Absolute {
            width: 512,
            height: 512,
        },
        vec![AttachmentDesc::new(AttachmentKind::Hdr, TextureFormat::Rgba16Float).cube()],
    ))?;
    graph.register_target(RenderTargetNode::new(
        IRRADIANCE_TARGET,
        TargetSize::Absolute {
            width: 32,
            height: 32,
        },
        vec![AttachmentDesc::new(AttachmentKind::Hdr, TextureFormat::Rgba16Float).cube()],
    ))?;
    graph.register_target(RenderTargetNode::new(
        PREFILTER_TARGET,
        TargetSize::Absolute {
            width: 128,
            height: 128,
        },
        vec![AttachmentDesc::new(AttachmentKind::Hdr, TextureFormat::Rgba16Float)
            .cube()
            .with_mips(PREFILTER_MIP_COUNT)],
    ))?;
    graph.register_target(RenderTargetNode::new(
        SCENE_COLOR_TARGET,
        TargetSize::default(),
        vec![
            AttachmentDesc::new(AttachmentKind::Hdr, TextureFormat::Rgba16Float),
            AttachmentDesc::new(AttachmentKind::Depth, TextureFormat::Depth32Float),
        ],
    ))?;
    graph.register_target(RenderTargetNode::new(
        COMPOSED_TARGET,
        TargetSize::default(),
        vec![AttachmentDesc::new(
            AttachmentKind::Color,
            TextureFormat::Rgba8UnormSrgb,
        )],
    ))?;

    // Registration order is irrelevant; compile sorts by dependency.
    graph.register_pass(backend, Box::new(GeometryPass::new()))?;
    graph.register_pass(
        backend,
        Box::new(HdrImagePass::new(config.environment_hdr.clone())),
    )?;
    graph.register_pass(backend, Box::new(CubeMapPass::new()))?;
    graph.register_pass(backend, Box::new(ShadowPass::new()))?;
    graph.register_pass(backend, Box::new(PrefilterPass::new()))?;
    graph.register_pass(backend, Box::new(IrradiancePass::new()))?;
    graph.compile(backend)?;
    Ok(graph)
}

pub(crate) fn attachment_view(
    target: &RenderTargetNode,
    kind: AttachmentKind,
    mip: u32,
) -> crate::rhi::BackendResult<crate::rhi::TextureViewHandle> {
    target.view(kind, mip).ok_or_else(|| {
        crate::rhi::BackendError::InvalidHandle(format!(
            "target '{}' has no {kind:?} attachment at mip {mip}",
            target.name()
        ))
    })
}
