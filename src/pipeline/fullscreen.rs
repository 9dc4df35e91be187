//! Shared plumbing for the image-space environment passes
//!
//! The hdr_image, irradiance and prefilter passes all draw a unit cube
//! through a pipeline whose bind group starts with one texture and one
//! filtering sampler. Only the shader, any extra bindings and the bound
//! views differ per pass.

use crate::rhi::{
    BackendResult, BindGroupEntry, BindGroupHandle, BindGroupLayoutEntry, BindGroupLayoutHandle,
    BindingType, ColorAttachment, ColorTargetState, CullMode, FrontFace, GraphicsBackend, LoadOp,
    PrimitiveTopology, RenderPassDescriptor, RenderPipelineDescriptor, RenderPipelineHandle,
    SamplerDescriptor, SamplerHandle, StoreOp, TextureFormat, TextureViewHandle, Vertex,
};

/// Pipeline, layout and sampler of one image-space pass, created once in
/// `initialize`.
pub(crate) struct FullscreenStatics {
    pub pipeline: RenderPipelineHandle,
    pub layout: BindGroupLayoutHandle,
    pub sampler: SamplerHandle,
}

impl FullscreenStatics {
    /// Bindings 0 and 1 are the texture and the sampler; `extra_bindings`
    /// follow.
    pub fn create(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        shader_source: &str,
        extra_bindings: &[BindGroupLayoutEntry],
        format: TextureFormat,
        cull_mode: CullMode,
    ) -> BackendResult<Self> {
        let mut entries = vec![
            BindGroupLayoutEntry {
                binding: 0,
                ty: BindingType::Texture,
            },
            BindGroupLayoutEntry {
                binding: 1,
                ty: BindingType::Sampler { comparison: false },
            },
        ];
        entries.extend_from_slice(extra_bindings);
        let layout = backend.create_bind_group_layout(&entries)?;
        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(label.into()),
            shader_source: shader_source.into(),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode,
            depth_stencil: None,
            color_targets: vec![ColorTargetState {
                format,
                blend: false,
            }],
        })?;
        let sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some(label.into()),
            ..Default::default()
        })?;
        Ok(Self {
            pipeline,
            layout,
            sampler,
        })
    }

    /// Bind group over `texture` and the shared sampler plus `extra`
    /// entries, matching the layout built in [`FullscreenStatics::create`].
    pub fn bind(
        &self,
        backend: &mut dyn GraphicsBackend,
        texture: TextureViewHandle,
        extra: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let mut entries = vec![
            (0, BindGroupEntry::Texture(texture)),
            (1, BindGroupEntry::Sampler(self.sampler)),
        ];
        entries.extend_from_slice(extra);
        backend.create_bind_group(self.layout, &entries)
    }
}

/// Clear `view` and draw the unit cube (6 faces x 2 triangles). Skips the
/// draw while the pass has nothing bound yet, leaving the cleared target.
pub(crate) fn record_cube_draw(
    backend: &mut dyn GraphicsBackend,
    label: String,
    view: TextureViewHandle,
    pipeline: RenderPipelineHandle,
    bind_group: Option<BindGroupHandle>,
) {
    backend.begin_render_pass(&RenderPassDescriptor {
        label: Some(label),
        color_attachments: vec![ColorAttachment {
            view,
            load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
            store_op: StoreOp::Store,
        }],
        depth_attachment: None,
    });
    if let Some(bind_group) = bind_group {
        backend.set_render_pipeline(pipeline);
        backend.set_bind_group(0, bind_group);
        backend.draw(0..36, 0..1);
    }
    backend.end_render_pass();
}
