//! Render target nodes and their GBuffer backing

use std::collections::HashMap;

use crate::rhi::{
    BackendResult, GraphicsBackend, TextureDescriptor, TextureFormat, TextureHandle, TextureUsage,
    TextureViewHandle,
};

/// Semantic channel of a GBuffer image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Color,
    Normal,
    Depth,
    Hdr,
    Material,
}

/// Describes texture dimensions that can be relative to the output size
#[derive(Debug, Clone, Copy)]
pub enum TargetSize {
    /// Absolute size in pixels
    Absolute { width: u32, height: u32 },
    /// Relative to the output size (1.0 = full size)
    Relative { scale: f32 },
}

impl Default for TargetSize {
    fn default() -> Self {
        TargetSize::Relative { scale: 1.0 }
    }
}

impl TargetSize {
    pub fn resolve(&self, output_width: u32, output_height: u32) -> (u32, u32) {
        match self {
            TargetSize::Absolute { width, height } => (*width, *height),
            TargetSize::Relative { scale } => (
                (((output_width as f32) * scale) as u32).max(1),
                (((output_height as f32) * scale) as u32).max(1),
            ),
        }
    }
}

/// One image slot in a GBuffer description
#[derive(Debug, Clone)]
pub struct AttachmentDesc {
    pub kind: AttachmentKind,
    pub format: TextureFormat,
    pub mip_levels: u32,
    /// Array layers; 6 for cube map targets.
    pub layers: u32,
}

impl AttachmentDesc {
    pub fn new(kind: AttachmentKind, format: TextureFormat) -> Self {
        Self {
            kind,
            format,
            mip_levels: 1,
            layers: 1,
        }
    }

    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn cube(mut self) -> Self {
        self.layers = 6;
        self
    }
}

/// Bundle of same-resolution GPU images keyed by semantic channel + mip level
pub struct GBuffer {
    pub width: u32,
    pub height: u32,
    textures: Vec<(AttachmentKind, TextureHandle)>,
    views: HashMap<(AttachmentKind, u32), TextureViewHandle>,
}

impl GBuffer {
    /// Allocate all images of `desc` through the backend.
    pub fn create(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        desc: &[AttachmentDesc],
        width: u32,
        height: u32,
    ) -> BackendResult<Self> {
        let mut textures = Vec::with_capacity(desc.len());
        let mut views = HashMap::new();

        for attachment in desc {
            let texture = backend.create_texture(&TextureDescriptor {
                label: Some(format!("{label}/{:?}", attachment.kind)),
                width,
                height,
                layers: attachment.layers,
                mip_levels: attachment.mip_levels,
                format: attachment.format,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            })?;
            for mip in 0..attachment.mip_levels {
                let view = backend.create_texture_view(texture, mip)?;
                views.insert((attachment.kind, mip), view);
            }
            textures.push((attachment.kind, texture));
        }

        Ok(Self {
            width,
            height,
            textures,
            views,
        })
    }

    pub fn view(&self, kind: AttachmentKind, mip: u32) -> Option<TextureViewHandle> {
        self.views.get(&(kind, mip)).copied()
    }

    pub fn texture(&self, kind: AttachmentKind) -> Option<TextureHandle> {
        self.textures
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, t)| *t)
    }

    pub fn release(self, backend: &mut dyn GraphicsBackend) {
        for (_, texture) in self.textures {
            backend.destroy_texture(texture);
        }
    }
}

/// A named, shared GBuffer-backed resource produced by one pass and consumed
/// by others.
pub struct RenderTargetNode {
    name: String,
    size: TargetSize,
    attachments: Vec<AttachmentDesc>,
    gbuffer: Option<GBuffer>,
}

impl RenderTargetNode {
    pub fn new(name: impl Into<String>, size: TargetSize, attachments: Vec<AttachmentDesc>) -> Self {
        Self {
            name: name.into(),
            size,
            attachments,
            gbuffer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The allocated backing store. `None` until the graph is compiled.
    pub fn gbuffer(&self) -> Option<&GBuffer> {
        self.gbuffer.as_ref()
    }

    pub fn view(&self, kind: AttachmentKind, mip: u32) -> Option<TextureViewHandle> {
        self.gbuffer.as_ref().and_then(|g| g.view(kind, mip))
    }

    pub(crate) fn allocate(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        output_width: u32,
        output_height: u32,
    ) -> BackendResult<()> {
        if self.gbuffer.is_some() {
            return Ok(());
        }
        let (width, height) = self.size.resolve(output_width, output_height);
        self.gbuffer = Some(GBuffer::create(
            backend,
            &self.name,
            &self.attachments,
            width,
            height,
        )?);
        Ok(())
    }

    pub(crate) fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(gbuffer) = self.gbuffer.take() {
            gbuffer.release(backend);
        }
    }
}
