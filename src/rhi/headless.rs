//! Headless backend
//!
//! Allocates handles and records command submission without touching a GPU.
//! Used by the integration tests and by editor tooling that needs the frame
//! orchestration to run on machines without a graphics device.

use std::collections::HashMap;
use std::ops::Range;

use crate::rhi::*;

#[derive(Debug, Default)]
struct RecordedCommands {
    label: Option<String>,
    render_passes: u32,
    draw_calls: u32,
}

/// A [`GraphicsBackend`] that only tracks what was asked of it.
#[derive(Default)]
pub struct HeadlessBackend {
    next_handle: u64,
    buffers: HashMap<BufferHandle, BufferDescriptor>,
    textures: HashMap<TextureHandle, TextureDescriptor>,
    command_buffers: HashMap<CommandBufferHandle, RecordedCommands>,
    recording: Option<RecordedCommands>,
    /// Labels of submitted command buffers, in submission order.
    submissions: Vec<String>,
    buffer_writes: u64,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Labels of every submitted command buffer, in submission order.
    pub fn submissions(&self) -> &[String] {
        &self.submissions
    }

    pub fn clear_submissions(&mut self) {
        self.submissions.clear();
    }

    /// Number of draw calls recorded into the given command buffer.
    pub fn draw_calls(&self, commands: CommandBufferHandle) -> u32 {
        self.command_buffers
            .get(&commands)
            .map(|c| c.draw_calls)
            .unwrap_or(0)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn buffer_write_count(&self) -> u64 {
        self.buffer_writes
    }

    fn current(&mut self) -> &mut RecordedCommands {
        self.recording
            .get_or_insert_with(RecordedCommands::default)
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let handle = BufferHandle(self.alloc());
        self.buffers.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        if desc.size < data.len() as u64 {
            return Err(BackendError::BufferCreationFailed(format!(
                "init data ({} bytes) exceeds buffer size ({})",
                data.len(),
                desc.size
            )));
        }
        self.create_buffer(desc)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, _offset: u64, _data: &[u8]) {
        debug_assert!(self.buffers.contains_key(&buffer));
        self.buffer_writes += 1;
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let handle = TextureHandle(self.alloc());
        self.textures.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        mip_level: u32,
    ) -> BackendResult<TextureViewHandle> {
        let desc = self
            .textures
            .get(&texture)
            .ok_or_else(|| BackendError::InvalidHandle(format!("texture {texture:?}")))?;
        if mip_level >= desc.mip_levels {
            return Err(BackendError::InvalidHandle(format!(
                "mip {mip_level} out of range for texture with {} levels",
                desc.mip_levels
            )));
        }
        Ok(TextureViewHandle(self.alloc()))
    }

    fn write_texture(&mut self, texture: TextureHandle, _data: &[u8], _width: u32, _height: u32) {
        debug_assert!(self.textures.contains_key(&texture));
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        Ok(SamplerHandle(self.alloc()))
    }

    fn create_bind_group_layout(
        &mut self,
        _entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        Ok(BindGroupLayoutHandle(self.alloc()))
    }

    fn create_bind_group(
        &mut self,
        _layout: BindGroupLayoutHandle,
        _entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        Ok(BindGroupHandle(self.alloc()))
    }

    fn create_render_pipeline(
        &mut self,
        _desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        Ok(RenderPipelineHandle(self.alloc()))
    }

    fn begin_commands(&mut self, label: Option<&str>) -> BackendResult<()> {
        if self.recording.is_some() {
            return Err(BackendError::Recording(
                "begin_commands while already recording".into(),
            ));
        }
        self.recording = Some(RecordedCommands {
            label: label.map(str::to_owned),
            ..Default::default()
        });
        Ok(())
    }

    fn begin_render_pass(&mut self, _desc: &RenderPassDescriptor) {
        self.current().render_passes += 1;
    }

    fn end_render_pass(&mut self) {}

    fn set_render_pipeline(&mut self, _pipeline: RenderPipelineHandle) {}

    fn set_bind_group(&mut self, _index: u32, _bind_group: BindGroupHandle) {}

    fn set_vertex_buffer(&mut self, _slot: u32, _buffer: BufferHandle, _offset: u64) {}

    fn set_index_buffer(&mut self, _buffer: BufferHandle, _offset: u64, _format: IndexFormat) {}

    fn set_viewport(&mut self, _x: f32, _y: f32, _width: f32, _height: f32) {}

    fn draw(&mut self, _vertices: Range<u32>, _instances: Range<u32>) {
        self.current().draw_calls += 1;
    }

    fn draw_indexed(&mut self, _indices: Range<u32>, _base_vertex: i32, _instances: Range<u32>) {
        self.current().draw_calls += 1;
    }

    fn finish_commands(&mut self) -> BackendResult<CommandBufferHandle> {
        let recorded = self
            .recording
            .take()
            .ok_or_else(|| BackendError::Recording("finish_commands without begin".into()))?;
        let handle = CommandBufferHandle(self.alloc());
        self.command_buffers.insert(handle, recorded);
        Ok(handle)
    }

    fn submit(&mut self, commands: CommandBufferHandle) -> BackendResult<()> {
        let recorded = self
            .command_buffers
            .get(&commands)
            .ok_or_else(|| BackendError::InvalidHandle(format!("command buffer {commands:?}")))?;
        self.submissions
            .push(recorded.label.clone().unwrap_or_else(|| "unnamed".into()));
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn destroy_bind_group(&mut self, _bind_group: BindGroupHandle) {}

    fn destroy_command_buffer(&mut self, commands: CommandBufferHandle) {
        self.command_buffers.remove(&commands);
    }
}
