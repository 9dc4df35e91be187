//! Render pass trait and the shared execution driver

use bevy_ecs::world::World;

use crate::assets::{AssetCache, ModelAsset, TextureAsset};
use crate::render_graph::target::RenderTargetNode;
use crate::rhi::{BackendResult, CommandBufferHandle, GraphicsBackend};

/// Asset caches handed to passes while they execute.
pub struct RenderResources<'a> {
    pub models: &'a AssetCache<ModelAsset>,
    pub textures: &'a AssetCache<TextureAsset>,
}

/// The targets a pass was bound to at registration, in declaration order.
pub struct PassTargets<'a> {
    pub inputs: Vec<&'a RenderTargetNode>,
    pub outputs: Vec<&'a RenderTargetNode>,
}

impl<'a> PassTargets<'a> {
    pub fn input(&self, index: usize) -> &RenderTargetNode {
        self.inputs[index]
    }

    pub fn output(&self, index: usize) -> &RenderTargetNode {
        self.outputs[index]
    }
}

/// Per-pass bookkeeping owned by the graph.
///
/// `needs_record` starts set so every pass records on its first execution;
/// afterwards the driver only re-encodes when a pass reports a structural
/// change or a job marks it dirty.
pub struct PassState {
    pub(crate) needs_record: bool,
    pub(crate) commands: Option<CommandBufferHandle>,
    pub(crate) input_targets: Vec<usize>,
    pub(crate) output_targets: Vec<usize>,
}

impl PassState {
    pub(crate) fn new(input_targets: Vec<usize>, output_targets: Vec<usize>) -> Self {
        Self {
            needs_record: true,
            commands: None,
            input_targets,
            output_targets,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.needs_record = true;
    }

    pub fn needs_record(&self) -> bool {
        self.needs_record
    }
}

/// A schedulable unit of GPU work with declared input/output target
/// dependencies.
///
/// The concrete passes differ only in attachment formats, shaders and the
/// component sets they query; the control skeleton lives in [`drive_pass`]
/// and calls back into these hooks.
pub trait RenderPass: Send {
    /// Unique pass name.
    fn name(&self) -> &str;

    /// Names of targets this pass reads. Must be registered before the pass.
    fn inputs(&self) -> &[String];

    /// Names of targets this pass writes.
    fn outputs(&self) -> &[String];

    /// Build pipeline, shader and layout objects. Called once at registration.
    fn initialize(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()>;

    /// Bind output attachments. Called from `compile` once targets exist,
    /// and again after a resize.
    fn create_frame_buffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        targets: &PassTargets,
    ) -> BackendResult<()> {
        let _ = (backend, targets);
        Ok(())
    }

    /// Ensure per-entity GPU state exists. Returns `true` when the set of
    /// drawable entities changed structurally, forcing a re-record.
    fn prepare(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        world: &mut World,
        resources: &RenderResources,
    ) -> BackendResult<bool> {
        let _ = (backend, world, resources);
        Ok(false)
    }

    /// Encode the command sequence for this pass. The driver has already
    /// opened a command buffer on the backend.
    fn record(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        world: &mut World,
        targets: &PassTargets,
    ) -> BackendResult<()>;

    /// Upload camera/per-frame uniform data. Runs every frame, recorded or not.
    fn update_uniforms(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        world: &mut World,
    ) -> BackendResult<()> {
        let _ = (backend, world);
        Ok(())
    }
}

/// Shared execution skeleton for all pass variants:
/// ensure per-entity buffers, re-record when dirty, refresh uniforms, submit.
pub(crate) fn drive_pass(
    pass: &mut dyn RenderPass,
    state: &mut PassState,
    backend: &mut dyn GraphicsBackend,
    world: &mut World,
    targets: &PassTargets,
    resources: &RenderResources,
) -> BackendResult<()> {
    if pass.prepare(backend, world, resources)? {
        state.needs_record = true;
    }

    if state.needs_record {
        backend.begin_commands(Some(pass.name()))?;
        pass.record(backend, world, targets)?;
        let commands = backend.finish_commands()?;
        if let Some(old) = state.commands.replace(commands) {
            backend.destroy_command_buffer(old);
        }
        state.needs_record = false;
        log::debug!("pass '{}' re-recorded commands", pass.name());
    }

    pass.update_uniforms(backend, world)?;

    if let Some(commands) = state.commands {
        backend.submit(commands)?;
    }
    Ok(())
}
