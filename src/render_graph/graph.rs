//! Render graph definition, compilation and execution

use std::collections::HashMap;

use bevy_ecs::world::World;
use thiserror::Error;

use crate::render_graph::pass::{drive_pass, PassState, PassTargets, RenderPass, RenderResources};
use crate::render_graph::target::{AttachmentDesc, AttachmentKind, RenderTargetNode, TargetSize};
use crate::rhi::{BackendError, GraphicsBackend, TextureFormat};

/// Errors surfaced while building or running the graph
#[derive(Error, Debug)]
pub enum RenderGraphError {
    #[error("render target '{0}' is already registered")]
    DuplicateTarget(String),
    #[error("render pass '{0}' is already registered")]
    DuplicatePass(String),
    #[error("pass '{pass}' declares target '{target}' which is not registered")]
    MissingTarget { pass: String, target: String },
    #[error("render target '{0}' not found")]
    UnknownTarget(String),
    #[error("cyclic render-graph dependency involving pass '{0}'")]
    CyclicDependency(String),
    #[error("render graph must be compiled before execution")]
    NotCompiled,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// The main render graph structure.
///
/// Owns pass nodes and target nodes, builds a bipartite dependency graph over
/// both, and drives the passes in topological order every frame. Passes are
/// deliberately not ordered by insertion: targets are shared across passes
/// with data dependencies that cross insertion order (an environment cube map
/// feeding both irradiance and prefilter passes, which in turn feed shading).
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    states: Vec<PassState>,
    pass_lookup: HashMap<String, usize>,
    targets: Vec<RenderTargetNode>,
    target_lookup: HashMap<String, usize>,
    render_order: Vec<usize>,
    compiled: bool,
    output_width: u32,
    output_height: u32,
}

impl RenderGraph {
    pub fn new(output_width: u32, output_height: u32) -> Self {
        Self {
            passes: Vec::new(),
            states: Vec::new(),
            pass_lookup: HashMap::new(),
            targets: Vec::new(),
            target_lookup: HashMap::new(),
            render_order: Vec::new(),
            compiled: false,
            output_width,
            output_height,
        }
    }

    /// Insert a new named target node. The name must be unique in the graph.
    pub fn register_target(&mut self, target: RenderTargetNode) -> Result<(), RenderGraphError> {
        if self.target_lookup.contains_key(target.name()) {
            return Err(RenderGraphError::DuplicateTarget(target.name().to_owned()));
        }
        self.target_lookup
            .insert(target.name().to_owned(), self.targets.len());
        self.targets.push(target);
        self.compiled = false;
        Ok(())
    }

    /// Register a pass, resolving its declared input/output target names.
    /// Inputs must name already-registered targets and fail with
    /// `MissingTarget` otherwise. Outputs may name a target nobody
    /// registered; such a target is created on the spot with a full-size
    /// color backing, so producers never have to pre-declare what they
    /// write. The pass is initialized (pipeline, shader, layouts) through
    /// the backend before being stored.
    pub fn register_pass(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        mut pass: Box<dyn RenderPass>,
    ) -> Result<(), RenderGraphError> {
        let name = pass.name().to_owned();
        if self.pass_lookup.contains_key(&name) {
            return Err(RenderGraphError::DuplicatePass(name));
        }

        let input_targets: Vec<usize> = pass
            .inputs()
            .iter()
            .map(|target| {
                self.target_lookup.get(target).copied().ok_or_else(|| {
                    RenderGraphError::MissingTarget {
                        pass: name.clone(),
                        target: target.clone(),
                    }
                })
            })
            .collect::<Result<_, _>>()?;

        pass.initialize(backend)?;

        let output_targets: Vec<usize> = pass
            .outputs()
            .iter()
            .map(|target| match self.target_lookup.get(target).copied() {
                Some(idx) => idx,
                None => {
                    let idx = self.targets.len();
                    self.target_lookup.insert(target.clone(), idx);
                    self.targets.push(RenderTargetNode::new(
                        target.clone(),
                        TargetSize::default(),
                        vec![AttachmentDesc::new(
                            AttachmentKind::Color,
                            TextureFormat::Rgba8Unorm,
                        )],
                    ));
                    idx
                }
            })
            .collect();

        self.pass_lookup.insert(name, self.passes.len());
        self.states
            .push(PassState::new(input_targets, output_targets));
        self.passes.push(pass);
        self.compiled = false;
        Ok(())
    }

    /// Compile the graph: allocate target backing stores, compute the pass
    /// execution order, and let every pass bind its frame buffer.
    ///
    /// The dependency graph has one node per pass and one per target, with
    /// edges `pass -> output target` and `input target -> pass`. A Kahn-style
    /// topological sort repeatedly takes every node that currently has zero
    /// in-degree; a round that takes nothing while nodes remain means the
    /// registrations form a cycle, which is reported instead of looping.
    pub fn compile(&mut self, backend: &mut dyn GraphicsBackend) -> Result<(), RenderGraphError> {
        for target in &mut self.targets {
            target.allocate(backend, self.output_width, self.output_height)?;
        }

        self.render_order = self.sort_passes()?;

        let Self {
            passes,
            states,
            targets,
            ..
        } = self;
        for (pass, state) in passes.iter_mut().zip(states.iter()) {
            let bound = bind_targets(targets, state);
            pass.create_frame_buffer(backend, &bound)?;
        }

        self.compiled = true;
        log::info!(
            "render graph compiled: {} passes, {} targets, order {:?}",
            self.passes.len(),
            self.targets.len(),
            self.ordered_pass_names()
        );
        Ok(())
    }

    fn sort_passes(&self) -> Result<Vec<usize>, RenderGraphError> {
        // Node ids: passes are 0..p, target j is p + j.
        let pass_count = self.passes.len();
        let node_count = pass_count + self.targets.len();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); node_count];
        let mut in_degree = vec![0usize; node_count];

        for (pass_idx, state) in self.states.iter().enumerate() {
            for &target_idx in &state.output_targets {
                successors[pass_idx].push(pass_count + target_idx);
                in_degree[pass_count + target_idx] += 1;
            }
            for &target_idx in &state.input_targets {
                successors[pass_count + target_idx].push(pass_idx);
                in_degree[pass_idx] += 1;
            }
        }

        let mut visited = vec![false; node_count];
        let mut order = Vec::with_capacity(node_count);
        while order.len() < node_count {
            let ready: Vec<usize> = (0..node_count)
                .filter(|&node| !visited[node] && in_degree[node] == 0)
                .collect();
            if ready.is_empty() {
                // No zero-in-degree node left but some remain unvisited:
                // the registrations form a cycle.
                let stuck = (0..pass_count)
                    .find(|&node| !visited[node])
                    .map(|node| self.passes[node].name().to_owned())
                    .unwrap_or_default();
                return Err(RenderGraphError::CyclicDependency(stuck));
            }
            for node in ready {
                visited[node] = true;
                order.push(node);
                for &succ in &successors[node] {
                    in_degree[succ] -= 1;
                }
            }
        }

        // Drop the target nodes; only passes are executed.
        Ok(order.into_iter().filter(|&node| node < pass_count).collect())
    }

    /// Execute every pass in the compiled order. A failing pass aborts the
    /// remainder of the frame.
    pub fn execute(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        world: &mut World,
        resources: &RenderResources,
    ) -> Result<(), RenderGraphError> {
        if !self.compiled {
            return Err(RenderGraphError::NotCompiled);
        }
        let Self {
            passes,
            states,
            targets,
            render_order,
            ..
        } = self;
        for &pass_idx in render_order.iter() {
            let bound = bind_targets(targets, &states[pass_idx]);
            drive_pass(
                passes[pass_idx].as_mut(),
                &mut states[pass_idx],
                backend,
                world,
                &bound,
                resources,
            )?;
        }
        Ok(())
    }

    /// O(1) lookup of a target by name. Used by the editor's render-image
    /// widget to fetch the final color target.
    pub fn target(&self, name: &str) -> Result<&RenderTargetNode, RenderGraphError> {
        self.target_lookup
            .get(name)
            .map(|&idx| &self.targets[idx])
            .ok_or_else(|| RenderGraphError::UnknownTarget(name.to_owned()))
    }

    /// Force a pass to re-record its commands on the next execution.
    pub fn mark_pass_dirty(&mut self, name: &str) {
        if let Some(&idx) = self.pass_lookup.get(name) {
            self.states[idx].mark_dirty();
        }
    }

    pub fn mark_all_dirty(&mut self) {
        for state in &mut self.states {
            state.mark_dirty();
        }
    }

    /// Recreate every target at the new output dimensions and invalidate all
    /// recorded commands.
    pub fn resize(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
    ) -> Result<(), RenderGraphError> {
        if (width, height) == (self.output_width, self.output_height) {
            return Ok(());
        }
        self.output_width = width;
        self.output_height = height;
        for target in &mut self.targets {
            target.release(backend);
            target.allocate(backend, width, height)?;
        }
        let Self {
            passes,
            states,
            targets,
            ..
        } = self;
        for (pass, state) in passes.iter_mut().zip(states.iter()) {
            let bound = bind_targets(targets, state);
            pass.create_frame_buffer(backend, &bound)?;
        }
        self.mark_all_dirty();
        Ok(())
    }

    /// Pass names in execution order. Empty before `compile`.
    pub fn ordered_pass_names(&self) -> Vec<&str> {
        self.render_order
            .iter()
            .map(|&idx| self.passes[idx].name())
            .collect()
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Release every pass command buffer and target backing store.
    pub fn shutdown(&mut self, backend: &mut dyn GraphicsBackend) {
        for state in &mut self.states {
            if let Some(commands) = state.commands.take() {
                backend.destroy_command_buffer(commands);
            }
        }
        for target in &mut self.targets {
            target.release(backend);
        }
        self.compiled = false;
    }
}

fn bind_targets<'a>(targets: &'a [RenderTargetNode], state: &PassState) -> PassTargets<'a> {
    PassTargets {
        inputs: state.input_targets.iter().map(|&i| &targets[i]).collect(),
        outputs: state.output_targets.iter().map(|&i| &targets[i]).collect(),
    }
}
