//! Render graph
//!
//! Pass nodes declare the named targets they consume and produce; the graph
//! resolves those names at registration, topologically orders the work at
//! compile time, and re-drives the passes every frame.

mod graph;
mod pass;
mod target;

pub use graph::{RenderGraph, RenderGraphError};
pub use pass::{PassState, PassTargets, RenderPass, RenderResources};
pub use target::{AttachmentDesc, AttachmentKind, GBuffer, RenderTargetNode, TargetSize};
