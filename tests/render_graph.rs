//! Render graph ordering, invalidation and error paths

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bevy_ecs::world::World;

use scene_engine::assets::{AssetCache, MemorySource, ModelAsset, TextureAsset};
use scene_engine::pipeline::{
    self, build_editor_graph, CUBEMAP_PASS, GEOMETRY_PASS, HDR_IMAGE_PASS, IRRADIANCE_PASS,
    PREFILTER_PASS, SHADOW_PASS,
};
use scene_engine::render_graph::{
    AttachmentDesc, AttachmentKind, PassTargets, RenderGraph, RenderGraphError, RenderPass,
    RenderResources, RenderTargetNode, TargetSize,
};
use scene_engine::rhi::headless::HeadlessBackend;
use scene_engine::rhi::{BackendResult, GraphicsBackend, TextureFormat};
use scene_engine::EngineConfig;

struct CountingPass {
    name: &'static str,
    inputs: Vec<String>,
    outputs: Vec<String>,
    records: Arc<AtomicUsize>,
}

impl CountingPass {
    fn new(
        name: &'static str,
        inputs: &[&str],
        outputs: &[&str],
    ) -> (Box<Self>, Arc<AtomicUsize>) {
        let records = Arc::new(AtomicUsize::new(0));
        let pass = Box::new(Self {
            name,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            records: Arc::clone(&records),
        });
        (pass, records)
    }
}

impl RenderPass for CountingPass {
    fn name(&self) -> &str {
        self.name
    }

    fn inputs(&self) -> &[String] {
        &self.inputs
    }

    fn outputs(&self) -> &[String] {
        &self.outputs
    }

    fn initialize(&mut self, _backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        Ok(())
    }

    fn record(
        &mut self,
        _backend: &mut dyn GraphicsBackend,
        _world: &mut World,
        _targets: &PassTargets,
    ) -> BackendResult<()> {
        self.records.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn color_target(name: &str) -> RenderTargetNode {
    RenderTargetNode::new(
        name,
        TargetSize::Absolute {
            width: 4,
            height: 4,
        },
        vec![AttachmentDesc::new(
            AttachmentKind::Color,
            TextureFormat::Rgba8Unorm,
        )],
    )
}

fn backend() -> HeadlessBackend {
    let _ = env_logger::builder().is_test(true).try_init();
    HeadlessBackend::new()
}

fn caches() -> (AssetCache<ModelAsset>, AssetCache<TextureAsset>) {
    (
        AssetCache::new(Arc::new(MemorySource::new()), 8),
        AssetCache::new(Arc::new(MemorySource::new()), 8),
    )
}

#[test]
fn passes_run_in_dependency_order_regardless_of_registration() {
    let mut backend = backend();
    let mut graph = RenderGraph::new(4, 4);
    graph.register_target(color_target("t1")).unwrap();
    graph.register_target(color_target("t2")).unwrap();

    let (c, _) = CountingPass::new("c", &["t2"], &[]);
    let (b, _) = CountingPass::new("b", &["t1"], &["t2"]);
    let (a, _) = CountingPass::new("a", &[], &["t1"]);
    graph.register_pass(&mut backend, c).unwrap();
    graph.register_pass(&mut backend, b).unwrap();
    graph.register_pass(&mut backend, a).unwrap();
    graph.compile(&mut backend).unwrap();

    assert_eq!(graph.ordered_pass_names(), vec!["a", "b", "c"]);

    let (models, textures) = caches();
    let resources = RenderResources {
        models: &models,
        textures: &textures,
    };
    let mut world = World::new();
    graph.execute(&mut backend, &mut world, &resources).unwrap();
    assert_eq!(backend.submissions(), &["a", "b", "c"]);
}

#[test]
fn cyclic_dependency_is_rejected_at_compile() {
    let mut backend = backend();
    let mut graph = RenderGraph::new(4, 4);
    graph.register_target(color_target("t1")).unwrap();
    graph.register_target(color_target("t2")).unwrap();

    let (a, _) = CountingPass::new("a", &["t2"], &["t1"]);
    let (b, _) = CountingPass::new("b", &["t1"], &["t2"]);
    graph.register_pass(&mut backend, a).unwrap();
    graph.register_pass(&mut backend, b).unwrap();

    let err = graph.compile(&mut backend).unwrap_err();
    assert!(matches!(err, RenderGraphError::CyclicDependency(_)));
}

#[test]
fn unknown_target_reference_fails_registration() {
    let mut backend = backend();
    let mut graph = RenderGraph::new(4, 4);

    let (a, _) = CountingPass::new("a", &["missing"], &[]);
    let err = graph.register_pass(&mut backend, a).unwrap_err();
    assert!(matches!(
        err,
        RenderGraphError::MissingTarget { pass, target } if pass == "a" && target == "missing"
    ));
}

#[test]
fn duplicate_names_are_rejected() {
    let mut backend = backend();
    let mut graph = RenderGraph::new(4, 4);
    graph.register_target(color_target("t1")).unwrap();
    assert!(matches!(
        graph.register_target(color_target("t1")),
        Err(RenderGraphError::DuplicateTarget(_))
    ));

    let (a1, _) = CountingPass::new("a", &[], &["t1"]);
    let (a2, _) = CountingPass::new("a", &[], &["t1"]);
    graph.register_pass(&mut backend, a1).unwrap();
    assert!(matches!(
        graph.register_pass(&mut backend, a2),
        Err(RenderGraphError::DuplicatePass(_))
    ));
}

#[test]
fn execute_requires_compile() {
    let mut backend = backend();
    let mut graph = RenderGraph::new(4, 4);
    let (models, textures) = caches();
    let resources = RenderResources {
        models: &models,
        textures: &textures,
    };
    let mut world = World::new();
    assert!(matches!(
        graph.execute(&mut backend, &mut world, &resources),
        Err(RenderGraphError::NotCompiled)
    ));
}

#[test]
fn clean_passes_resubmit_without_re_recording() {
    let mut backend = backend();
    let mut graph = RenderGraph::new(4, 4);
    graph.register_target(color_target("t1")).unwrap();

    let (a, a_records) = CountingPass::new("a", &[], &["t1"]);
    let (b, b_records) = CountingPass::new("b", &["t1"], &[]);
    graph.register_pass(&mut backend, a).unwrap();
    graph.register_pass(&mut backend, b).unwrap();
    graph.compile(&mut backend).unwrap();

    let (models, textures) = caches();
    let resources = RenderResources {
        models: &models,
        textures: &textures,
    };
    let mut world = World::new();

    graph.execute(&mut backend, &mut world, &resources).unwrap();
    graph.execute(&mut backend, &mut world, &resources).unwrap();
    graph.execute(&mut backend, &mut world, &resources).unwrap();

    // Recorded once, submitted every frame.
    assert_eq!(a_records.load(Ordering::SeqCst), 1);
    assert_eq!(b_records.load(Ordering::SeqCst), 1);
    assert_eq!(backend.submissions(), &["a", "b", "a", "b", "a", "b"]);
}

#[test]
fn dirty_pass_re_records_alone() {
    let mut backend = backend();
    let mut graph = RenderGraph::new(4, 4);
    graph.register_target(color_target("t1")).unwrap();

    let (a, a_records) = CountingPass::new("a", &[], &["t1"]);
    let (b, b_records) = CountingPass::new("b", &["t1"], &[]);
    graph.register_pass(&mut backend, a).unwrap();
    graph.register_pass(&mut backend, b).unwrap();
    graph.compile(&mut backend).unwrap();

    let (models, textures) = caches();
    let resources = RenderResources {
        models: &models,
        textures: &textures,
    };
    let mut world = World::new();

    graph.execute(&mut backend, &mut world, &resources).unwrap();
    graph.mark_pass_dirty("b");
    graph.execute(&mut backend, &mut world, &resources).unwrap();

    assert_eq!(a_records.load(Ordering::SeqCst), 1);
    assert_eq!(b_records.load(Ordering::SeqCst), 2);
}

#[test]
fn resize_reallocates_targets_and_re_records() {
    let mut backend = backend();
    let mut graph = RenderGraph::new(4, 4);
    graph
        .register_target(RenderTargetNode::new(
            "t1",
            TargetSize::Relative { scale: 1.0 },
            vec![AttachmentDesc::new(
                AttachmentKind::Color,
                TextureFormat::Rgba8Unorm,
            )],
        ))
        .unwrap();
    let (a, a_records) = CountingPass::new("a", &[], &["t1"]);
    graph.register_pass(&mut backend, a).unwrap();
    graph.compile(&mut backend).unwrap();

    let (models, textures) = caches();
    let resources = RenderResources {
        models: &models,
        textures: &textures,
    };
    let mut world = World::new();
    graph.execute(&mut backend, &mut world, &resources).unwrap();

    graph.resize(&mut backend, 8, 8).unwrap();
    let gbuffer = graph.target("t1").unwrap().gbuffer().unwrap();
    assert_eq!((gbuffer.width, gbuffer.height), (8, 8));

    graph.execute(&mut backend, &mut world, &resources).unwrap();
    assert_eq!(a_records.load(Ordering::SeqCst), 2);
}

#[test]
fn output_targets_register_implicitly() {
    let mut backend = backend();
    let mut graph = RenderGraph::new(4, 4);
    graph.register_target(color_target("depth")).unwrap();
    graph.register_target(color_target("color")).unwrap();

    // "final" is never registered; p2 writing it brings it into existence.
    let (p1, p1_records) = CountingPass::new("p1", &[], &["depth", "color"]);
    let (p2, p2_records) = CountingPass::new("p2", &["color"], &["final"]);
    graph.register_pass(&mut backend, p1).unwrap();
    graph.register_pass(&mut backend, p2).unwrap();
    graph.compile(&mut backend).unwrap();

    assert_eq!(graph.ordered_pass_names(), vec!["p1", "p2"]);
    assert!(graph.target("final").unwrap().gbuffer().is_some());

    let (models, textures) = caches();
    let resources = RenderResources {
        models: &models,
        textures: &textures,
    };
    let mut world = World::new();
    graph.execute(&mut backend, &mut world, &resources).unwrap();

    assert_eq!(p1_records.load(Ordering::SeqCst), 1);
    assert_eq!(p2_records.load(Ordering::SeqCst), 1);
    assert_eq!(backend.submissions(), &["p1", "p2"]);
}

#[test]
fn editor_graph_orders_environment_chain_before_consumers() {
    let mut backend = backend();
    let graph = build_editor_graph(&mut backend, &EngineConfig::default()).unwrap();
    let order = graph.ordered_pass_names();
    let position = |name: &str| order.iter().position(|&n| n == name).unwrap();

    assert_eq!(order.len(), 6);
    assert!(position(HDR_IMAGE_PASS) < position(IRRADIANCE_PASS));
    assert!(position(HDR_IMAGE_PASS) < position(PREFILTER_PASS));
    assert!(position(HDR_IMAGE_PASS) < position(CUBEMAP_PASS));
    assert!(position(SHADOW_PASS) < position(GEOMETRY_PASS));
    assert!(position(IRRADIANCE_PASS) < position(GEOMETRY_PASS));
    assert!(position(PREFILTER_PASS) < position(GEOMETRY_PASS));
    assert!(position(GEOMETRY_PASS) < position(CUBEMAP_PASS));
    assert!(graph.target(pipeline::COMPOSED_TARGET).is_ok());
}
