//! Update job behavior over the ECS world

use std::sync::Arc;

use bevy_ecs::prelude::*;
use glam::{Mat4, Vec3, Vec4};

use scene_engine::assets::{AssetCache, AssetError, MemorySource, ModelAsset, TextureAsset};
use scene_engine::jobs::{
    AabbJob, CameraState, FrameContext, JobPipeline, RenderLightDataJob, RenderMeshDataJob,
    RenderViewClipJob, RenderVxgiJob, TransformJob, UpdateJob,
};
use scene_engine::render_graph::RenderGraph;
use scene_engine::rhi::headless::HeadlessBackend;
use scene_engine::scene::{
    set_parent, spawn_camera, spawn_direction_light, spawn_mesh, spawn_vxgi_probe, Aabb, Camera,
    DirectionLight, DirectionShadow, GlobalTransform, LightRenderData, Material, MeshRenderData,
    MeshSource, Renderable, Transform, VxgiRenderData,
};
use scene_engine::{Engine, EngineConfig};

const CUBE_OBJ: &str = "\
v -1.0 -1.0 -1.0
v 1.0 -1.0 -1.0
v 1.0 1.0 -1.0
v -1.0 1.0 -1.0
v -1.0 -1.0 1.0
v 1.0 -1.0 1.0
v 1.0 1.0 1.0
v -1.0 1.0 1.0
f 1 2 3 4
f 5 6 7 8
f 1 5 8 4
f 2 6 7 3
";

const MODEL_PATH: &str = "mem://cube.obj";

struct Harness {
    backend: HeadlessBackend,
    graph: RenderGraph,
    models: AssetCache<ModelAsset>,
    textures: AssetCache<TextureAsset>,
    config: EngineConfig,
    camera: Camera,
}

impl Harness {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut backend = HeadlessBackend::new();
        let mut graph = RenderGraph::new(64, 64);
        graph.compile(&mut backend).unwrap();

        let source = Arc::new(MemorySource::new());
        source.insert(MODEL_PATH, CUBE_OBJ);
        let models = AssetCache::new(source, 8);
        models.create(MODEL_PATH).unwrap();

        Self {
            backend,
            graph,
            models,
            textures: AssetCache::new(Arc::new(MemorySource::new()), 8),
            config: EngineConfig::default(),
            camera: Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO),
        }
    }

    fn ctx(&mut self) -> FrameContext<'_> {
        FrameContext {
            dt: 1.0 / 60.0,
            frame_index: 0,
            camera: CameraState::capture(&self.camera),
            backend: &mut self.backend,
            graph: &mut self.graph,
            models: &self.models,
            textures: &self.textures,
            config: &self.config,
        }
    }
}

fn translation(world: &World, entity: Entity) -> Vec3 {
    world.get::<GlobalTransform>(entity).unwrap().translation()
}

#[test]
fn editor_pipeline_runs_in_fixed_order() {
    assert_eq!(
        JobPipeline::editor().job_names(),
        vec![
            "transform",
            "aabb",
            "render_graph",
            "light_data",
            "mesh_data",
            "view_clip",
            "vxgi"
        ]
    );
}

#[test]
fn transforms_compose_down_the_hierarchy() {
    let mut harness = Harness::new();
    let mut world = World::new();
    let mut job = TransformJob::default();

    let parent = world
        .spawn((
            Transform::from_position(Vec3::new(1.0, 0.0, 0.0)),
            GlobalTransform::default(),
        ))
        .id();
    let child = world
        .spawn((
            Transform::from_position(Vec3::new(0.0, 2.0, 0.0)),
            GlobalTransform::default(),
        ))
        .id();
    let leaf = world
        .spawn((
            Transform::from_position(Vec3::new(0.0, 0.0, 3.0)),
            GlobalTransform::default(),
        ))
        .id();
    set_parent(&mut world, child, parent);
    set_parent(&mut world, leaf, child);

    job.update(&mut world, &mut harness.ctx()).unwrap();

    assert_eq!(translation(&world, parent), Vec3::new(1.0, 0.0, 0.0));
    assert_eq!(translation(&world, child), Vec3::new(1.0, 2.0, 0.0));
    assert_eq!(translation(&world, leaf), Vec3::new(1.0, 2.0, 3.0));
}

#[test]
fn only_dirty_subtrees_are_recomputed() {
    let mut harness = Harness::new();
    let mut world = World::new();
    let mut job = TransformJob::default();

    let parent = world
        .spawn((
            Transform::from_position(Vec3::new(1.0, 0.0, 0.0)),
            GlobalTransform::default(),
        ))
        .id();
    let leaf = world
        .spawn((Transform::default(), GlobalTransform::default()))
        .id();
    set_parent(&mut world, leaf, parent);

    job.update(&mut world, &mut harness.ctx()).unwrap();
    world.clear_trackers();

    world.get_mut::<Transform>(leaf).unwrap().position = Vec3::new(0.0, 5.0, 0.0);
    job.update(&mut world, &mut harness.ctx()).unwrap();

    assert_eq!(translation(&world, leaf), Vec3::new(1.0, 5.0, 0.0));
    let recomputed: Vec<Entity> = world
        .query_filtered::<Entity, Changed<GlobalTransform>>()
        .iter(&world)
        .collect();
    assert_eq!(recomputed, vec![leaf]);
}

#[test]
fn bounds_follow_the_model_and_the_transform() {
    let mut harness = Harness::new();
    let mut world = World::new();

    let entity = spawn_mesh(&mut world, MODEL_PATH, Material::default());
    TransformJob::default()
        .update(&mut world, &mut harness.ctx())
        .unwrap();
    AabbJob::default()
        .update(&mut world, &mut harness.ctx())
        .unwrap();

    let aabb = *world.get::<Aabb>(entity).unwrap();
    assert_eq!(aabb.min, Vec3::splat(-1.0));
    assert_eq!(aabb.max, Vec3::splat(1.0));

    world.clear_trackers();
    world.get_mut::<Transform>(entity).unwrap().position = Vec3::new(10.0, 0.0, 0.0);
    TransformJob::default()
        .update(&mut world, &mut harness.ctx())
        .unwrap();
    AabbJob::default()
        .update(&mut world, &mut harness.ctx())
        .unwrap();

    let aabb = *world.get::<Aabb>(entity).unwrap();
    assert_eq!(aabb.center(), Vec3::new(10.0, 0.0, 0.0));
}

#[test]
fn view_clip_toggles_the_renderable_tag() {
    let mut harness = Harness::new();
    let mut world = World::new();
    let mut job = RenderViewClipJob::default();

    let visible = world
        .spawn(Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)))
        .id();
    let behind = world
        .spawn(Aabb::new(
            Vec3::new(-1.0, -1.0, 99.0),
            Vec3::new(1.0, 1.0, 101.0),
        ))
        .id();

    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert!(world.get::<Renderable>(visible).is_some());
    assert!(world.get::<Renderable>(behind).is_none());

    // Drag the visible box far off to the side.
    *world.get_mut::<Aabb>(visible).unwrap() = Aabb::new(
        Vec3::new(999.0, -1.0, -1.0),
        Vec3::new(1001.0, 1.0, 1.0),
    );
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert!(world.get::<Renderable>(visible).is_none());
}

#[test]
fn light_slots_are_stable_and_recycled() {
    let mut harness = Harness::new();
    let mut world = World::new();
    let mut job = RenderLightDataJob::default();

    let first = spawn_direction_light(&mut world, -Vec3::Y, Vec3::ONE, 1.0, false);
    let second = spawn_direction_light(&mut world, -Vec3::Y, Vec3::ONE, 1.0, false);
    job.update(&mut world, &mut harness.ctx()).unwrap();

    let slot_of = |world: &World, e: Entity| world.get::<LightRenderData>(e).unwrap().slot;
    let first_slot = slot_of(&world, first);
    let second_slot = slot_of(&world, second);
    assert_ne!(first_slot, second_slot);

    // Slots survive unrelated frames.
    world.clear_trackers();
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert_eq!(slot_of(&world, first), first_slot);

    // A despawned light's slot goes to the next newcomer.
    world.despawn(first);
    job.update(&mut world, &mut harness.ctx()).unwrap();
    let third = spawn_direction_light(&mut world, -Vec3::Y, Vec3::ONE, 1.0, false);
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert_eq!(slot_of(&world, third), first_slot);
    assert_eq!(slot_of(&world, second), second_slot);
}

#[test]
fn shadow_atlas_repacks_when_the_caster_set_changes() {
    let mut harness = Harness::new();
    let mut world = World::new();
    let mut job = RenderLightDataJob::default();

    let lights: Vec<Entity> = (0..5)
        .map(|_| spawn_direction_light(&mut world, -Vec3::Y, Vec3::ONE, 1.0, true))
        .collect();
    job.update(&mut world, &mut harness.ctx()).unwrap();

    // Five casters need a 4x4 grid, so quarter-size tiles.
    for &light in &lights {
        let shadow = world.get::<DirectionShadow>(light).unwrap();
        assert_eq!(shadow.atlas_viewport.z, 0.25);
        assert!(world
            .get::<LightRenderData>(light)
            .unwrap()
            .atlas_index
            .is_some());
        let splits = shadow.cascade_splits;
        assert!(splits.windows(2).all(|w| w[0] < w[1]));
    }

    // Dropping one caster shrinks the set to four, which fits a 2x2 grid.
    world.entity_mut(lights[0]).remove::<DirectionShadow>();
    job.update(&mut world, &mut harness.ctx()).unwrap();
    for &light in &lights[1..] {
        assert_eq!(
            world.get::<DirectionShadow>(light).unwrap().atlas_viewport.z,
            0.5
        );
    }
    assert!(world
        .get::<LightRenderData>(lights[0])
        .unwrap()
        .atlas_index
        .is_none());
}

#[test]
fn archetype_moves_do_not_repack_the_atlas() {
    let mut harness = Harness::new();
    let mut world = World::new();
    let mut job = RenderLightDataJob::default();

    let lights: Vec<Entity> = (0..3)
        .map(|_| spawn_direction_light(&mut world, -Vec3::Y, Vec3::ONE, 1.0, true))
        .collect();
    job.update(&mut world, &mut harness.ctx()).unwrap();
    world.clear_trackers();

    let viewports: Vec<Vec4> = lights
        .iter()
        .map(|&e| world.get::<DirectionShadow>(e).unwrap().atlas_viewport)
        .collect();

    // Moving a caster to another archetype reorders query iteration but
    // leaves the caster set intact, so no tile may move and nothing
    // re-uploads.
    let writes_before = harness.backend.buffer_write_count();
    world.entity_mut(lights[1]).insert(Renderable);
    job.update(&mut world, &mut harness.ctx()).unwrap();

    assert_eq!(harness.backend.buffer_write_count(), writes_before);
    for (&light, &viewport) in lights.iter().zip(&viewports) {
        assert_eq!(
            world.get::<DirectionShadow>(light).unwrap().atlas_viewport,
            viewport
        );
    }
}

#[test]
fn mesh_render_data_is_created_lazily_and_released() {
    let mut harness = Harness::new();
    let mut world = World::new();
    let mut job = RenderMeshDataJob::default();

    let entity = spawn_mesh(&mut world, MODEL_PATH, Material::default());
    world.entity_mut(entity).insert(Renderable);

    job.update(&mut world, &mut harness.ctx()).unwrap();
    let render = world.get::<MeshRenderData>(entity).unwrap();
    assert!(render.index_count > 0);
    let buffers_live = harness.backend.live_buffer_count();
    assert!(buffers_live >= 3);

    // Losing the mesh source releases the GPU objects.
    world.entity_mut(entity).remove::<MeshSource>();
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert!(world.get::<MeshRenderData>(entity).is_none());
    assert_eq!(harness.backend.live_buffer_count(), buffers_live - 3);
}

#[test]
fn material_value_edits_rewrite_the_uniform_in_place() {
    let mut harness = Harness::new();
    let mut world = World::new();
    let mut job = RenderMeshDataJob::default();

    let entity = spawn_mesh(&mut world, MODEL_PATH, Material::default());
    world.entity_mut(entity).insert(Renderable);
    job.update(&mut world, &mut harness.ctx()).unwrap();

    let writes_before = harness.backend.buffer_write_count();
    world
        .get_mut::<Material>(entity)
        .unwrap()
        .set_base_color(Vec4::new(1.0, 0.0, 0.0, 1.0));
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert_eq!(harness.backend.buffer_write_count(), writes_before + 1);

    // The flag is consumed, so the next frame writes nothing.
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert_eq!(harness.backend.buffer_write_count(), writes_before + 1);
}

#[test]
fn failed_texture_loads_settle_on_the_fallback() {
    let mut harness = Harness::new();
    let mut world = World::new();
    let mut job = RenderMeshDataJob::default();

    let texture_path = "mem://missing.png";
    let mut material = Material::default();
    material.set_base_color_texture(Some(texture_path.to_owned()));
    let entity = spawn_mesh(&mut world, MODEL_PATH, material);
    world.entity_mut(entity).insert(Renderable);

    // The first update schedules the load; it fails (no backing bytes).
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert!(matches!(
        harness.textures.get_async(texture_path).unwrap().wait(),
        Err(AssetError::LoadFailed(_))
    ));
    harness.textures.tick();
    job.update(&mut world, &mut harness.ctx()).unwrap();

    // The failure is final: even when the texture shows up later the
    // entity stays on the fallback instead of retrying.
    let textures_live = harness.backend.live_texture_count();
    harness.textures.delete(texture_path).unwrap();
    harness.textures.import(texture_path, &one_pixel_png()).unwrap();
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert_eq!(harness.backend.live_texture_count(), textures_live);
}

fn one_pixel_png() -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image::RgbaImage::new(1, 1))
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageOutputFormat::Png,
        )
        .unwrap();
    bytes
}

#[test]
fn probes_bind_and_release_voxel_slots_with_visibility() {
    let mut harness = Harness::new();
    harness.config.max_probe_count = 1;
    let mut world = World::new();
    let mut job = RenderVxgiJob::default();

    let probe = spawn_vxgi_probe(&mut world, Vec3::ZERO, Vec3::ONE, 16);
    world.get_mut::<GlobalTransform>(probe).unwrap().0 = Mat4::IDENTITY;
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert_eq!(world.get::<VxgiRenderData>(probe).unwrap().slot, Some(0));

    // A second visible probe finds the pool exhausted.
    let crowded = spawn_vxgi_probe(&mut world, Vec3::ZERO, Vec3::ONE, 16);
    world.get_mut::<GlobalTransform>(crowded).unwrap().0 = Mat4::IDENTITY;
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert!(world.get::<VxgiRenderData>(crowded).is_none());

    // Leaving the frustum frees the slot but keeps the voxel buffer.
    world.get_mut::<GlobalTransform>(probe).unwrap().0 =
        Mat4::from_translation(Vec3::new(5000.0, 0.0, 0.0));
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert_eq!(world.get::<VxgiRenderData>(probe).unwrap().slot, None);

    // The freed slot goes to the waiting probe.
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert_eq!(world.get::<VxgiRenderData>(crowded).unwrap().slot, Some(0));
}

#[test]
fn full_frame_cycle_materializes_a_spawned_mesh() {
    let _ = env_logger::builder().is_test(true).try_init();
    let source = Arc::new(MemorySource::new());
    source.insert(MODEL_PATH, CUBE_OBJ);
    let mut engine = Engine::new(
        EngineConfig::default(),
        Box::new(HeadlessBackend::new()),
        source,
        Arc::new(MemorySource::new()),
    )
    .unwrap();
    engine.models().create(MODEL_PATH).unwrap();

    spawn_camera(engine.world(), Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO));
    let entity = spawn_mesh(engine.world(), MODEL_PATH, Material::default());

    // Frame 1 derives bounds and visibility; frame 2 materializes GPU data.
    engine.frame(1.0 / 60.0).unwrap();
    engine.frame(1.0 / 60.0).unwrap();

    assert!(engine.world().get::<Renderable>(entity).is_some());
    assert!(engine.world().get::<MeshRenderData>(entity).is_some());
    assert!(engine.output().is_ok());

    engine.despawn(entity);
    assert!(!engine.world().entities().contains(entity));
    engine.shutdown();
}

#[test]
fn despawned_lights_are_forgotten() {
    let mut harness = Harness::new();
    let mut world = World::new();
    let mut job = RenderLightDataJob::default();

    let light = spawn_direction_light(&mut world, -Vec3::Y, Vec3::ONE, 1.0, false);
    job.update(&mut world, &mut harness.ctx()).unwrap();
    assert!(world.get::<DirectionLight>(light).is_some());

    world.despawn(light);
    job.update(&mut world, &mut harness.ctx()).unwrap();
    let remaining = world
        .query::<&LightRenderData>()
        .iter(&world)
        .count();
    assert_eq!(remaining, 0);
}
