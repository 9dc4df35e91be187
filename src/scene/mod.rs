//! Scene components and entity spawn policies
//!
//! Entities carry plain-data source components (mesh, light, probe) that the
//! editor serializes, plus render-derived components materialized lazily by
//! the update jobs. Render-derived components own GPU handles and must be
//! released through the backend when they go away.

mod aabb;
mod camera;
mod light;
mod transform;

pub use aabb::Aabb;
pub use camera::{Camera, CameraUniformData, Frustum, Plane, Projection};
pub use light::{
    atlas_grid_count, atlas_viewport, cascade_splits, DirectionLight, DirectionShadow,
    LightGpuData, LightRenderData,
};
pub use transform::{
    collect_subtree, hierarchy_depth, remove_parent, set_parent, Children, GlobalTransform,
    ObjectUniformData, Parent, Transform,
};

use bevy_ecs::prelude::*;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::rhi::{BindGroupHandle, BufferHandle, GraphicsBackend};

/// Reference to a model asset, resolved through the asset cache
#[derive(Component, Debug, Clone)]
pub struct MeshSource {
    pub model: String,
}

impl MeshSource {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

/// Material parameters plus dirty flags consumed by the mesh-data job.
///
/// Mutate through the setters so the job re-uploads only what changed.
#[derive(Component, Debug, Clone)]
pub struct Material {
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub base_color_texture: Option<String>,
    pub(crate) textures_changed: bool,
    pub(crate) values_changed: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            base_color_texture: None,
            textures_changed: false,
            values_changed: false,
        }
    }
}

impl Material {
    pub fn set_base_color(&mut self, color: Vec4) {
        self.base_color = color;
        self.values_changed = true;
    }

    pub fn set_metallic(&mut self, metallic: f32) {
        self.metallic = metallic;
        self.values_changed = true;
    }

    pub fn set_roughness(&mut self, roughness: f32) {
        self.roughness = roughness;
        self.values_changed = true;
    }

    pub fn set_base_color_texture(&mut self, texture: Option<String>) {
        self.base_color_texture = texture;
        self.textures_changed = true;
    }

    pub fn uniform_data(&self) -> MaterialGpuData {
        MaterialGpuData {
            base_color: self.base_color,
            params: Vec4::new(self.metallic, self.roughness, 0.0, 0.0),
        }
    }
}

/// Material uniform buffer layout
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialGpuData {
    pub base_color: Vec4,
    /// x = metallic, y = roughness
    pub params: Vec4,
}

/// Tag toggled by the view-clip job; passes only draw tagged entities
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Renderable;

/// Voxel global-illumination probe volume
#[derive(Component, Debug, Clone, Copy)]
pub struct VxgiProbe {
    pub half_extent: Vec3,
    pub resolution: u32,
}

impl VxgiProbe {
    pub fn new(half_extent: Vec3, resolution: u32) -> Self {
        Self {
            half_extent,
            resolution,
        }
    }
}

/// Render-derived GPU mesh, materialized by the mesh-data job the first time
/// a mesh entity is used. Valid only while the source [`MeshSource`] exists.
#[derive(Component, Debug)]
pub struct MeshRenderData {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub material_buffer: BufferHandle,
    pub bind_group: BindGroupHandle,
}

impl MeshRenderData {
    pub fn release(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
        backend.destroy_buffer(self.material_buffer);
        backend.destroy_bind_group(self.bind_group);
    }
}

/// Render-derived voxelization state for a GI probe. The slot binds the
/// probe into the fixed-size active pool while it is inside the frustum.
#[derive(Component, Debug)]
pub struct VxgiRenderData {
    pub voxel_buffer: BufferHandle,
    pub slot: Option<usize>,
}

impl VxgiRenderData {
    pub fn release(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_buffer(self.voxel_buffer);
    }
}

// Spawn policies: typed factories so every entity kind starts with a
// consistent component set.

/// Create a mesh entity with transform, model reference and material.
pub fn spawn_mesh(world: &mut World, model: impl Into<String>, material: Material) -> Entity {
    world
        .spawn((
            Transform::default(),
            GlobalTransform::default(),
            MeshSource::new(model),
            material,
        ))
        .id()
}

/// Create a directional light entity; `shadow` additionally attaches shadow
/// casting state filled in by the light-data job.
pub fn spawn_direction_light(
    world: &mut World,
    direction: Vec3,
    color: Vec3,
    intensity: f32,
    shadow: bool,
) -> Entity {
    let mut entity = world.spawn((
        Transform::default(),
        GlobalTransform::default(),
        DirectionLight::new(direction, color, intensity),
    ));
    if shadow {
        entity.insert(DirectionShadow::default());
    }
    entity.id()
}

/// Create a GI probe entity.
pub fn spawn_vxgi_probe(
    world: &mut World,
    position: Vec3,
    half_extent: Vec3,
    resolution: u32,
) -> Entity {
    world
        .spawn((
            Transform::from_position(position),
            GlobalTransform::default(),
            VxgiProbe::new(half_extent, resolution),
        ))
        .id()
}

/// Create the editing camera entity.
pub fn spawn_camera(world: &mut World, camera: Camera) -> Entity {
    world.spawn(camera).id()
}

/// Destroy `entity` and all descendants, releasing GPU handles owned by
/// render-derived components before the entities go away.
pub fn despawn_recursive(world: &mut World, backend: &mut dyn GraphicsBackend, entity: Entity) {
    remove_parent(world, entity);
    for member in collect_subtree(world, entity) {
        if let Some(render_data) = world.get::<MeshRenderData>(member) {
            render_data.release(backend);
        }
        if let Some(render_data) = world.get::<VxgiRenderData>(member) {
            render_data.release(backend);
        }
        world.despawn(member);
    }
}
