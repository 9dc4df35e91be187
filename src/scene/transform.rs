//! Transform components and the parent-child hierarchy
//!
//! All hierarchy operations keep [`Parent`] and [`Children`] consistent with
//! each other.

use bevy_ecs::prelude::*;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};

/// Local transform relative to the parent entity (or the world for roots)
#[derive(Component, Debug, Clone, Copy)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, position) = matrix.to_scale_rotation_translation();
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Get the local model matrix for this transform
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
    }

    pub fn rotate_axis(&mut self, axis: Vec3, angle: f32) {
        self.rotation = Quat::from_axis_angle(axis, angle) * self.rotation;
    }
}

/// World-space transform, finalized by the transform job each frame
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct GlobalTransform(pub Mat4);

impl GlobalTransform {
    pub fn matrix(&self) -> Mat4 {
        self.0
    }

    pub fn translation(&self) -> Vec3 {
        self.0.w_axis.truncate()
    }

    /// Build per-object uniform data for shaders
    pub fn uniform_data(&self) -> ObjectUniformData {
        ObjectUniformData {
            model: self.0,
            normal_matrix: self.0.inverse().transpose(),
        }
    }
}

/// Per-object uniform data for the GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniformData {
    pub model: Mat4,
    pub normal_matrix: Mat4,
}

/// Link to the parent entity
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parent(pub Entity);

/// Child entities, kept in sync with [`Parent`]
#[derive(Component, Debug, Clone, Default)]
pub struct Children(pub Vec<Entity>);

/// Sets `entity` as a child of `parent`.
///
/// Updates both the [`Parent`] component on `entity` and the [`Children`]
/// component on `parent`. If `entity` already has a different parent it is
/// removed from the old parent's children first.
///
/// # Panics
///
/// Panics if `entity == parent`.
pub fn set_parent(world: &mut World, entity: Entity, parent: Entity) {
    assert_ne!(entity, parent, "cannot set entity as its own parent");

    if let Some(old_parent) = world.get::<Parent>(entity).map(|p| p.0) {
        if old_parent == parent {
            return;
        }
        if let Some(mut children) = world.get_mut::<Children>(old_parent) {
            children.0.retain(|&e| e != entity);
        }
    }

    world.entity_mut(entity).insert(Parent(parent));

    if let Some(mut children) = world.get_mut::<Children>(parent) {
        if !children.0.contains(&entity) {
            children.0.push(entity);
        }
    } else {
        world.entity_mut(parent).insert(Children(vec![entity]));
    }
}

/// Detaches `entity` from its parent, making it a hierarchy root.
pub fn remove_parent(world: &mut World, entity: Entity) {
    if let Some(parent) = world.get::<Parent>(entity).map(|p| p.0) {
        if let Some(mut children) = world.get_mut::<Children>(parent) {
            children.0.retain(|&e| e != entity);
        }
        world.entity_mut(entity).remove::<Parent>();
    }
}

/// Collects `entity` and all of its descendants, depth-first.
pub fn collect_subtree(world: &World, entity: Entity) -> Vec<Entity> {
    let mut result = Vec::new();
    let mut stack = vec![entity];
    while let Some(current) = stack.pop() {
        result.push(current);
        if let Some(children) = world.get::<Children>(current) {
            stack.extend(children.0.iter().copied());
        }
    }
    result
}

/// Depth of `entity` in the hierarchy (roots are depth 0).
pub fn hierarchy_depth(world: &World, entity: Entity) -> usize {
    let mut depth = 0;
    let mut current = entity;
    while let Some(parent) = world.get::<Parent>(current) {
        depth += 1;
        current = parent.0;
    }
    depth
}
