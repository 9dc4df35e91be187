//! Transform hierarchy propagation

use std::collections::HashSet;

use bevy_ecs::prelude::*;
use glam::Mat4;

use crate::jobs::{FrameContext, JobError, UpdateJob};
use crate::scene::{hierarchy_depth, Children, GlobalTransform, Parent, Transform};

/// Recomputes [`GlobalTransform`] for every entity whose local transform or
/// parent link changed, including all descendants. Entities are visited
/// parents-first so a dirty subtree is composed exactly once.
#[derive(Default)]
pub struct TransformJob;

impl UpdateJob for TransformJob {
    fn name(&self) -> &str {
        "transform"
    }

    fn update(&mut self, world: &mut World, _ctx: &mut FrameContext) -> Result<(), JobError> {
        let mut dirty: Vec<Entity> = world
            .query_filtered::<Entity, (With<Transform>, Or<(Changed<Transform>, Changed<Parent>)>)>()
            .iter(world)
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }

        // Shallow roots first, so a dirty parent subsumes its dirty children.
        dirty.sort_by_key(|&entity| hierarchy_depth(world, entity));

        let mut visited = HashSet::new();
        for root in dirty {
            if visited.contains(&root) {
                continue;
            }
            propagate_subtree(world, root, &mut visited);
        }
        Ok(())
    }
}

fn propagate_subtree(world: &mut World, root: Entity, visited: &mut HashSet<Entity>) {
    let parent_matrix = world
        .get::<Parent>(root)
        .and_then(|parent| world.get::<GlobalTransform>(parent.0))
        .map(|global| global.0)
        .unwrap_or(Mat4::IDENTITY);

    let mut stack = vec![(root, parent_matrix)];
    while let Some((entity, parent_matrix)) = stack.pop() {
        if !visited.insert(entity) {
            continue;
        }
        let Some(local) = world.get::<Transform>(entity) else {
            continue;
        };
        let global = parent_matrix * local.matrix();
        if let Some(mut slot) = world.get_mut::<GlobalTransform>(entity) {
            slot.0 = global;
        } else {
            world.entity_mut(entity).insert(GlobalTransform(global));
        }
        if let Some(children) = world.get::<Children>(entity) {
            for &child in &children.0 {
                stack.push((child, global));
            }
        }
    }
}
