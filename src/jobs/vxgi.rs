//! GI probe voxel buffers and active-pool binding

use std::collections::HashMap;

use bevy_ecs::prelude::*;

use crate::jobs::{FrameContext, JobError, UpdateJob};
use crate::rhi::{BufferDescriptor, BufferUsage};
use crate::scene::{Aabb, GlobalTransform, VxgiProbe, VxgiRenderData};

/// Binds in-frustum GI probes to a fixed pool of voxelization slots.
///
/// A probe's voxel buffer is created lazily the first time its volume enters
/// the frustum and kept until the probe despawns. The slot is released the
/// moment the volume leaves the view, so the pool only covers probes that
/// can contribute to the visible scene.
#[derive(Default)]
pub struct RenderVxgiJob {
    slots: HashMap<Entity, usize>,
    free_slots: Vec<usize>,
    next_slot: usize,
}

impl RenderVxgiJob {
    fn allocate_slot(&mut self, max_probes: usize) -> Option<usize> {
        if let Some(slot) = self.free_slots.pop() {
            return Some(slot);
        }
        if self.next_slot < max_probes {
            let slot = self.next_slot;
            self.next_slot += 1;
            return Some(slot);
        }
        None
    }

    fn release_slot(&mut self, entity: Entity) {
        if let Some(slot) = self.slots.remove(&entity) {
            self.free_slots.push(slot);
        }
    }
}

impl UpdateJob for RenderVxgiJob {
    fn name(&self) -> &str {
        "vxgi"
    }

    fn update(&mut self, world: &mut World, ctx: &mut FrameContext) -> Result<(), JobError> {
        // Probes removed from the scene free their slot and buffer.
        let stale: Vec<Entity> = world
            .query_filtered::<Entity, (With<VxgiRenderData>, Without<VxgiProbe>)>()
            .iter(world)
            .collect();
        for entity in stale {
            self.release_slot(entity);
            if let Some(render) = world.entity_mut(entity).take::<VxgiRenderData>() {
                render.release(&mut *ctx.backend);
            }
        }
        // Despawned probes release their slot as well.
        let free_slots = &mut self.free_slots;
        self.slots.retain(|&entity, &mut slot| {
            if world.entities().contains(entity) {
                true
            } else {
                free_slots.push(slot);
                false
            }
        });

        let frustum = ctx.camera.frustum;
        let mut entered = Vec::new();
        let mut exited = Vec::new();
        let mut query = world.query::<(Entity, &VxgiProbe, &GlobalTransform, Option<&VxgiRenderData>)>();
        for (entity, probe, global, render) in query.iter(world) {
            let center = global.translation();
            let volume = Aabb::new(center - probe.half_extent, center + probe.half_extent);
            let visible = frustum.intersects_aabb(&volume);
            let bound = render.is_some_and(|r| r.slot.is_some());
            match (visible, bound) {
                (true, false) => entered.push((entity, probe.resolution)),
                (false, true) => exited.push(entity),
                _ => {}
            }
        }

        for (entity, resolution) in entered {
            let Some(slot) = self.allocate_slot(ctx.config.max_probe_count) else {
                log::warn!(
                    "probe pool exhausted ({} slots), {entity:?} stays unbound",
                    ctx.config.max_probe_count
                );
                continue;
            };
            self.slots.insert(entity, slot);
            if let Some(mut render) = world.get_mut::<VxgiRenderData>(entity) {
                render.slot = Some(slot);
            } else {
                // One RGBA16F texel per voxel cell.
                let voxels = (resolution as u64).pow(3);
                let voxel_buffer = ctx.backend.create_buffer(&BufferDescriptor {
                    label: Some(format!("vxgi/{entity:?}")),
                    size: voxels * 8,
                    usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
                })?;
                world.entity_mut(entity).insert(VxgiRenderData {
                    voxel_buffer,
                    slot: Some(slot),
                });
            }
        }
        for entity in exited {
            self.release_slot(entity);
            if let Some(mut render) = world.get_mut::<VxgiRenderData>(entity) {
                render.slot = None;
            }
        }
        Ok(())
    }
}
