//! Light slot assignment, GPU upload and shadow atlas packing

use std::collections::HashMap;
use std::mem;

use bevy_ecs::prelude::*;
use glam::Vec4;

use crate::jobs::{FrameContext, JobError, UpdateJob};
use crate::pipeline::SHADOW_PASS;
use crate::rhi::{BufferDescriptor, BufferHandle, BufferUsage};
use crate::scene::{
    atlas_grid_count, atlas_viewport, cascade_splits, DirectionLight, DirectionShadow,
    LightGpuData, LightRenderData,
};

/// Maintains one global light buffer of `max_lights` entries. Every light
/// entity gets a stable slot for its lifetime; only changed lights are
/// re-uploaded, as a sub-range write at the slot offset.
///
/// Shadow-casting lights additionally get a tile in the shadow atlas. The
/// atlas is repacked whenever the shadow caster set changes, which rewrites
/// every caster's viewport and cascade splits.
#[derive(Default)]
pub struct RenderLightDataJob {
    light_buffer: Option<BufferHandle>,
    slots: HashMap<Entity, usize>,
    free_slots: Vec<usize>,
    next_slot: usize,
    atlas_order: Vec<Entity>,
}

impl RenderLightDataJob {
    fn buffer(&mut self, ctx: &mut FrameContext) -> Result<BufferHandle, JobError> {
        if let Some(buffer) = self.light_buffer {
            return Ok(buffer);
        }
        let buffer = ctx.backend.create_buffer(&BufferDescriptor {
            label: Some("lights".into()),
            size: (ctx.config.max_lights * mem::size_of::<LightGpuData>()) as u64,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
        })?;
        self.light_buffer = Some(buffer);
        Ok(buffer)
    }

    fn allocate_slot(&mut self, max_lights: usize) -> Option<usize> {
        if let Some(slot) = self.free_slots.pop() {
            return Some(slot);
        }
        if self.next_slot < max_lights {
            let slot = self.next_slot;
            self.next_slot += 1;
            return Some(slot);
        }
        None
    }
}

impl UpdateJob for RenderLightDataJob {
    fn name(&self) -> &str {
        "light_data"
    }

    fn update(&mut self, world: &mut World, ctx: &mut FrameContext) -> Result<(), JobError> {
        let buffer = self.buffer(ctx)?;

        // New lights get a slot from the free list, then from the tail.
        let fresh: Vec<Entity> = world
            .query_filtered::<Entity, (With<DirectionLight>, Without<LightRenderData>)>()
            .iter(world)
            .collect();
        for entity in fresh {
            match self.allocate_slot(ctx.config.max_lights) {
                Some(slot) => {
                    self.slots.insert(entity, slot);
                    world.entity_mut(entity).insert(LightRenderData {
                        slot,
                        atlas_index: None,
                    });
                }
                None => {
                    log::warn!(
                        "light pool exhausted ({} slots), ignoring {entity:?}",
                        ctx.config.max_lights
                    );
                }
            }
        }

        // Slots of removed lights return to the free list.
        let stale: Vec<Entity> = world
            .query_filtered::<Entity, (With<LightRenderData>, Without<DirectionLight>)>()
            .iter(world)
            .collect();
        for entity in stale {
            if let Some(slot) = self.slots.remove(&entity) {
                self.free_slots.push(slot);
            }
            world.entity_mut(entity).remove::<LightRenderData>();
        }
        // Despawned lights release their slot as well.
        let free_slots = &mut self.free_slots;
        self.slots.retain(|&entity, &mut slot| {
            if world.entities().contains(entity) {
                true
            } else {
                free_slots.push(slot);
                false
            }
        });

        // Atlas repack when the shadow caster set changed. Query iteration
        // order shifts with archetype moves, so membership is compared in
        // sorted order and tiles are assigned in that same order.
        let mut casters: Vec<Entity> = world
            .query_filtered::<Entity, (With<DirectionShadow>, With<LightRenderData>)>()
            .iter(world)
            .collect();
        casters.sort_unstable();
        if casters != self.atlas_order {
            let grid = atlas_grid_count(casters.len() as u32);
            for (index, &entity) in casters.iter().enumerate() {
                if let Some(mut shadow) = world.get_mut::<DirectionShadow>(entity) {
                    shadow.atlas_viewport = atlas_viewport(index as u32, grid);
                    shadow.cascade_splits = cascade_splits(
                        ctx.camera.near,
                        ctx.camera.far,
                        shadow.cascade_count,
                        ctx.config.cascade_lambda,
                    );
                }
                if let Some(mut render) = world.get_mut::<LightRenderData>(entity) {
                    render.atlas_index = Some(index as u32);
                }
            }
            // Lights that stopped casting keep their slot but lose the tile.
            let dropped: Vec<Entity> = self
                .atlas_order
                .iter()
                .copied()
                .filter(|e| !casters.contains(e))
                .collect();
            for entity in dropped {
                if let Some(mut render) = world.get_mut::<LightRenderData>(entity) {
                    render.atlas_index = None;
                }
            }
            self.atlas_order = casters;
            ctx.graph.mark_pass_dirty(SHADOW_PASS);
        }

        // Sub-range uploads for changed lights only.
        let stride = mem::size_of::<LightGpuData>() as u64;
        let mut uploads = Vec::new();
        let mut query = world.query_filtered::<(
            &DirectionLight,
            Option<&DirectionShadow>,
            &LightRenderData,
        ), Or<(
            Changed<DirectionLight>,
            Changed<DirectionShadow>,
            Changed<LightRenderData>,
        )>>();
        for (light, shadow, render) in query.iter(world) {
            let casts = shadow.is_some() && render.atlas_index.is_some();
            let gpu = LightGpuData {
                direction: light.direction.extend(if casts { 1.0 } else { 0.0 }),
                color: light.color.extend(light.intensity),
                atlas_viewport: shadow.map(|s| s.atlas_viewport).unwrap_or(Vec4::ZERO),
                cascade_splits: shadow
                    .map(|s| Vec4::from_array(s.cascade_splits))
                    .unwrap_or(Vec4::ZERO),
            };
            uploads.push((render.slot, gpu));
        }
        for (slot, gpu) in uploads {
            ctx.backend
                .write_buffer(buffer, slot as u64 * stride, bytemuck::bytes_of(&gpu));
        }
        Ok(())
    }
}
