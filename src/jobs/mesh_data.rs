//! GPU mesh materialization and incremental material updates

use std::collections::HashMap;

use bevy_ecs::prelude::*;

use crate::jobs::{FrameContext, JobError, UpdateJob};
use crate::pipeline::{GEOMETRY_PASS, SHADOW_PASS};
use crate::rhi::{
    BindGroupEntry, BindGroupLayoutEntry, BindGroupLayoutHandle, BindingType, BufferDescriptor,
    BufferUsage, SamplerDescriptor, SamplerHandle, TextureDescriptor, TextureFormat,
    TextureHandle, TextureUsage, TextureViewHandle,
};
use crate::scene::{Material, MeshRenderData, MeshSource, Renderable};

/// Materializes [`MeshRenderData`] the first time a mesh entity becomes
/// renderable: vertex and index buffers from the model asset, a material
/// uniform buffer, and the per-object bind group.
///
/// After creation the job only patches what changed. Material value edits
/// rewrite the uniform buffer in place; texture reassignment rebuilds the
/// bind group. Entities that lose their [`MeshSource`] have their GPU
/// objects released and the draw passes re-recorded.
#[derive(Default)]
pub struct RenderMeshDataJob {
    layout: Option<BindGroupLayoutHandle>,
    sampler: Option<SamplerHandle>,
    fallback_view: Option<TextureViewHandle>,
    uploaded_textures: HashMap<String, (TextureHandle, TextureViewHandle)>,
    /// Entities whose texture asset was still loading at bind time.
    waiting_textures: Vec<(Entity, String)>,
}

struct Statics {
    layout: BindGroupLayoutHandle,
    sampler: SamplerHandle,
    fallback_view: TextureViewHandle,
}

impl RenderMeshDataJob {
    fn statics(&mut self, ctx: &mut FrameContext) -> Result<Statics, JobError> {
        if let (Some(layout), Some(sampler), Some(fallback_view)) =
            (self.layout, self.sampler, self.fallback_view)
        {
            return Ok(Statics {
                layout,
                sampler,
                fallback_view,
            });
        }

        let layout = ctx.backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 1,
                ty: BindingType::Texture,
            },
            BindGroupLayoutEntry {
                binding: 2,
                ty: BindingType::Sampler { comparison: false },
            },
        ])?;
        let sampler = ctx.backend.create_sampler(&SamplerDescriptor {
            label: Some("material".into()),
            ..Default::default()
        })?;
        let fallback = ctx.backend.create_texture(&TextureDescriptor {
            label: Some("material/fallback".into()),
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?;
        ctx.backend.write_texture(fallback, &[255; 4], 1, 1);
        let fallback_view = ctx.backend.create_texture_view(fallback, 0)?;

        self.layout = Some(layout);
        self.sampler = Some(sampler);
        self.fallback_view = Some(fallback_view);
        Ok(Statics {
            layout,
            sampler,
            fallback_view,
        })
    }

    /// View over the uploaded texture asset, or `None` while it still loads.
    fn texture_view(
        &mut self,
        ctx: &mut FrameContext,
        path: &str,
    ) -> Result<Option<TextureViewHandle>, JobError> {
        if let Some(&(_, view)) = self.uploaded_textures.get(path) {
            return Ok(Some(view));
        }
        let Some(asset) = ctx.textures.get(path) else {
            if let Err(err) = ctx.textures.get_async(path) {
                log::warn!("texture '{path}' unavailable: {err}");
            }
            return Ok(None);
        };
        let texture = ctx.backend.create_texture(&TextureDescriptor {
            label: Some(path.to_owned()),
            width: asset.width,
            height: asset.height,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?;
        ctx.backend
            .write_texture(texture, &asset.pixels, asset.width, asset.height);
        let view = ctx.backend.create_texture_view(texture, 0)?;
        self.uploaded_textures
            .insert(path.to_owned(), (texture, view));
        Ok(Some(view))
    }

    fn rebuild_bind_group(
        &mut self,
        world: &mut World,
        ctx: &mut FrameContext,
        entity: Entity,
        statics: &Statics,
    ) -> Result<(), JobError> {
        let Some(texture_path) = world
            .get::<Material>(entity)
            .map(|m| m.base_color_texture.clone())
        else {
            return Ok(());
        };
        let Some(material_buffer) = world
            .get::<MeshRenderData>(entity)
            .map(|render| render.material_buffer)
        else {
            return Ok(());
        };

        let view = match &texture_path {
            Some(path) => match self.texture_view(ctx, path)? {
                Some(view) => view,
                None => {
                    self.waiting_textures.push((entity, path.clone()));
                    statics.fallback_view
                }
            },
            None => statics.fallback_view,
        };

        let bind_group = ctx.backend.create_bind_group(
            statics.layout,
            &[
                (
                    0,
                    BindGroupEntry::Buffer {
                        buffer: material_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (1, BindGroupEntry::Texture(view)),
                (2, BindGroupEntry::Sampler(statics.sampler)),
            ],
        )?;
        if let Some(mut render) = world.get_mut::<MeshRenderData>(entity) {
            let old = render.bind_group;
            render.bind_group = bind_group;
            ctx.backend.destroy_bind_group(old);
        }
        Ok(())
    }
}

impl UpdateJob for RenderMeshDataJob {
    fn name(&self) -> &str {
        "mesh_data"
    }

    fn update(&mut self, world: &mut World, ctx: &mut FrameContext) -> Result<(), JobError> {
        let statics = self.statics(ctx)?;
        let mut structural = false;

        // Release GPU objects of entities that lost their mesh source.
        let stale: Vec<Entity> = world
            .query_filtered::<Entity, (With<MeshRenderData>, Without<MeshSource>)>()
            .iter(world)
            .collect();
        for entity in stale {
            if let Some(render) = world.entity_mut(entity).take::<MeshRenderData>() {
                render.release(&mut *ctx.backend);
                structural = true;
            }
        }

        // Materialize render data for renderable meshes that have none yet.
        let pending: Vec<Entity> = world
            .query_filtered::<Entity, (
                With<Renderable>,
                With<MeshSource>,
                With<Material>,
                Without<MeshRenderData>,
            )>()
            .iter(world)
            .collect();
        for entity in pending {
            let Some(model_path) = world.get::<MeshSource>(entity).map(|s| s.model.clone()) else {
                continue;
            };
            let Some(model) = ctx.models.get(&model_path) else {
                if let Err(err) = ctx.models.get_async(&model_path) {
                    log::warn!("model '{model_path}' unavailable: {err}");
                }
                continue;
            };
            let Some(material_data) = world.get::<Material>(entity).map(|m| m.uniform_data())
            else {
                continue;
            };

            let vertices: &[u8] = bytemuck::cast_slice(&model.vertices);
            let vertex_buffer = ctx.backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some(format!("{model_path}/vertices")),
                    size: vertices.len() as u64,
                    usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
                },
                vertices,
            )?;
            let indices: &[u8] = bytemuck::cast_slice(&model.indices);
            let index_buffer = ctx.backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some(format!("{model_path}/indices")),
                    size: indices.len() as u64,
                    usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
                },
                indices,
            )?;
            let material_buffer = ctx.backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some(format!("{model_path}/material")),
                    size: std::mem::size_of_val(&material_data) as u64,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                },
                bytemuck::bytes_of(&material_data),
            )?;
            let bind_group = ctx.backend.create_bind_group(
                statics.layout,
                &[
                    (
                        0,
                        BindGroupEntry::Buffer {
                            buffer: material_buffer,
                            offset: 0,
                            size: None,
                        },
                    ),
                    (1, BindGroupEntry::Texture(statics.fallback_view)),
                    (2, BindGroupEntry::Sampler(statics.sampler)),
                ],
            )?;
            world.entity_mut(entity).insert(MeshRenderData {
                vertex_buffer,
                index_buffer,
                index_count: model.indices.len() as u32,
                material_buffer,
                bind_group,
            });
            structural = true;

            // Bind the real texture now if the material names one.
            let wants_texture = world
                .get::<Material>(entity)
                .is_some_and(|m| m.base_color_texture.is_some());
            if wants_texture {
                self.rebuild_bind_group(world, ctx, entity, &statics)?;
            }
        }

        // Retry entities whose texture was still loading. A load that ended
        // in failure is dropped; the entity keeps the fallback texture.
        let waiting = std::mem::take(&mut self.waiting_textures);
        for (entity, path) in waiting {
            if ctx.textures.get(&path).is_some() {
                self.rebuild_bind_group(world, ctx, entity, &statics)?;
                continue;
            }
            match ctx.textures.get_async(&path) {
                Ok(future) => match future.try_take() {
                    Some(Err(err)) => {
                        log::warn!("texture '{path}' failed to load: {err}");
                    }
                    _ => self.waiting_textures.push((entity, path)),
                },
                Err(err) => log::warn!("texture '{path}' unavailable: {err}"),
            }
        }

        // Incremental material updates, driven by the dirty flags the
        // setters raise. Clearing them must not re-trigger change detection.
        let mut value_writes = Vec::new();
        let mut texture_rebuilds = Vec::new();
        let mut query = world.query::<(Entity, &mut Material, &MeshRenderData)>();
        for (entity, mut material, render) in query.iter_mut(world) {
            let material = material.bypass_change_detection();
            if material.values_changed {
                material.values_changed = false;
                value_writes.push((render.material_buffer, material.uniform_data()));
            }
            if material.textures_changed {
                material.textures_changed = false;
                texture_rebuilds.push(entity);
            }
        }
        for (buffer, data) in value_writes {
            ctx.backend.write_buffer(buffer, 0, bytemuck::bytes_of(&data));
        }
        for entity in texture_rebuilds {
            self.rebuild_bind_group(world, ctx, entity, &statics)?;
        }

        if structural {
            ctx.graph.mark_pass_dirty(GEOMETRY_PASS);
            ctx.graph.mark_pass_dirty(SHADOW_PASS);
        }
        Ok(())
    }
}
