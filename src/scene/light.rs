//! Light components and shadow atlas math

use bevy_ecs::prelude::*;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Directional light source
#[derive(Component, Debug, Clone, Copy)]
pub struct DirectionLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl DirectionLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize(),
            color,
            intensity,
        }
    }
}

/// Shadow casting state for a directional light.
///
/// The atlas viewport and cascade splits are assigned by the light-data job;
/// user code only chooses the cascade count.
#[derive(Component, Debug, Clone, Copy)]
pub struct DirectionShadow {
    pub cascade_count: u32,
    /// Normalized atlas rectangle: x, y, width, height.
    pub atlas_viewport: Vec4,
    pub cascade_splits: [f32; 4],
}

impl Default for DirectionShadow {
    fn default() -> Self {
        Self {
            cascade_count: 4,
            atlas_viewport: Vec4::ZERO,
            cascade_splits: [0.0; 4],
        }
    }
}

/// Render-derived light state: the stable slot in the global light buffer.
/// Exists only while the source [`DirectionLight`] does.
#[derive(Component, Debug, Clone, Copy)]
pub struct LightRenderData {
    pub slot: usize,
    /// Index into the shadow atlas grid, if this light casts shadows.
    pub atlas_index: Option<u32>,
}

/// Per-light GPU buffer layout
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightGpuData {
    /// xyz direction, w = 1 when the light casts shadows
    pub direction: Vec4,
    /// rgb color, w = intensity
    pub color: Vec4,
    pub atlas_viewport: Vec4,
    pub cascade_splits: Vec4,
}

/// Shadow atlas side length in tiles for `shadow_count` shadow-casting
/// lights: the smallest power-of-two grid whose square fits them all,
/// `2^ceil(log4(n))`.
pub fn atlas_grid_count(shadow_count: u32) -> u32 {
    let mut grid = 1;
    while grid * grid < shadow_count {
        grid *= 2;
    }
    grid
}

/// Normalized atlas viewport for the tile at `atlas_index` in a
/// `grid x grid` layout. Tiles are filled row-major.
pub fn atlas_viewport(atlas_index: u32, grid: u32) -> Vec4 {
    let tile = 1.0 / grid as f32;
    let row = atlas_index / grid;
    let col = atlas_index % grid;
    Vec4::new(col as f32 * tile, row as f32 * tile, tile, tile)
}

/// Practical cascade split distances mixing logarithmic and uniform
/// distributions over `[near, far]`.
pub fn cascade_splits(near: f32, far: f32, cascade_count: u32, lambda: f32) -> [f32; 4] {
    let mut splits = [far; 4];
    let count = cascade_count.clamp(1, 4);
    for i in 0..count {
        let p = (i + 1) as f32 / count as f32;
        let log = near * (far / near).powf(p);
        let uniform = near + (far - near) * p;
        splits[i as usize] = lambda * log + (1.0 - lambda) * uniform;
    }
    splits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_count_is_power_of_four_ceiling() {
        assert_eq!(atlas_grid_count(1), 1);
        assert_eq!(atlas_grid_count(2), 2);
        assert_eq!(atlas_grid_count(4), 2);
        assert_eq!(atlas_grid_count(5), 4);
        assert_eq!(atlas_grid_count(16), 4);
        assert_eq!(atlas_grid_count(17), 8);
    }

    #[test]
    fn viewport_tiles_are_grid_reciprocal() {
        let grid = atlas_grid_count(5);
        let viewport = atlas_viewport(0, grid);
        assert_eq!(viewport.z, 0.25);
        assert_eq!(viewport.w, 0.25);

        // Tile 6 of a 4x4 grid sits at row 1, column 2.
        let viewport = atlas_viewport(6, grid);
        assert_eq!(viewport.x, 0.5);
        assert_eq!(viewport.y, 0.25);
    }

    #[test]
    fn splits_are_monotonic_and_end_at_far() {
        let splits = cascade_splits(0.1, 100.0, 4, 0.5);
        for pair in splits.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!((splits[3] - 100.0).abs() < 1e-4);
    }
}
