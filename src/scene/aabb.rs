//! Axis-aligned bounding boxes

use bevy_ecs::prelude::*;
use glam::{Mat4, Vec3};

/// World-space axis-aligned bounding box, refreshed by the AABB job whenever
/// the entity's model reference or global transform changes.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        debug_assert!(min.cmple(max).all());
        Self { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut aabb = Self {
            min: first,
            max: first,
        };
        for p in iter {
            aabb.min = aabb.min.min(p);
            aabb.max = aabb.max.max(p);
        }
        Some(aabb)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// The box enclosing this box after an affine transform.
    pub fn transformed(&self, matrix: Mat4) -> Self {
        let center = matrix.transform_point3(self.center());
        let half = self.half_extent();
        // Extent of the rotated box along each world axis.
        let abs = Vec3::new(
            matrix.x_axis.x.abs() * half.x
                + matrix.y_axis.x.abs() * half.y
                + matrix.z_axis.x.abs() * half.z,
            matrix.x_axis.y.abs() * half.x
                + matrix.y_axis.y.abs() * half.y
                + matrix.z_axis.y.abs() * half.z,
            matrix.x_axis.z.abs() * half.x
                + matrix.y_axis.z.abs() * half.y
                + matrix.z_axis.z.abs() * half.z,
        );
        Self {
            min: center - abs,
            max: center + abs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn from_points_covers_extremes() {
        let aabb = Aabb::from_points([
            Vec3::new(-1.0, 2.0, 0.0),
            Vec3::new(3.0, -4.0, 1.0),
            Vec3::ZERO,
        ])
        .unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, -4.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(3.0, 2.0, 1.0));
    }

    #[test]
    fn transformed_translation_moves_box() {
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let moved = aabb.transformed(Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        assert_eq!(moved.center(), Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(moved.half_extent(), Vec3::ONE);
    }

    #[test]
    fn transformed_rotation_grows_conservatively() {
        let aabb = Aabb::new(Vec3::new(-1.0, -0.1, -0.1), Vec3::new(1.0, 0.1, 0.1));
        let rotated = aabb.transformed(Mat4::from_quat(Quat::from_rotation_z(
            std::f32::consts::FRAC_PI_4,
        )));
        // The rotated long axis must still be fully enclosed.
        let expect = std::f32::consts::FRAC_1_SQRT_2 * 1.0 + std::f32::consts::FRAC_1_SQRT_2 * 0.1;
        assert!((rotated.max.x - expect).abs() < 1e-5);
        assert!((rotated.max.y - expect).abs() < 1e-5);
    }
}
