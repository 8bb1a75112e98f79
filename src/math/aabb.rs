//! Axis-aligned bounding box in local voxel space

use crate::core::types::{IVec3, Vec3};

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box covering the voxel cube `[min, min + size)`
    pub fn from_cube(min: IVec3, size: i32) -> Self {
        let min = min.as_vec3();
        Self {
            min,
            max: min + Vec3::splat(size as f32),
        }
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if point is inside AABB (inclusive on both ends)
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Check if two AABBs intersect
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Grow every face outwards by `amount`
    pub fn padded(&self, amount: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }

    /// Euclidean distance from `p` to the closest point of the box; zero inside
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        let closest = p.clamp(self.min, self.max);
        closest.distance(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cube() {
        let aabb = Aabb::from_cube(IVec3::new(16, 0, 32), 16);
        assert_eq!(aabb.min, Vec3::new(16.0, 0.0, 32.0));
        assert_eq!(aabb.size(), Vec3::splat(16.0));
        assert_eq!(aabb.center(), Vec3::new(24.0, 8.0, 40.0));
    }

    #[test]
    fn test_contains_point() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(aabb.contains_point(Vec3::splat(0.5)));
        assert!(aabb.contains_point(Vec3::ONE));
        assert!(!aabb.contains_point(Vec3::splat(2.0)));
    }

    #[test]
    fn test_intersects() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(0.5), Vec3::splat(1.5));
        let c = Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.padded(1.0).intersects(&c));
    }

    #[test]
    fn test_distance_to_point() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(10.0));
        assert_eq!(aabb.distance_to_point(Vec3::splat(5.0)), 0.0);
        assert_eq!(aabb.distance_to_point(Vec3::new(13.0, 5.0, 5.0)), 3.0);
        assert_eq!(aabb.distance_to_point(Vec3::new(-3.0, -4.0, 5.0)), 5.0);
    }
}
