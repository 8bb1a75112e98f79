//! Mathematical utilities

pub mod aabb;
pub mod morton;
pub mod transform;

pub use aabb::Aabb;
pub use morton::morton_key;
pub use transform::WorldTransform;
