//! World session and procedural modifiers

pub mod session;
pub mod modifier;

pub use session::VoxelWorld;
pub use modifier::{bake_modifiers, ModifierBlend, ModifierShape, ShapeModifier, VoxelModifier};
