//! Voxel modifiers and baking them into a save

use serde::{Deserialize, Serialize};

use crate::core::config::WorldConfig;
use crate::core::types::{IVec3, Result, Vec3};
use crate::voxel::{ChangeSet, FieldWriteGuard, VoxelField, VoxelMaterial};

/// Procedural edit applied to a field under a write guard
pub trait VoxelModifier: Send + Sync {
    fn apply(&self, field: &mut FieldWriteGuard<'_>) -> Result<()>;
}

impl<F> VoxelModifier for F
where
    F: Fn(&mut FieldWriteGuard<'_>) -> Result<()> + Send + Sync,
{
    fn apply(&self, field: &mut FieldWriteGuard<'_>) -> Result<()> {
        self(field)
    }
}

/// Shape of a [`ShapeModifier`]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModifierShape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
}

impl ModifierShape {
    /// Signed distance from a point to the surface (negative = inside).
    /// Point is relative to the shape center.
    pub fn sdf(&self, local: Vec3) -> f32 {
        match self {
            ModifierShape::Sphere { radius } => local.length() - radius,
            ModifierShape::Box { half_extents } => {
                let q = local.abs() - *half_extents;
                q.max(Vec3::ZERO).length() + q.x.max(q.y.max(q.z)).min(0.0)
            }
        }
    }

    fn half_extents(&self) -> Vec3 {
        match self {
            ModifierShape::Sphere { radius } => Vec3::splat(*radius),
            ModifierShape::Box { half_extents } => *half_extents,
        }
    }
}

/// How a shape combines with existing density
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierBlend {
    /// Union: fill the shape with the modifier material
    Add,
    /// Carve the shape out
    Subtract,
}

/// SDF shape stamped into the field at a local-grid center
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShapeModifier {
    pub center: Vec3,
    pub shape: ModifierShape,
    pub blend: ModifierBlend,
    pub material: VoxelMaterial,
}

impl VoxelModifier for ShapeModifier {
    fn apply(&self, field: &mut FieldWriteGuard<'_>) -> Result<()> {
        // One voxel of padding so the density ramp reaches the surface
        let extent = self.shape.half_extents() + Vec3::ONE;
        let max_index = IVec3::splat(field.size() - 1);
        let lo = (self.center - extent).floor().as_ivec3().max(IVec3::ZERO);
        let hi = (self.center + extent).ceil().as_ivec3().min(max_index);

        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    let p = IVec3::new(x, y, z);
                    let inside = (-self.shape.sdf(p.as_vec3() - self.center)).clamp(-1.0, 1.0);
                    let current = field.get(p)?;
                    let next = match self.blend {
                        ModifierBlend::Add if inside > current.density => {
                            current.with_density(inside).with_material(self.material)
                        }
                        ModifierBlend::Subtract if -inside < current.density => current.with_density(-inside),
                        _ => continue,
                    };
                    field.set_value(p, next)?;
                }
            }
        }
        Ok(())
    }
}

/// Apply `modifiers` in order to a throwaway field built from `config` and
/// return the resulting overrides.
pub fn bake_modifiers(config: &WorldConfig, modifiers: &[&dyn VoxelModifier]) -> Result<ChangeSet> {
    config.validate()?;
    let field = VoxelField::new(config.depth, config.generator.instantiate_or_flat());
    {
        let mut guard = field.begin_write();
        for modifier in modifiers {
            modifier.apply(&mut guard)?;
        }
    }
    let save = field.snapshot();
    log::debug!("Baked {} modifiers into {} overrides", modifiers.len(), save.len());
    Ok(save)
}
