//! Voxel sample type

use serde::{Deserialize, Serialize};

/// Opaque material index carried alongside the density.
///
/// The core never interprets it beyond equality; hosts map it to render
/// materials or foliage palettes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoxelMaterial(pub u8);

impl VoxelMaterial {
    /// Material of never-configured cells
    pub const DEFAULT: VoxelMaterial = VoxelMaterial(0);
}

impl From<u8> for VoxelMaterial {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// Single voxel sample: signed density plus material.
///
/// `density >= 0` is solid, `density < 0` is empty; the iso-surface sits at
/// zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VoxelValue {
    pub density: f32,
    pub material: VoxelMaterial,
}

impl VoxelValue {
    /// Fully empty sample
    pub const EMPTY: VoxelValue = VoxelValue {
        density: -1.0,
        material: VoxelMaterial::DEFAULT,
    };

    /// Fully solid sample
    pub const SOLID: VoxelValue = VoxelValue {
        density: 1.0,
        material: VoxelMaterial::DEFAULT,
    };

    pub fn new(density: f32, material: VoxelMaterial) -> Self {
        Self { density, material }
    }

    /// Check if the sample is inside the surface
    pub fn is_solid(&self) -> bool {
        self.density >= 0.0
    }

    /// Copy with a different density
    pub fn with_density(self, density: f32) -> Self {
        Self { density, ..self }
    }

    /// Copy with a different material
    pub fn with_material(self, material: VoxelMaterial) -> Self {
        Self { material, ..self }
    }

    /// Bitwise comparison, so that NaN densities compare equal to themselves
    /// and `-0.0` differs from `0.0` (both are observable through `get`).
    pub fn same_as(&self, other: &VoxelValue) -> bool {
        self.density.to_bits() == other.density.to_bits() && self.material == other.material
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_threshold() {
        assert!(VoxelValue::SOLID.is_solid());
        assert!(!VoxelValue::EMPTY.is_solid());
        assert!(VoxelValue::new(0.0, VoxelMaterial::DEFAULT).is_solid());
    }

    #[test]
    fn test_with_helpers() {
        let v = VoxelValue::SOLID.with_material(VoxelMaterial(7)).with_density(-0.5);
        assert_eq!(v.material, VoxelMaterial(7));
        assert_eq!(v.density, -0.5);
    }

    #[test]
    fn test_same_as_is_bitwise() {
        let nan = VoxelValue::new(f32::NAN, VoxelMaterial(1));
        assert!(nan.same_as(&nan));
        assert_ne!(nan, nan);

        let pos = VoxelValue::new(0.0, VoxelMaterial(1));
        let neg = VoxelValue::new(-0.0, VoxelMaterial(1));
        assert!(!pos.same_as(&neg));
    }

    #[test]
    fn test_material_serializes_as_integer() {
        let json = serde_json::to_string(&VoxelMaterial(42)).unwrap();
        assert_eq!(json, "42");
    }
}
