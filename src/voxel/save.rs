//! Logical save format: overrides relative to generator defaults

use serde::ser::Error as _;
use serde::{Deserialize, Serialize};

use crate::core::types::{IVec3, Result};
use crate::voxel::voxel::{VoxelMaterial, VoxelValue};

/// Single overridden cell
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoxelOverride {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub density: f32,
    pub material: VoxelMaterial,
}

impl VoxelOverride {
    pub fn new(position: IVec3, value: VoxelValue) -> Self {
        Self {
            x: position.x,
            y: position.y,
            z: position.z,
            density: value.density,
            material: value.material,
        }
    }

    pub fn position(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    pub fn value(&self) -> VoxelValue {
        VoxelValue::new(self.density, self.material)
    }
}

/// Serializable set of overrides for a field of a given depth.
///
/// Order independent; when a position appears more than once the last entry
/// wins.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub depth: u8,
    #[serde(default)]
    pub overrides: Vec<VoxelOverride>,
}

impl ChangeSet {
    /// Empty change set
    pub fn new(depth: u8) -> Self {
        Self {
            depth,
            overrides: Vec::new(),
        }
    }

    pub fn push(&mut self, position: IVec3, value: VoxelValue) {
        self.overrides.push(VoxelOverride::new(position, value));
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Positions of every override
    pub fn positions(&self) -> impl Iterator<Item = IVec3> + '_ {
        self.overrides.iter().map(VoxelOverride::position)
    }

    /// Serialize to JSON. Non-finite densities have no JSON form and are
    /// rejected with [`Error::Serialization`](crate::core::Error::Serialization).
    pub fn to_json(&self) -> Result<String> {
        if let Some(bad) = self.overrides.iter().find(|o| !o.density.is_finite()) {
            return Err(serde_json::Error::custom(format!(
                "non-finite density {} at {:?}",
                bad.density,
                bad.position()
            ))
            .into());
        }
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
