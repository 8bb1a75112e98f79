//! Level of Detail (LOD) selection from invoker distance
//!
//! Each LOD level doubles both the chunk edge and the lattice step, so a
//! chunk at LOD `L` covers `2^L` times the extent of a LOD 0 chunk with the
//! same number of cells. LOD bands double in width as well: LOD `L` is used
//! up to `lod0_distance * 2^L` voxels from the nearest invoker.

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Configuration for LOD behavior
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Distance (in voxels) up to which LOD 0 is used
    pub lod0_distance: f32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self { lod0_distance: 64.0 }
    }
}

impl LodConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.lod0_distance.is_finite() && self.lod0_distance > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "lod0_distance must be positive, got {}",
                self.lod0_distance
            )));
        }
        Ok(())
    }

    /// Calculate LOD level from distance
    ///
    /// # Arguments
    /// * `distance` - Distance from the invoker to the chunk, in voxels
    /// * `max_lod` - Coarsest LOD the chunk graph supports
    ///
    /// # Examples
    /// ```
    /// use voxterra::streaming::lod::LodConfig;
    ///
    /// let config = LodConfig { lod0_distance: 64.0 };
    /// assert_eq!(config.lod_from_distance(32.0, 5), 0);   // Full detail
    /// assert_eq!(config.lod_from_distance(96.0, 5), 1);
    /// assert_eq!(config.lod_from_distance(200.0, 5), 2);
    /// assert_eq!(config.lod_from_distance(5000.0, 3), 3); // Clamped
    /// ```
    pub fn lod_from_distance(&self, distance: f32, max_lod: u8) -> u8 {
        let mut band = self.lod0_distance;
        for lod in 0..max_lod {
            if distance < band {
                return lod;
            }
            band *= 2.0;
        }
        max_lod
    }
}

/// Lattice step (voxels between samples) at a given LOD level
///
/// # Examples
/// ```
/// use voxterra::streaming::lod::lod_step;
///
/// assert_eq!(lod_step(0), 1);
/// assert_eq!(lod_step(3), 8);
/// ```
pub fn lod_step(lod: u8) -> i32 {
    1 << lod
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lod_from_distance() {
        let config = LodConfig::default();

        // LOD 0: 0-64
        assert_eq!(config.lod_from_distance(0.0, 5), 0);
        assert_eq!(config.lod_from_distance(63.9, 5), 0);

        // LOD 1: 64-128
        assert_eq!(config.lod_from_distance(64.0, 5), 1);
        assert_eq!(config.lod_from_distance(127.9, 5), 1);

        // LOD 2: 128-256
        assert_eq!(config.lod_from_distance(128.0, 5), 2);

        // Past the last band
        assert_eq!(config.lod_from_distance(100000.0, 5), 5);
        assert_eq!(config.lod_from_distance(f32::MAX, 5), 5);
    }

    #[test]
    fn test_max_lod_zero() {
        let config = LodConfig::default();
        assert_eq!(config.lod_from_distance(1000.0, 0), 0);
    }

    #[test]
    fn test_lod_monotonic() {
        let config = LodConfig { lod0_distance: 10.0 };
        let mut prev = 0;
        for i in 0..1000 {
            let lod = config.lod_from_distance(i as f32, 8);
            assert!(lod >= prev, "LOD should never decrease with distance");
            prev = lod;
        }
    }

    #[test]
    fn test_validate() {
        assert!(LodConfig::default().validate().is_ok());
        assert!(LodConfig { lod0_distance: 0.0 }.validate().is_err());
        assert!(LodConfig { lod0_distance: f32::NAN }.validate().is_err());
    }
}
