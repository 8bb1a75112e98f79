//! World generators: default values for never-written cells

use std::sync::Arc;

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::voxel::voxel::{VoxelMaterial, VoxelValue};

/// Source of default voxel values.
///
/// Must be pure: identical coordinates (and configuration) always give the
/// identical value. Called from worker threads, hence `Send + Sync`.
pub trait WorldGenerator: Send + Sync {
    fn generate(&self, x: i32, y: i32, z: i32) -> VoxelValue;
}

impl<F> WorldGenerator for F
where
    F: Fn(i32, i32, i32) -> VoxelValue + Send + Sync,
{
    fn generate(&self, x: i32, y: i32, z: i32) -> VoxelValue {
        self(x, y, z)
    }
}

/// Horizontal ground plane at a fixed height (Y up)
#[derive(Clone, Debug)]
pub struct FlatWorldGenerator {
    pub height: i32,
    pub material: VoxelMaterial,
}

impl FlatWorldGenerator {
    pub fn new(height: i32, material: VoxelMaterial) -> Self {
        Self { height, material }
    }
}

impl Default for FlatWorldGenerator {
    fn default() -> Self {
        Self::new(0, VoxelMaterial::DEFAULT)
    }
}

impl WorldGenerator for FlatWorldGenerator {
    fn generate(&self, _x: i32, y: i32, _z: i32) -> VoxelValue {
        // +0.5 keeps the surface between lattice points
        let density = (self.height as f32 - y as f32 + 0.5).clamp(-1.0, 1.0);
        VoxelValue::new(density, self.material)
    }
}

/// Parameters controlling heightmap terrain generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainParams {
    pub seed: u32,
    pub scale: f32,        // Horizontal scale in voxels (larger = smoother)
    pub height_scale: f32, // Vertical scale (max height above base)
    pub base_height: f32,
    pub octaves: u32,      // FBM octaves (detail levels)
    pub persistence: f32,  // FBM persistence (0.5 typical)
    pub lacunarity: f32,   // FBM lacunarity (2.0 typical)
    pub surface_material: VoxelMaterial,
    pub deep_material: VoxelMaterial,
    /// Voxels below the surface that still count as surface material
    pub surface_depth: f32,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            scale: 100.0,
            height_scale: 64.0,
            base_height: 0.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            surface_material: VoxelMaterial(1),
            deep_material: VoxelMaterial(2),
            surface_depth: 3.0,
        }
    }
}

impl TerrainParams {
    fn validate(&self) -> Result<()> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::InvalidGenerator(format!("noise scale must be positive, got {}", self.scale)));
        }
        if !self.height_scale.is_finite() || !self.base_height.is_finite() {
            return Err(Error::InvalidGenerator("noise heights must be finite".into()));
        }
        if self.octaves == 0 || self.octaves as usize > Fbm::<Perlin>::MAX_OCTAVES {
            return Err(Error::InvalidGenerator(format!("octave count {} out of range", self.octaves)));
        }
        if !(self.lacunarity.is_finite() && self.lacunarity > 0.0) || !self.persistence.is_finite() {
            return Err(Error::InvalidGenerator("fbm lacunarity/persistence must be finite and positive".into()));
        }
        Ok(())
    }
}

/// Fractal Brownian motion heightmap generator
pub struct NoiseWorldGenerator {
    params: TerrainParams,
    noise: Fbm<Perlin>,
}

impl NoiseWorldGenerator {
    /// Create a new generator, validating the parameters first
    pub fn new(params: TerrainParams) -> Result<Self> {
        params.validate()?;
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);

        Ok(Self { params, noise })
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Terrain height at grid column (x, z)
    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        let nx = (x / self.params.scale) as f64;
        let nz = (z / self.params.scale) as f64;

        // [-1, 1] -> [0, height_scale]
        let normalized = (self.noise.get([nx, nz]) + 1.0) / 2.0;
        self.params.base_height + (normalized * self.params.height_scale as f64) as f32
    }
}

impl WorldGenerator for NoiseWorldGenerator {
    fn generate(&self, x: i32, y: i32, z: i32) -> VoxelValue {
        let height = self.height_at(x as f32, z as f32);
        let depth = height - y as f32;
        let material = if depth > self.params.surface_depth {
            self.params.deep_material
        } else {
            self.params.surface_material
        };
        VoxelValue::new(depth.clamp(-1.0, 1.0), material)
    }
}

/// Serializable generator selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorConfig {
    Flat { height: i32, material: VoxelMaterial },
    Noise(TerrainParams),
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig::Flat { height: 0, material: VoxelMaterial::DEFAULT }
    }
}

impl GeneratorConfig {
    /// Build the configured generator.
    ///
    /// Fails with [`Error::InvalidGenerator`] when the parameters cannot
    /// produce a generator; callers fall back to [`FlatWorldGenerator`].
    pub fn instantiate(&self) -> Result<Arc<dyn WorldGenerator>> {
        match self {
            GeneratorConfig::Flat { height, material } => {
                Ok(Arc::new(FlatWorldGenerator::new(*height, *material)))
            }
            GeneratorConfig::Noise(params) => Ok(Arc::new(NoiseWorldGenerator::new(params.clone())?)),
        }
    }

    /// Build the configured generator, falling back to a flat world on error
    pub fn instantiate_or_flat(&self) -> Arc<dyn WorldGenerator> {
        match self.instantiate() {
            Ok(generator) => generator,
            Err(e) => {
                log::error!("{}; falling back to flat world generator", e);
                Arc::new(FlatWorldGenerator::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_generator_surface() {
        let generator = FlatWorldGenerator::new(4, VoxelMaterial(3));
        assert!(generator.generate(0, 4, 0).is_solid());
        assert!(!generator.generate(0, 5, 0).is_solid());
        assert_eq!(generator.generate(9, 0, -3).material, VoxelMaterial(3));
        assert_eq!(generator.generate(0, -100, 0).density, 1.0);
        assert_eq!(generator.generate(0, 100, 0).density, -1.0);
    }

    #[test]
    fn test_closure_generator() {
        let generator = |_x: i32, _y: i32, _z: i32| VoxelValue::SOLID;
        assert_eq!(generator.generate(1, 2, 3), VoxelValue::SOLID);
    }

    #[test]
    fn test_noise_generator_deterministic() {
        let generator = NoiseWorldGenerator::new(TerrainParams::default()).unwrap();
        let positions = [(0, 0, 0), (50, 10, 50), (100, 30, 100)];

        for (x, y, z) in positions {
            assert_eq!(generator.generate(x, y, z), generator.generate(x, y, z));
        }

        let height = generator.height_at(0.0, 0.0);
        assert!(height >= 0.0 && height <= 64.0);
    }

    #[test]
    fn test_noise_generator_different_seeds() {
        let gen1 = NoiseWorldGenerator::new(TerrainParams { seed: 1, ..Default::default() }).unwrap();
        let gen2 = NoiseWorldGenerator::new(TerrainParams { seed: 2, ..Default::default() }).unwrap();
        assert_ne!(gen1.height_at(50.0, 50.0), gen2.height_at(50.0, 50.0));
    }

    #[test]
    fn test_noise_generator_materials() {
        let generator = NoiseWorldGenerator::new(TerrainParams::default()).unwrap();
        let params = generator.params().clone();
        assert_eq!(generator.generate(0, -200, 0).material, params.deep_material);
        assert_eq!(generator.generate(0, 500, 0).material, params.surface_material);
    }

    #[test]
    fn test_invalid_noise_config() {
        let config = GeneratorConfig::Noise(TerrainParams { scale: 0.0, ..Default::default() });
        assert!(matches!(config.instantiate(), Err(Error::InvalidGenerator(_))));

        let config = GeneratorConfig::Noise(TerrainParams { octaves: 0, ..Default::default() });
        assert!(matches!(config.instantiate(), Err(Error::InvalidGenerator(_))));
    }

    #[test]
    fn test_fallback_to_flat() {
        let config = GeneratorConfig::Noise(TerrainParams { scale: -1.0, ..Default::default() });
        let generator = config.instantiate_or_flat();
        let flat = FlatWorldGenerator::default();
        for y in -3..3 {
            assert_eq!(generator.generate(7, y, 7), flat.generate(7, y, 7));
        }
    }

    #[test]
    fn test_config_json() {
        let json = r#"{"kind":"flat","height":12,"material":5}"#;
        let config: GeneratorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config, GeneratorConfig::Flat { height: 12, material: VoxelMaterial(5) });

        let json = r#"{"kind":"noise","seed":7,"octaves":3}"#;
        let config: GeneratorConfig = serde_json::from_str(json).unwrap();
        match config {
            GeneratorConfig::Noise(params) => {
                assert_eq!(params.seed, 7);
                assert_eq!(params.octaves, 3);
                assert_eq!(params.scale, 100.0);
            }
            other => panic!("unexpected config {:?}", other),
        }
    }
}
