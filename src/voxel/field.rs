//! VoxelField - bounded octree store with scoped concurrent access.
//!
//! Readers and writers go through RAII guards over one `RwLock`: any number
//! of [`FieldReadGuard`]s may overlap, a [`FieldWriteGuard`] is exclusive.
//! Writes record dirty positions which the scheduler drains on its owning
//! thread with [`VoxelField::take_dirty_positions`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::error::Error;
use crate::core::types::{IVec3, Result};
use crate::math::morton_key;
use crate::voxel::generator::WorldGenerator;
use crate::voxel::octree::Octree;
use crate::voxel::save::{ChangeSet, VoxelOverride};
use crate::voxel::voxel::{VoxelMaterial, VoxelValue};

/// Sparse voxel store over the cube `[0, 2^depth)^3`
pub struct VoxelField {
    depth: u8,
    size: i32,
    generator: Arc<dyn WorldGenerator>,
    octree: RwLock<Octree>,
    dirty: Mutex<Vec<IVec3>>,
}

impl VoxelField {
    /// Create an empty field; every cell reads as the generator default
    pub fn new(depth: u8, generator: Arc<dyn WorldGenerator>) -> Self {
        Self {
            depth,
            size: 1 << depth,
            generator,
            octree: RwLock::new(Octree::new(depth)),
            dirty: Mutex::new(Vec::new()),
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Edge length in cells
    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn generator(&self) -> &Arc<dyn WorldGenerator> {
        &self.generator
    }

    pub fn is_in_bounds(&self, p: IVec3) -> bool {
        p.cmpge(IVec3::ZERO).all() && p.cmplt(IVec3::splat(self.size)).all()
    }

    fn check_bounds(&self, p: IVec3) -> Result<()> {
        if self.is_in_bounds(p) {
            Ok(())
        } else {
            Err(Error::OutOfBounds {
                position: p,
                size: self.size,
            })
        }
    }

    fn generate(&self, p: IVec3) -> VoxelValue {
        self.generator.generate(p.x, p.y, p.z)
    }

    /// Acquire shared read access
    pub fn begin_read(&self) -> FieldReadGuard<'_> {
        FieldReadGuard {
            field: self,
            octree: self.octree.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Acquire exclusive write access
    pub fn begin_write(&self) -> FieldWriteGuard<'_> {
        FieldWriteGuard {
            field: self,
            octree: self.octree.write().unwrap_or_else(PoisonError::into_inner),
            dirty: Vec::new(),
        }
    }

    /// Read one cell under a short-lived read guard
    pub fn get(&self, p: IVec3) -> Result<VoxelValue> {
        self.begin_read().get(p)
    }

    /// Write one cell under a short-lived write guard
    pub fn set_value(&self, p: IVec3, value: VoxelValue) -> Result<()> {
        self.begin_write().set_value(p, value)
    }

    pub fn set_density(&self, p: IVec3, density: f32) -> Result<()> {
        self.begin_write().set_density(p, density)
    }

    pub fn set_material(&self, p: IVec3, material: VoxelMaterial) -> Result<()> {
        self.begin_write().set_material(p, material)
    }

    /// Drain positions written since the last call
    pub fn take_dirty_positions(&self) -> Vec<IVec3> {
        std::mem::take(&mut *self.dirty.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push_dirty(&self, positions: impl IntoIterator<Item = IVec3>) {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(positions);
    }

    /// All overrides, sorted along the Z-order curve
    pub fn snapshot(&self) -> ChangeSet {
        let guard = self.begin_read();
        let mut overrides = Vec::with_capacity(guard.octree.written_count());
        guard
            .octree
            .for_each_written(|p, value| overrides.push(VoxelOverride::new(p, value)));
        overrides.sort_by_key(|o| morton_key(o.position()));

        ChangeSet {
            depth: self.depth,
            overrides,
        }
    }

    /// Apply a change set.
    ///
    /// The whole change set is validated before anything is touched. With
    /// `reset_existing` the field is first cleared back to generator defaults.
    /// Returns exactly the positions whose value differs before and after.
    pub fn restore(&self, changes: &ChangeSet, reset_existing: bool) -> Result<HashSet<IVec3>> {
        if changes.depth != self.depth {
            return Err(Error::DepthMismatch {
                expected: self.depth,
                found: changes.depth,
            });
        }
        for o in &changes.overrides {
            self.check_bounds(o.position())?;
        }

        let mut guard = self.begin_write();
        let mut before: HashMap<IVec3, VoxelValue> = HashMap::new();

        if reset_existing {
            guard.octree.for_each_written(|p, value| {
                before.insert(p, value);
            });
            guard.octree.clear();
        }

        for o in &changes.overrides {
            let p = o.position();
            if !before.contains_key(&p) {
                let current = guard.value_at(p);
                before.insert(p, current);
            }
            guard.octree.set(p, o.value());
        }

        let changed: HashSet<IVec3> = before
            .into_iter()
            .filter(|(p, old)| !old.same_as(&guard.value_at(*p)))
            .map(|(p, _)| p)
            .collect();

        guard.dirty.extend(changed.iter().copied());
        log::debug!(
            "Restored {} overrides (reset: {}), {} cells changed",
            changes.len(),
            reset_existing,
            changed.len()
        );
        Ok(changed)
    }

    /// Reset every cell to its generator default
    pub fn clear(&self) -> HashSet<IVec3> {
        let empty = ChangeSet::new(self.depth);
        // Depth matches and there are no overrides, so this cannot fail
        self.restore(&empty, true).unwrap_or_default()
    }

    /// Number of written cells
    pub fn override_count(&self) -> usize {
        self.begin_read().octree.written_count()
    }

    /// Approximate heap usage of the octree in bytes
    pub fn memory_usage(&self) -> usize {
        self.begin_read().octree.memory_usage()
    }
}

/// Shared, scoped read access to a [`VoxelField`]
pub struct FieldReadGuard<'a> {
    field: &'a VoxelField,
    octree: RwLockReadGuard<'a, Octree>,
}

impl FieldReadGuard<'_> {
    /// In-bounds read
    pub fn get(&self, p: IVec3) -> Result<VoxelValue> {
        self.field.check_bounds(p)?;
        Ok(self.octree.get(p).unwrap_or_else(|| self.field.generate(p)))
    }

    /// Read that falls back to the generator outside the field
    pub fn get_or_generate(&self, p: IVec3) -> VoxelValue {
        if self.field.is_in_bounds(p) {
            if let Some(value) = self.octree.get(p) {
                return value;
            }
        }
        self.field.generate(p)
    }

    pub fn size(&self) -> i32 {
        self.field.size
    }

    pub fn is_in_bounds(&self, p: IVec3) -> bool {
        self.field.is_in_bounds(p)
    }
}

/// Exclusive, scoped write access to a [`VoxelField`].
///
/// Dirty positions are published when the guard is dropped.
pub struct FieldWriteGuard<'a> {
    field: &'a VoxelField,
    octree: RwLockWriteGuard<'a, Octree>,
    dirty: Vec<IVec3>,
}

impl FieldWriteGuard<'_> {
    fn value_at(&self, p: IVec3) -> VoxelValue {
        self.octree.get(p).unwrap_or_else(|| self.field.generate(p))
    }

    pub fn get(&self, p: IVec3) -> Result<VoxelValue> {
        self.field.check_bounds(p)?;
        Ok(self.value_at(p))
    }

    pub fn set_value(&mut self, p: IVec3, value: VoxelValue) -> Result<()> {
        self.field.check_bounds(p)?;
        self.octree.set(p, value);
        self.dirty.push(p);
        Ok(())
    }

    pub fn set_density(&mut self, p: IVec3, density: f32) -> Result<()> {
        let current = self.get(p)?;
        self.set_value(p, current.with_density(density))
    }

    pub fn set_material(&mut self, p: IVec3, material: VoxelMaterial) -> Result<()> {
        let current = self.get(p)?;
        self.set_value(p, current.with_material(material))
    }

    pub fn size(&self) -> i32 {
        self.field.size
    }
}

impl Drop for FieldWriteGuard<'_> {
    fn drop(&mut self) {
        if !self.dirty.is_empty() {
            self.field.push_dirty(self.dirty.drain(..));
        }
    }
}
