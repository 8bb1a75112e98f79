//! Live scene: what the host should currently display

use std::collections::HashMap;
use std::sync::Arc;

use crate::mesh::ChunkMesh;
use crate::streaming::chunk_graph::ChunkId;
use crate::streaming::foliage::FoliageInstances;

/// Scene change, in the order the scheduler applied it
#[derive(Clone, Debug)]
pub enum SceneEvent {
    /// A mesh became visible, replacing any previous mesh of the same chunk
    MeshReady { id: ChunkId, mesh: Arc<ChunkMesh> },
    MeshRemoved { id: ChunkId },
    FoliageReady { id: ChunkId, foliage: Arc<FoliageInstances> },
    FoliageRemoved { id: ChunkId },
}

/// Visible meshes and foliage, keyed by chunk
#[derive(Default)]
pub struct LiveScene {
    meshes: HashMap<ChunkId, Arc<ChunkMesh>>,
    foliage: HashMap<ChunkId, Arc<FoliageInstances>>,
    events: Vec<SceneEvent>,
}

impl LiveScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a chunk mesh
    pub fn show_mesh(&mut self, id: ChunkId, mesh: Arc<ChunkMesh>) {
        self.meshes.insert(id, Arc::clone(&mesh));
        self.events.push(SceneEvent::MeshReady { id, mesh });
    }

    /// Remove a chunk mesh and its foliage
    pub fn remove_mesh(&mut self, id: ChunkId) {
        self.remove_foliage(id);
        if self.meshes.remove(&id).is_some() {
            self.events.push(SceneEvent::MeshRemoved { id });
        }
    }

    pub fn show_foliage(&mut self, id: ChunkId, foliage: Arc<FoliageInstances>) {
        self.foliage.insert(id, Arc::clone(&foliage));
        self.events.push(SceneEvent::FoliageReady { id, foliage });
    }

    pub fn remove_foliage(&mut self, id: ChunkId) {
        if self.foliage.remove(&id).is_some() {
            self.events.push(SceneEvent::FoliageRemoved { id });
        }
    }

    pub fn mesh(&self, id: ChunkId) -> Option<&Arc<ChunkMesh>> {
        self.meshes.get(&id)
    }

    pub fn foliage(&self, id: ChunkId) -> Option<&Arc<FoliageInstances>> {
        self.foliage.get(&id)
    }

    pub fn has_mesh(&self, id: ChunkId) -> bool {
        self.meshes.contains_key(&id)
    }

    pub fn has_foliage(&self, id: ChunkId) -> bool {
        self.foliage.contains_key(&id)
    }

    /// Visible meshes
    pub fn meshes(&self) -> impl Iterator<Item = (&ChunkId, &Arc<ChunkMesh>)> {
        self.meshes.iter()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn foliage_count(&self) -> usize {
        self.foliage.len()
    }

    /// Take all events since the last drain
    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }

    /// Remove everything, emitting removal events
    pub fn clear(&mut self) {
        let ids: Vec<ChunkId> = self.meshes.keys().copied().collect();
        for id in ids {
            self.remove_mesh(id);
        }
        let ids: Vec<ChunkId> = self.foliage.keys().copied().collect();
        for id in ids {
            self.remove_foliage(id);
        }
    }
}
