//! MeshScheduler - decides which chunks to mesh at which LOD, runs the
//! meshing and foliage pools, and applies finished work to the live scene.
//!
//! All scheduler state is owned by one thread (the one calling [`tick`]).
//! Workers only take scoped reads of the field and report back through the
//! pools' completion channels. Every queued job carries a generation number;
//! bumping a chunk's generation cancels whatever is in flight for it.
//!
//! [`tick`]: MeshScheduler::tick

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::WorldConfig;
use crate::core::types::{IVec3, Result};
use crate::core::Error;
use crate::math::WorldTransform;
use crate::mesh::{build_chunk_mesh, ChunkMesh, NeighborLods, MESH_MARGIN};
use crate::streaming::chunk_graph::{ChunkGraph, ChunkId};
use crate::streaming::foliage::{scatter_foliage, FoliageConfig, FoliageInstances};
use crate::streaming::invoker::{Invoker, InvokerId, InvokerSnapshot, InvokerSource};
use crate::streaming::lod::LodConfig;
use crate::streaming::priority::{ChunkPriority, ChunkPriorityQueue};
use crate::streaming::scene::{LiveScene, SceneEvent};
use crate::streaming::worker_pool::WorkerPool;
use crate::voxel::VoxelField;

/// Lifecycle of a chunk in the scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkState {
    /// No entry; nothing visible
    Unloaded,
    /// Waiting in the priority queue
    QueuedForMesh,
    /// Job running on a mesh worker
    Meshing,
    /// Mesh visible and up to date
    Ready,
    /// Mesh visible but outdated; re-queued on the next pass
    Stale,
    /// Superseded or out of range; removed once the deletion delay elapses
    PendingDeletion { since: Duration },
}

/// Snapshot of scheduler counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub desired: usize,
    pub queued: usize,
    pub meshing: usize,
    pub ready: usize,
    pub stale: usize,
    pub pending_deletion: usize,
    pub mesh_jobs_in_flight: usize,
    pub foliage_jobs_in_flight: usize,
    pub meshes_completed: u64,
    pub meshes_discarded: u64,
    pub meshes_failed: u64,
    pub foliage_completed: u64,
}

enum MeshCompletion {
    Meshed { id: ChunkId, generation: u32, mesh: ChunkMesh },
    Cancelled { id: ChunkId, generation: u32 },
    Failed { id: ChunkId, generation: u32, message: String },
}

enum FoliageCompletion {
    Placed { id: ChunkId, generation: u32, foliage: FoliageInstances },
    Cancelled { id: ChunkId, generation: u32 },
    Failed { id: ChunkId, generation: u32, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FoliageSlot {
    Empty,
    /// Job running for the given mesh generation
    Running(u32),
    Placed,
}

struct ChunkEntry {
    state: ChunkState,
    /// Shared with in-flight jobs
    generation: Arc<AtomicU32>,
    /// Part of the current desired cut
    desired: bool,
    /// Field changed since the last mesh was queued
    dirty: bool,
    /// Layout the queued / current mesh is stitched against
    neighbor_lods: NeighborLods,
    foliage: FoliageSlot,
}

impl ChunkEntry {
    fn new(lod: u8) -> Self {
        Self {
            state: ChunkState::Unloaded,
            generation: Arc::new(AtomicU32::new(0)),
            desired: false,
            dirty: false,
            neighbor_lods: NeighborLods::uniform(lod),
            foliage: FoliageSlot::Empty,
        }
    }

    fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    fn is_pending_mesh(&self) -> bool {
        matches!(self.state, ChunkState::QueuedForMesh | ChunkState::Meshing)
    }
}

/// Streaming LOD scheduler over one [`VoxelField`]
pub struct MeshScheduler {
    field: Arc<VoxelField>,
    graph: ChunkGraph,
    transform: WorldTransform,
    lod_config: LodConfig,
    foliage_config: FoliageConfig,
    compute_transitions: bool,
    deletion_delay: Duration,
    lod_update_interval: Duration,
    foliage_update_interval: Duration,

    invokers: Vec<Invoker>,
    invoker_snapshots: Vec<InvokerSnapshot>,
    next_invoker_id: u64,

    entries: HashMap<ChunkId, ChunkEntry>,
    desired: HashSet<ChunkId>,
    queue: ChunkPriorityQueue,
    next_generation: u32,

    mesh_pool: WorkerPool<MeshCompletion>,
    foliage_pool: WorkerPool<FoliageCompletion>,
    scene: LiveScene,

    now: Duration,
    lod_timer: Duration,
    foliage_timer: Duration,
    lod_pass_requested: bool,

    meshes_completed: u64,
    meshes_discarded: u64,
    meshes_failed: u64,
    foliage_completed: u64,
    shut_down: bool,
}

impl MeshScheduler {
    /// Create a scheduler and start its worker pools
    pub fn new(field: Arc<VoxelField>, config: &WorldConfig) -> Result<Self> {
        if field.depth() != config.depth {
            return Err(Error::InvalidConfig(format!(
                "field depth {} does not match configured depth {}",
                field.depth(),
                config.depth
            )));
        }

        let mesh_pool = WorkerPool::new("voxel-mesh", config.mesh_thread_count)?;
        let foliage_pool = WorkerPool::new("voxel-foliage", config.foliage_thread_count)?;

        Ok(Self {
            graph: ChunkGraph::new(field.depth()),
            field,
            transform: config.transform(),
            lod_config: config.lod.clone(),
            foliage_config: config.foliage.clone(),
            compute_transitions: config.compute_transitions,
            deletion_delay: config.deletion_delay(),
            lod_update_interval: config.lod_update_interval(),
            foliage_update_interval: config.foliage_update_interval(),
            invokers: Vec::new(),
            invoker_snapshots: Vec::new(),
            next_invoker_id: 0,
            entries: HashMap::new(),
            desired: HashSet::new(),
            queue: ChunkPriorityQueue::new(),
            next_generation: 0,
            mesh_pool,
            foliage_pool,
            scene: LiveScene::new(),
            now: Duration::ZERO,
            lod_timer: Duration::ZERO,
            foliage_timer: Duration::ZERO,
            lod_pass_requested: false,
            meshes_completed: 0,
            meshes_discarded: 0,
            meshes_failed: 0,
            foliage_completed: 0,
            shut_down: false,
        })
    }

    pub fn graph(&self) -> &ChunkGraph {
        &self.graph
    }

    pub fn scene(&self) -> &LiveScene {
        &self.scene
    }

    /// Scene changes since the last call, in application order
    pub fn drain_scene_events(&mut self) -> Vec<SceneEvent> {
        self.scene.drain_events()
    }

    /// Scheduler clock (sum of all `tick` deltas)
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Register an invoker. Positions are polled on every LOD pass.
    pub fn add_invoker(
        &mut self,
        source: &Arc<dyn InvokerSource>,
        mesh_radius: f32,
        foliage_radius: f32,
        priority: i32,
    ) -> InvokerId {
        let id = InvokerId(self.next_invoker_id);
        self.next_invoker_id += 1;
        self.invokers.push(Invoker::new(id, source, mesh_radius, foliage_radius, priority));
        self.lod_pass_requested = true;
        log::debug!("Added invoker {:?} (mesh radius {}, foliage radius {})", id, mesh_radius, foliage_radius);
        id
    }

    pub fn remove_invoker(&mut self, id: InvokerId) -> bool {
        let before = self.invokers.len();
        self.invokers.retain(|invoker| invoker.id != id);
        let removed = self.invokers.len() != before;
        if removed {
            self.lod_pass_requested = true;
        }
        removed
    }

    pub fn invoker_count(&self) -> usize {
        self.invokers.len()
    }

    pub fn chunk_state(&self, id: ChunkId) -> ChunkState {
        self.entries.get(&id).map_or(ChunkState::Unloaded, |entry| entry.state)
    }

    /// Chunks of the current desired LOD cut
    pub fn desired_chunks(&self) -> impl Iterator<Item = &ChunkId> {
        self.desired.iter()
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            desired: self.desired.len(),
            mesh_jobs_in_flight: self.mesh_pool.in_flight(),
            foliage_jobs_in_flight: self.foliage_pool.in_flight(),
            meshes_completed: self.meshes_completed,
            meshes_discarded: self.meshes_discarded,
            meshes_failed: self.meshes_failed,
            foliage_completed: self.foliage_completed,
            ..Default::default()
        };
        for entry in self.entries.values() {
            match entry.state {
                ChunkState::Unloaded => {}
                ChunkState::QueuedForMesh => stats.queued += 1,
                ChunkState::Meshing => stats.meshing += 1,
                ChunkState::Ready => stats.ready += 1,
                ChunkState::Stale => stats.stale += 1,
                ChunkState::PendingDeletion { .. } => stats.pending_deletion += 1,
            }
        }
        stats
    }

    /// Advance the scheduler clock and do one round of work (non-blocking)
    pub fn tick(&mut self, dt: Duration) {
        if self.shut_down {
            return;
        }
        self.now += dt;
        self.lod_timer += dt;
        self.foliage_timer += dt;

        self.process_dirty();
        if self.lod_pass_requested || self.lod_timer >= self.lod_update_interval {
            self.lod_timer = Duration::ZERO;
            self.update_desired();
        }
        self.queue_stale();
        self.dispatch_mesh_jobs();
        while let Some(completion) = self.mesh_pool.try_recv() {
            self.apply_mesh_completion(completion);
        }
        self.retire_superseded();
        self.delete_expired();

        if self.foliage_timer >= self.foliage_update_interval {
            self.foliage_timer = Duration::ZERO;
            self.update_foliage();
        }
        while let Some(completion) = self.foliage_pool.try_recv() {
            self.apply_foliage_completion(completion);
        }
    }

    /// Force re-meshing of every desired chunk whose sampled region contains
    /// `pos`. With `async_update == false`, blocks until they are Ready.
    pub fn update_chunks_at_position(&mut self, pos: IVec3, async_update: bool) {
        if self.shut_down {
            return;
        }
        self.process_dirty();

        let targets: Vec<ChunkId> = self
            .graph
            .chunks_touching(pos, MESH_MARGIN)
            .into_iter()
            .filter(|id| self.entries.get(id).is_some_and(|entry| entry.desired))
            .collect();
        for &id in &targets {
            self.force_remesh(id);
        }
        log::trace!("Update at {:?}: {} chunks re-queued", pos, targets.len());

        if async_update {
            self.dispatch_mesh_jobs();
        } else {
            self.wait_for(&targets);
        }
    }

    /// Re-mesh every desired chunk
    pub fn update_all(&mut self, async_update: bool) {
        if self.shut_down {
            return;
        }
        self.process_dirty();
        let ids: Vec<ChunkId> = self.desired.iter().copied().collect();
        for id in ids {
            self.force_remesh(id);
        }
        if async_update {
            self.dispatch_mesh_jobs();
        } else {
            self.apply_updates();
        }
    }

    /// Dispatch everything queued and block until no mesh job is in flight.
    /// Returns immediately when nothing is pending.
    pub fn apply_updates(&mut self) {
        if self.shut_down {
            return;
        }
        self.process_dirty();
        if self.lod_pass_requested {
            self.update_desired();
        }
        self.queue_stale();

        loop {
            self.dispatch_mesh_jobs();
            match self.mesh_pool.recv_blocking() {
                Some(completion) => self.apply_mesh_completion(completion),
                None => break,
            }
        }
        self.retire_superseded();
    }

    /// LOD of the chunk covering `pos`: visible chunks first, finest wins
    pub fn get_depth_at(&self, pos: IVec3) -> Result<u8> {
        if !self.field.is_in_bounds(pos) {
            return Err(Error::OutOfBounds {
                position: pos,
                size: self.field.size(),
            });
        }
        let mut scheduled = None;
        for lod in 0..=self.graph.max_lod() {
            let Some(id) = self.graph.chunk_at(pos, lod) else {
                continue;
            };
            if self.scene.has_mesh(id) {
                return Ok(lod);
            }
            if self.entries.contains_key(&id) && scheduled.is_none() {
                scheduled = Some(lod);
            }
        }
        scheduled.ok_or(Error::NotFound(pos))
    }

    /// Cancel all work, wait for workers to drop their field reads and clear
    /// the scene. Further calls are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.queue.clear();
        for entry in self.entries.values() {
            entry.generation.store(u32::MAX, Ordering::Release);
        }
        while self.mesh_pool.recv_blocking().is_some() {}
        while self.foliage_pool.recv_blocking().is_some() {}

        self.entries.clear();
        self.desired.clear();
        self.invokers.clear();
        self.invoker_snapshots.clear();
        self.scene.clear();
        log::debug!(
            "Mesh scheduler shut down ({} and {} pools drained)",
            self.mesh_pool.name(),
            self.foliage_pool.name()
        );
    }

    fn next_generation(&mut self) -> u32 {
        self.next_generation = self.next_generation.wrapping_add(1);
        self.next_generation
    }

    /// Map field writes to the chunks that sample them
    fn process_dirty(&mut self) {
        let positions = self.field.take_dirty_positions();
        if positions.is_empty() {
            return;
        }

        let mut touched = HashSet::new();
        for p in &positions {
            for id in self.graph.chunks_touching(*p, MESH_MARGIN) {
                if self.entries.contains_key(&id) {
                    touched.insert(id);
                }
            }
        }
        log::trace!("{} dirty positions touch {} chunks", positions.len(), touched.len());

        for id in touched {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            entry.dirty = true;
            match entry.state {
                ChunkState::Ready if entry.desired => entry.state = ChunkState::Stale,
                // The running job may already have sampled the old data
                ChunkState::Meshing if entry.desired => self.enqueue(id),
                _ => {}
            }
        }
    }

    /// Queue a re-mesh regardless of the chunk's current state
    fn force_remesh(&mut self, id: ChunkId) {
        match self.chunk_state(id) {
            ChunkState::Ready | ChunkState::Stale | ChunkState::Meshing => self.enqueue(id),
            _ => {}
        }
    }

    /// Bump the generation and push the chunk onto the queue
    fn enqueue(&mut self, id: ChunkId) {
        let neighbor_lods = self.neighbor_lods(id);
        let generation = self.next_generation();
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.generation.store(generation, Ordering::Release);
        entry.state = ChunkState::QueuedForMesh;
        entry.dirty = false;
        entry.neighbor_lods = neighbor_lods;
        self.queue
            .push(ChunkPriority::calculate(&self.graph, id, generation, &self.invoker_snapshots));
    }

    fn queue_stale(&mut self) {
        let stale: Vec<ChunkId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == ChunkState::Stale && entry.desired)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.enqueue(id);
        }
    }

    /// LOD of the desired chunk covering a same-size neighbour region,
    /// walking up through coarser ancestors
    fn covering_lod(&self, region: ChunkId) -> Option<u8> {
        let mut current = Some(region);
        while let Some(id) = current {
            if self.desired.contains(&id) {
                return Some(id.lod);
            }
            current = self.graph.parent(id);
        }
        None
    }

    fn neighbor_lods(&self, id: ChunkId) -> NeighborLods {
        let mut lods = NeighborLods::uniform(id.lod);
        for z in -1..=1 {
            for y in -1..=1 {
                for x in -1..=1 {
                    let offset = IVec3::new(x, y, z);
                    if offset == IVec3::ZERO {
                        continue;
                    }
                    let lod = self
                        .graph
                        .neighbor(id, offset)
                        .map(|n| self.covering_lod(n).map_or(id.lod, |l| l.max(id.lod)));
                    lods.set(offset, lod);
                }
            }
        }
        lods
    }

    /// Recompute the desired cut from the current invoker positions
    fn update_desired(&mut self) {
        self.lod_pass_requested = false;

        let before = self.invokers.len();
        self.invokers.retain(Invoker::is_alive);
        if self.invokers.len() != before {
            log::debug!("Pruned {} dropped invokers", before - self.invokers.len());
        }
        self.invoker_snapshots = self
            .invokers
            .iter()
            .filter_map(|invoker| invoker.snapshot(&self.transform))
            .collect();

        let mut desired = HashSet::new();
        self.collect_desired(self.graph.root(), &mut desired);
        let previous = std::mem::replace(&mut self.desired, desired);

        for id in previous.difference(&self.desired).copied().collect::<Vec<_>>() {
            self.release(id);
        }
        // Requests run after the whole cut is known so layouts are final
        let mut ids: Vec<ChunkId> = self.desired.iter().copied().collect();
        ids.sort_by_key(|id| (id.lod, id.coord.x, id.coord.y, id.coord.z));
        for id in ids {
            self.request(id);
        }

        log::trace!(
            "LOD pass: {} invokers, {} desired chunks, {} entries",
            self.invoker_snapshots.len(),
            self.desired.len(),
            self.entries.len()
        );
    }

    fn collect_desired(&self, id: ChunkId, out: &mut HashSet<ChunkId>) {
        let bounds = self.graph.bounds(id);
        let max_lod = self.graph.max_lod();
        let mut finest: Option<u8> = None;

        for invoker in &self.invoker_snapshots {
            let distance = bounds.distance_to_point(invoker.position);
            if distance <= invoker.mesh_radius {
                let lod = self.lod_config.lod_from_distance(distance, max_lod);
                finest = Some(finest.map_or(lod, |f| f.min(lod)));
            }
        }

        let Some(finest) = finest else {
            return;
        };
        if finest < id.lod {
            if let Some(children) = self.graph.children(id) {
                for child in children {
                    self.collect_desired(child, out);
                }
                return;
            }
        }
        out.insert(id);
    }

    /// A chunk entered (or stayed in) the desired cut
    fn request(&mut self, id: ChunkId) {
        let layout = self.neighbor_lods(id);
        let lod = id.lod;
        let entry = self.entries.entry(id).or_insert_with(|| ChunkEntry::new(lod));
        entry.desired = true;
        let layout_changed = self.compute_transitions && layout != entry.neighbor_lods;

        match entry.state {
            ChunkState::Unloaded => self.enqueue(id),
            ChunkState::PendingDeletion { .. } => {
                if entry.dirty || layout_changed {
                    self.enqueue(id);
                } else {
                    entry.state = ChunkState::Ready;
                }
            }
            // A chunk released while stale is Ready again but still dirty
            ChunkState::Ready if entry.dirty || layout_changed => entry.state = ChunkState::Stale,
            // Layout is read at dispatch time
            ChunkState::QueuedForMesh => entry.neighbor_lods = layout,
            ChunkState::Meshing if layout_changed => self.enqueue(id),
            _ => {}
        }
    }

    /// A chunk left the desired cut
    fn release(&mut self, id: ChunkId) {
        let generation = self.next_generation();
        let visible = self.scene.has_mesh(id);
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.desired = false;

        match entry.state {
            ChunkState::QueuedForMesh | ChunkState::Meshing | ChunkState::Stale => {
                // Cancel the job; keep showing the old mesh until superseded
                entry.generation.store(generation, Ordering::Release);
                if visible {
                    entry.state = ChunkState::Ready;
                } else {
                    self.entries.remove(&id);
                }
            }
            ChunkState::Unloaded => {
                self.entries.remove(&id);
            }
            ChunkState::Ready | ChunkState::PendingDeletion { .. } => {}
        }
    }

    fn dispatch_mesh_jobs(&mut self) {
        let capacity = 2 * self.mesh_pool.thread_count();
        while self.mesh_pool.in_flight() < capacity {
            let Some(item) = self.queue.pop() else {
                break;
            };
            let Some(entry) = self.entries.get_mut(&item.id) else {
                continue;
            };
            if entry.state != ChunkState::QueuedForMesh || entry.generation() != item.generation {
                continue;
            }
            entry.state = ChunkState::Meshing;

            let id = item.id;
            let generation = item.generation;
            let counter = Arc::clone(&entry.generation);
            let neighbors = entry.neighbor_lods;
            let field = Arc::clone(&self.field);
            let graph = self.graph;
            let compute_transitions = self.compute_transitions;

            self.mesh_pool.spawn(
                move || {
                    if counter.load(Ordering::Acquire) != generation {
                        return MeshCompletion::Cancelled { id, generation };
                    }
                    let mesh = {
                        let guard = field.begin_read();
                        build_chunk_mesh(&guard, &graph, id, &neighbors, compute_transitions)
                    };
                    if counter.load(Ordering::Acquire) != generation {
                        return MeshCompletion::Cancelled { id, generation };
                    }
                    MeshCompletion::Meshed { id, generation, mesh }
                },
                move |message| MeshCompletion::Failed { id, generation, message },
            );
        }
    }

    fn apply_mesh_completion(&mut self, completion: MeshCompletion) {
        match completion {
            MeshCompletion::Meshed { id, generation, mesh } => {
                let current = self
                    .entries
                    .get_mut(&id)
                    .filter(|entry| entry.state == ChunkState::Meshing && entry.generation() == generation);
                let Some(entry) = current else {
                    self.meshes_discarded += 1;
                    log::trace!("Discarded stale mesh for {:?} (generation {})", id, generation);
                    return;
                };
                entry.state = ChunkState::Ready;
                entry.foliage = FoliageSlot::Empty;
                self.meshes_completed += 1;
                self.scene.remove_foliage(id);
                self.scene.show_mesh(id, Arc::new(mesh));
            }
            MeshCompletion::Cancelled { id, generation } => {
                self.meshes_discarded += 1;
                log::trace!("Mesh job for {:?} cancelled (generation {})", id, generation);
            }
            MeshCompletion::Failed { id, generation, message } => {
                self.meshes_failed += 1;
                log::error!("Mesh job for {:?} failed: {}", id, message);
                let Some(entry) = self.entries.get_mut(&id) else {
                    return;
                };
                if entry.state != ChunkState::Meshing || entry.generation() != generation {
                    return;
                }
                // Not retried; an empty mesh keeps the layout consistent
                entry.state = ChunkState::Ready;
                if !self.scene.has_mesh(id) {
                    let empty = ChunkMesh {
                        lod: id.lod,
                        ..Default::default()
                    };
                    self.scene.show_mesh(id, Arc::new(empty));
                }
            }
        }
    }

    /// Whether every desired chunk overlapping `id` is Ready
    fn replacements_ready(&self, id: ChunkId) -> bool {
        self.desired
            .iter()
            .filter(|d| self.graph.overlaps(**d, id))
            .all(|d| self.chunk_state(*d) == ChunkState::Ready)
    }

    /// Move superseded Ready chunks to PendingDeletion
    fn retire_superseded(&mut self) {
        let candidates: Vec<ChunkId> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.desired && entry.state == ChunkState::Ready)
            .map(|(id, _)| *id)
            .collect();

        for id in candidates {
            if self.replacements_ready(id) {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.state = ChunkState::PendingDeletion { since: self.now };
                    log::trace!("Chunk {:?} pending deletion", id);
                }
            }
        }
    }

    fn delete_expired(&mut self) {
        let now = self.now;
        let delay = self.deletion_delay;
        let expired: Vec<ChunkId> = self
            .entries
            .iter()
            .filter(|(_, entry)| match entry.state {
                ChunkState::PendingDeletion { since } => now.saturating_sub(since) >= delay,
                _ => false,
            })
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(entry) = self.entries.remove(&id) {
                entry.generation.store(u32::MAX, Ordering::Release);
            }
            self.scene.remove_mesh(id);
        }
    }

    fn in_foliage_range(&self, id: ChunkId) -> bool {
        self.invoker_snapshots
            .iter()
            .any(|invoker| self.graph.distance_to(id, invoker.position) <= invoker.foliage_radius)
    }

    /// Schedule foliage for Ready chunks in range, drop it for the rest
    fn update_foliage(&mut self) {
        let capacity = 2 * self.foliage_pool.thread_count();
        let ids: Vec<ChunkId> = self.entries.keys().copied().collect();

        for id in ids {
            let wanted = self
                .entries
                .get(&id)
                .is_some_and(|entry| entry.desired && entry.state == ChunkState::Ready)
                && self.in_foliage_range(id);

            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            if !wanted {
                // Superseded chunks keep their foliage until removed
                let retiring = matches!(entry.state, ChunkState::PendingDeletion { .. });
                if entry.foliage != FoliageSlot::Empty && !retiring {
                    entry.foliage = FoliageSlot::Empty;
                    self.scene.remove_foliage(id);
                }
                continue;
            }
            if entry.foliage != FoliageSlot::Empty || self.foliage_pool.in_flight() >= capacity {
                continue;
            }
            let Some(mesh) = self.scene.mesh(id).filter(|mesh| !mesh.is_empty()).cloned() else {
                continue;
            };

            let generation = entry.generation();
            entry.foliage = FoliageSlot::Running(generation);
            let counter = Arc::clone(&entry.generation);
            let config = self.foliage_config.clone();

            self.foliage_pool.spawn(
                move || {
                    if counter.load(Ordering::Acquire) != generation {
                        return FoliageCompletion::Cancelled { id, generation };
                    }
                    let foliage = scatter_foliage(id, &mesh, &config);
                    if counter.load(Ordering::Acquire) != generation {
                        return FoliageCompletion::Cancelled { id, generation };
                    }
                    FoliageCompletion::Placed { id, generation, foliage }
                },
                move |message| FoliageCompletion::Failed { id, generation, message },
            );
        }
    }

    fn apply_foliage_completion(&mut self, completion: FoliageCompletion) {
        match completion {
            FoliageCompletion::Placed { id, generation, foliage } => {
                let Some(entry) = self.entries.get_mut(&id) else {
                    return;
                };
                if entry.foliage != FoliageSlot::Running(generation) || entry.generation() != generation {
                    log::trace!("Discarded stale foliage for {:?}", id);
                    return;
                }
                entry.foliage = FoliageSlot::Placed;
                self.foliage_completed += 1;
                self.scene.show_foliage(id, Arc::new(foliage));
            }
            FoliageCompletion::Cancelled { id, .. } => {
                log::trace!("Foliage job for {:?} cancelled", id);
            }
            FoliageCompletion::Failed { id, generation, message } => {
                log::error!("Foliage job for {:?} failed: {}", id, message);
                if let Some(entry) = self.entries.get_mut(&id) {
                    if entry.foliage == FoliageSlot::Running(generation) {
                        // Not retried for this mesh
                        entry.foliage = FoliageSlot::Placed;
                    }
                }
            }
        }
    }

    /// Block until none of `targets` is queued or meshing
    fn wait_for(&mut self, targets: &[ChunkId]) {
        loop {
            self.dispatch_mesh_jobs();
            let pending = targets
                .iter()
                .any(|id| self.entries.get(id).is_some_and(ChunkEntry::is_pending_mesh));
            if !pending {
                break;
            }
            match self.mesh_pool.recv_blocking() {
                Some(completion) => self.apply_mesh_completion(completion),
                None => break,
            }
        }
        self.retire_superseded();
    }
}

impl Drop for MeshScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;
    use crate::streaming::invoker::PointInvoker;
    use crate::voxel::{FlatWorldGenerator, VoxelMaterial};
    use std::thread;

    const SURFACE: i32 = 20;

    fn test_config() -> WorldConfig {
        WorldConfig {
            depth: 6,
            voxel_size: 1.0,
            deletion_delay_secs: 0.1,
            mesh_thread_count: 2,
            foliage_thread_count: 1,
            lod: LodConfig { lod0_distance: 16.0 },
            ..Default::default()
        }
    }

    fn flat_field() -> Arc<VoxelField> {
        Arc::new(VoxelField::new(6, Arc::new(FlatWorldGenerator::new(SURFACE, VoxelMaterial(1)))))
    }

    struct Harness {
        scheduler: MeshScheduler,
        field: Arc<VoxelField>,
        point: Arc<PointInvoker>,
        source: Arc<dyn InvokerSource>,
    }

    fn harness(position: Vec3) -> Harness {
        let field = flat_field();
        let mut scheduler = MeshScheduler::new(Arc::clone(&field), &test_config()).unwrap();
        let point = Arc::new(PointInvoker::new(position));
        let source: Arc<dyn InvokerSource> = point.clone();
        scheduler.add_invoker(&source, 100_000.0, 100_000.0, 0);
        Harness { scheduler, field, point, source }
    }

    fn settle(h: &mut Harness) {
        h.scheduler.tick(Duration::from_millis(1));
        h.scheduler.apply_updates();
    }

    #[test]
    fn test_new_rejects_depth_mismatch() {
        let config = WorldConfig { depth: 7, ..test_config() };
        assert!(matches!(MeshScheduler::new(flat_field(), &config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_invoker_meshes_desired_cut() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);

        let stats = h.scheduler.stats();
        assert!(stats.desired > 0);
        assert_eq!(stats.ready, stats.desired);
        assert_eq!(stats.mesh_jobs_in_flight, 0);
        assert_eq!(h.scheduler.scene().mesh_count(), stats.desired);

        // Invoker sits in the finest chunk
        let near = ChunkId::new(0, IVec3::new(0, 1, 0));
        assert_eq!(h.scheduler.chunk_state(near), ChunkState::Ready);
        let mesh = h.scheduler.scene().mesh(near).unwrap();
        assert!(!mesh.is_empty());
        assert!(mesh.positions.iter().all(|p| (p.y - 20.5).abs() < 1e-4));

        let ready_events = h
            .scheduler
            .drain_scene_events()
            .iter()
            .filter(|event| matches!(event, SceneEvent::MeshReady { .. }))
            .count();
        assert_eq!(ready_events, stats.desired);
    }

    #[test]
    fn test_desired_cut_tiles_field_without_overlap() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);

        let desired: Vec<ChunkId> = h.scheduler.desired_chunks().copied().collect();
        let graph = *h.scheduler.graph();
        let volume: i64 = desired.iter().map(|id| (graph.chunk_size(id.lod) as i64).pow(3)).sum();
        assert_eq!(volume, 64 * 64 * 64);
        for (i, a) in desired.iter().enumerate() {
            for b in &desired[i + 1..] {
                assert!(!graph.overlaps(*a, *b));
            }
        }
    }

    #[test]
    fn test_lod_boundary_meshes_carry_transitions() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);

        // LOD 0 chunk next to the LOD 1 chunk at x = 32..64
        let id = ChunkId::new(0, IVec3::new(1, 1, 0));
        assert!(h.scheduler.desired_chunks().any(|d| *d == id));
        assert_eq!(h.scheduler.chunk_state(ChunkId::new(1, IVec3::new(1, 0, 0))), ChunkState::Ready);
        let mesh = h.scheduler.scene().mesh(id).unwrap();
        assert!(mesh.transitions.has_face(1));
    }

    #[test]
    fn test_apply_updates_idle_is_noop() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);
        let before = h.scheduler.stats();
        h.scheduler.drain_scene_events();

        h.scheduler.apply_updates();
        assert_eq!(h.scheduler.stats(), before);
        assert!(h.scheduler.drain_scene_events().is_empty());
    }

    #[test]
    fn test_get_depth_at() {
        let field = flat_field();
        let scheduler = MeshScheduler::new(field, &test_config()).unwrap();
        assert!(matches!(scheduler.get_depth_at(IVec3::new(4, 20, 4)), Err(Error::NotFound(_))));

        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);
        assert_eq!(h.scheduler.get_depth_at(IVec3::new(4, 20, 4)).unwrap(), 0);
        assert_eq!(h.scheduler.get_depth_at(IVec3::new(40, 20, 8)).unwrap(), 1);
        assert!(matches!(
            h.scheduler.get_depth_at(IVec3::new(-1, 0, 0)),
            Err(Error::OutOfBounds { size: 64, .. })
        ));
        assert!(matches!(h.scheduler.get_depth_at(IVec3::new(0, 64, 0)), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn test_lod_change_supersedes_after_delay() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);
        let fine = ChunkId::new(0, IVec3::new(0, 1, 0));
        assert_eq!(h.scheduler.chunk_state(fine), ChunkState::Ready);

        // Far away: the whole field collapses to the root chunk
        h.point.set_position(Vec3::new(5000.0, 20.0, 5000.0));
        h.scheduler.tick(Duration::from_millis(101));
        h.scheduler.apply_updates();

        let root = h.scheduler.graph().root();
        assert_eq!(h.scheduler.chunk_state(root), ChunkState::Ready);
        assert!(matches!(h.scheduler.chunk_state(fine), ChunkState::PendingDeletion { .. }));
        assert!(h.scheduler.scene().has_mesh(fine));

        h.scheduler.tick(Duration::from_millis(50));
        assert!(h.scheduler.scene().has_mesh(fine));

        h.scheduler.tick(Duration::from_millis(60));
        assert!(!h.scheduler.scene().has_mesh(fine));
        assert_eq!(h.scheduler.chunk_state(fine), ChunkState::Unloaded);
        assert_eq!(h.scheduler.scene().mesh_count(), 1);
        assert!(h.scheduler.scene().has_mesh(root));
    }

    fn move_far_and_retire(h: &mut Harness) {
        h.point.set_position(Vec3::new(5000.0, 20.0, 5000.0));
        h.scheduler.tick(Duration::from_millis(101));
        h.scheduler.apply_updates();
    }

    fn mesh_removed(events: &[SceneEvent], id: ChunkId) -> bool {
        events.iter().any(|e| matches!(e, SceneEvent::MeshRemoved { id: removed } if *removed == id))
    }

    #[test]
    fn test_rerequest_during_pending_deletion_keeps_mesh() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);
        let fine = ChunkId::new(0, IVec3::new(0, 1, 0));
        let completed = h.scheduler.stats().meshes_completed;

        move_far_and_retire(&mut h);
        assert!(matches!(h.scheduler.chunk_state(fine), ChunkState::PendingDeletion { .. }));
        h.scheduler.drain_scene_events();

        h.point.set_position(Vec3::new(8.0, 20.0, 8.0));
        h.scheduler.update_desired();
        assert_eq!(h.scheduler.chunk_state(fine), ChunkState::Ready);

        // Well past the deletion delay; the chunk is desired again
        h.scheduler.tick(Duration::from_millis(150));
        h.scheduler.apply_updates();
        assert_eq!(h.scheduler.chunk_state(fine), ChunkState::Ready);
        assert!(h.scheduler.scene().has_mesh(fine));
        assert!(!mesh_removed(&h.scheduler.drain_scene_events(), fine));
        assert!(h.scheduler.stats().meshes_completed > completed);
    }

    #[test]
    fn test_rerequest_during_pending_deletion_after_edit_remeshes() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);
        let fine = ChunkId::new(0, IVec3::new(0, 1, 0));

        move_far_and_retire(&mut h);
        assert!(matches!(h.scheduler.chunk_state(fine), ChunkState::PendingDeletion { .. }));
        h.scheduler.drain_scene_events();

        h.field.set_density(IVec3::new(8, 24, 8), 1.0).unwrap();
        h.scheduler.process_dirty();
        assert!(matches!(h.scheduler.chunk_state(fine), ChunkState::PendingDeletion { .. }));

        h.point.set_position(Vec3::new(8.0, 20.0, 8.0));
        h.scheduler.update_desired();
        assert_eq!(h.scheduler.chunk_state(fine), ChunkState::QueuedForMesh);
        assert!(h.scheduler.scene().has_mesh(fine));

        h.scheduler.apply_updates();
        assert_eq!(h.scheduler.chunk_state(fine), ChunkState::Ready);
        assert!(h.scheduler.scene().mesh(fine).unwrap().positions.iter().any(|p| p.y > 21.0));
        assert!(!mesh_removed(&h.scheduler.drain_scene_events(), fine));
    }

    #[test]
    fn test_edit_survives_release_and_rerequest() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);
        let fine = ChunkId::new(0, IVec3::new(0, 1, 0));

        h.field.set_density(IVec3::new(8, 24, 8), 1.0).unwrap();
        h.scheduler.process_dirty();
        assert_eq!(h.scheduler.chunk_state(fine), ChunkState::Stale);

        // Released while stale: the old mesh stays visible
        h.point.set_position(Vec3::new(5000.0, 20.0, 5000.0));
        h.scheduler.update_desired();
        assert_eq!(h.scheduler.chunk_state(fine), ChunkState::Ready);

        h.point.set_position(Vec3::new(8.0, 20.0, 8.0));
        h.scheduler.update_desired();
        assert_eq!(h.scheduler.chunk_state(fine), ChunkState::Stale);

        h.scheduler.tick(Duration::from_millis(1));
        h.scheduler.apply_updates();
        assert_eq!(h.scheduler.chunk_state(fine), ChunkState::Ready);
        assert!(h.scheduler.scene().mesh(fine).unwrap().positions.iter().any(|p| p.y > 21.0));
    }

    #[test]
    fn test_edit_survives_release_and_rerequest_through_ticks() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);
        let fine = ChunkId::new(0, IVec3::new(0, 1, 0));

        h.field.set_density(IVec3::new(8, 24, 8), 1.0).unwrap();
        h.point.set_position(Vec3::new(5000.0, 20.0, 5000.0));
        h.scheduler.tick(Duration::from_millis(101));
        h.point.set_position(Vec3::new(8.0, 20.0, 8.0));
        h.scheduler.tick(Duration::from_millis(101));
        h.scheduler.apply_updates();

        assert_eq!(h.scheduler.chunk_state(fine), ChunkState::Ready);
        assert!(h.scheduler.scene().mesh(fine).unwrap().positions.iter().any(|p| p.y > 21.0));
    }

    #[test]
    fn test_dropped_invoker_clears_scene_after_delay() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);
        assert!(h.scheduler.scene().mesh_count() > 0);

        drop(h.source);
        drop(h.point);
        h.scheduler.tick(Duration::from_millis(101));
        assert_eq!(h.scheduler.invoker_count(), 0);
        assert_eq!(h.scheduler.stats().desired, 0);
        assert_eq!(h.scheduler.stats().pending_deletion, h.scheduler.scene().mesh_count());

        h.scheduler.tick(Duration::from_millis(150));
        assert_eq!(h.scheduler.scene().mesh_count(), 0);
    }

    #[test]
    fn test_field_write_remeshes_through_tick() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);
        h.scheduler.drain_scene_events();

        h.field.set_density(IVec3::new(8, 24, 8), 1.0).unwrap();
        h.scheduler.tick(Duration::from_millis(1));
        h.scheduler.apply_updates();

        let id = ChunkId::new(0, IVec3::new(0, 1, 0));
        assert_eq!(h.scheduler.chunk_state(id), ChunkState::Ready);
        let events = h.scheduler.drain_scene_events();
        assert!(events.iter().any(|e| matches!(e, SceneEvent::MeshReady { id: ready, .. } if *ready == id)));
        let mesh = h.scheduler.scene().mesh(id).unwrap();
        assert!(mesh.positions.iter().any(|p| p.y > 21.0));
    }

    #[test]
    fn test_update_chunks_at_position_blocks_until_ready() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);

        let pos = IVec3::new(16, 24, 16);
        h.field.set_density(pos, 1.0).unwrap();
        h.scheduler.update_chunks_at_position(pos, false);

        let graph = *h.scheduler.graph();
        for id in graph.chunks_touching(pos, MESH_MARGIN) {
            if h.scheduler.desired_chunks().any(|d| *d == id) {
                assert_eq!(h.scheduler.chunk_state(id), ChunkState::Ready);
            }
        }
        let id = ChunkId::new(0, IVec3::new(1, 1, 1));
        assert!(h.scheduler.scene().mesh(id).unwrap().positions.iter().any(|p| p.y > 21.0));
    }

    #[test]
    fn test_async_update_then_apply() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);
        let completed = h.scheduler.stats().meshes_completed;

        h.scheduler.update_chunks_at_position(IVec3::new(4, 20, 4), true);
        h.scheduler.apply_updates();
        assert!(h.scheduler.stats().meshes_completed > completed);
        assert_eq!(h.scheduler.stats().ready, h.scheduler.stats().desired);
    }

    #[test]
    fn test_stale_generation_discarded() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);

        let id = ChunkId::new(0, IVec3::new(0, 1, 0));
        h.scheduler.update_chunks_at_position(IVec3::new(4, 20, 4), true);
        assert_eq!(h.scheduler.chunk_state(id), ChunkState::Meshing);

        // Completions are only applied by this thread, so the chunk is still
        // Meshing here even if the worker already finished
        h.scheduler.update_chunks_at_position(IVec3::new(4, 20, 4), true);
        h.scheduler.apply_updates();

        let stats = h.scheduler.stats();
        assert!(stats.meshes_discarded >= 1);
        assert_eq!(h.scheduler.chunk_state(id), ChunkState::Ready);
    }

    #[test]
    fn test_update_all_remeshes_everything() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);
        let before = h.scheduler.stats();

        h.scheduler.update_all(false);
        let after = h.scheduler.stats();
        assert_eq!(after.meshes_completed, before.meshes_completed + before.desired as u64);
        assert_eq!(after.ready, after.desired);
    }

    #[test]
    fn test_foliage_appears_in_range() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        settle(&mut h);

        for _ in 0..500 {
            h.scheduler.tick(Duration::from_millis(70));
            if h.scheduler.scene().foliage_count() > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(h.scheduler.scene().foliage_count() > 0);
        let id = ChunkId::new(0, IVec3::new(0, 1, 0));
        let foliage = h.scheduler.scene().foliage(id);
        if let Some(foliage) = foliage {
            assert!(foliage.instances.iter().all(|i| (i.position.y - 20.5).abs() < 1e-3));
        }
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        h.scheduler.tick(Duration::from_millis(1));
        h.scheduler.shutdown();

        let stats = h.scheduler.stats();
        assert_eq!(stats.desired, 0);
        assert_eq!(stats.mesh_jobs_in_flight, 0);
        assert_eq!(h.scheduler.scene().mesh_count(), 0);

        h.scheduler.tick(Duration::from_secs(1));
        h.scheduler.apply_updates();
        assert_eq!(h.scheduler.scene().mesh_count(), 0);
    }

    #[test]
    fn test_remove_invoker() {
        let mut h = harness(Vec3::new(8.0, 20.0, 8.0));
        assert_eq!(h.scheduler.invoker_count(), 1);
        assert!(h.scheduler.remove_invoker(InvokerId(0)));
        assert!(!h.scheduler.remove_invoker(InvokerId(0)));
        settle(&mut h);
        assert_eq!(h.scheduler.stats().desired, 0);
    }
}
