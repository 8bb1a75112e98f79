//! Priority queue for mesh jobs based on invoker distance and priority

use crate::math::morton_key;
use crate::streaming::chunk_graph::{ChunkGraph, ChunkId};
use crate::streaming::invoker::InvokerSnapshot;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Priority information for a queued chunk
#[derive(Clone, Copy, Debug)]
pub struct ChunkPriority {
    pub id: ChunkId,
    pub generation: u32, // Queue entries with an older generation are skipped
    pub priority: f32,   // Higher = more important
    pub distance: f32,   // Distance to the closest invoker
    morton: u64,
}

impl ChunkPriority {
    /// Calculate priority for a chunk from the current invokers
    pub fn calculate(graph: &ChunkGraph, id: ChunkId, generation: u32, invokers: &[InvokerSnapshot]) -> Self {
        let bounds = graph.bounds(id);
        let mut priority = f32::NEG_INFINITY;
        let mut distance = f32::INFINITY;

        for invoker in invokers {
            let d = bounds.distance_to_point(invoker.position);
            distance = distance.min(d);
            // Invoker priority dominates, closer = higher within it
            priority = priority.max(invoker.priority as f32 + 1.0 / (d + 1.0));
        }

        if invokers.is_empty() {
            priority = 0.0;
        }

        Self {
            id,
            generation,
            priority,
            distance,
            morton: morton_key(id.coord),
        }
    }
}

// Implement Ord/PartialOrd for BinaryHeap (max-heap by default)
impl Eq for ChunkPriority {}

impl PartialEq for ChunkPriority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for ChunkPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then finer LOD, then Z-order for determinism
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.id.lod.cmp(&self.id.lod))
            .then_with(|| other.morton.cmp(&self.morton))
            .then_with(|| self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for ChunkPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue for mesh jobs.
///
/// Entries are never removed in place; the scheduler skips popped entries
/// whose generation no longer matches the chunk.
#[derive(Default)]
pub struct ChunkPriorityQueue {
    heap: BinaryHeap<ChunkPriority>,
}

impl ChunkPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all queued chunks
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Add a chunk to the queue
    pub fn push(&mut self, priority: ChunkPriority) {
        self.heap.push(priority);
    }

    /// Get the highest priority chunk
    pub fn pop(&mut self) -> Option<ChunkPriority> {
        self.heap.pop()
    }

    /// Get the number of queued entries (including stale ones)
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{IVec3, Vec3};
    use crate::streaming::invoker::InvokerId;

    fn invoker_at(position: Vec3, priority: i32) -> InvokerSnapshot {
        InvokerSnapshot {
            id: InvokerId(0),
            position,
            mesh_radius: 1000.0,
            foliage_radius: 0.0,
            priority,
        }
    }

    #[test]
    fn test_closer_chunks_first() {
        let graph = ChunkGraph::new(7);
        let invokers = [invoker_at(Vec3::splat(8.0), 0)];
        let mut queue = ChunkPriorityQueue::new();

        for x in [5, 0, 2] {
            queue.push(ChunkPriority::calculate(&graph, ChunkId::new(0, IVec3::new(x, 0, 0)), 1, &invokers));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().id.coord.x, 0);
        assert_eq!(queue.pop().unwrap().id.coord.x, 2);
        assert_eq!(queue.pop().unwrap().id.coord.x, 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_invoker_priority_dominates() {
        let graph = ChunkGraph::new(7);
        let invokers = [invoker_at(Vec3::ZERO, 0), invoker_at(Vec3::new(100.0, 0.0, 0.0), 5)];

        let near_low = ChunkPriority::calculate(&graph, ChunkId::new(0, IVec3::ZERO), 1, &invokers);
        let near_high = ChunkPriority::calculate(&graph, ChunkId::new(0, IVec3::new(6, 0, 0)), 1, &invokers);
        assert!(near_high > near_low);
        assert_eq!(near_low.distance, 0.0);
    }

    #[test]
    fn test_deterministic_tiebreak() {
        let graph = ChunkGraph::new(7);
        let invokers = [invoker_at(Vec3::splat(-1000.0), 0)];
        let a = ChunkPriority::calculate(&graph, ChunkId::new(0, IVec3::new(1, 0, 0)), 1, &invokers);
        let b = ChunkPriority::calculate(&graph, ChunkId::new(0, IVec3::new(0, 1, 0)), 1, &invokers);
        if a.priority == b.priority {
            // Lower Z-order code wins
            assert!(a > b);
        }
    }

    #[test]
    fn test_no_invokers() {
        let graph = ChunkGraph::new(5);
        let p = ChunkPriority::calculate(&graph, graph.root(), 3, &[]);
        assert_eq!(p.priority, 0.0);
        assert_eq!(p.generation, 3);
    }
}
