//! Chunk streaming: LOD selection, mesh scheduling and the live scene

pub mod chunk_graph;
pub mod lod;
pub mod invoker;
pub mod priority;
pub mod worker_pool;
pub mod foliage;
pub mod scene;
pub mod scheduler;

pub use chunk_graph::{ChunkGraph, ChunkId, CHUNK_CELLS};
pub use lod::{lod_step, LodConfig};
pub use invoker::{InvokerId, InvokerSource, PointInvoker};
pub use priority::{ChunkPriority, ChunkPriorityQueue};
pub use worker_pool::WorkerPool;
pub use foliage::{scatter_foliage, FoliageConfig, FoliageInstance, FoliageInstances};
pub use scene::{LiveScene, SceneEvent};
pub use scheduler::{ChunkState, MeshScheduler, SchedulerStats};
