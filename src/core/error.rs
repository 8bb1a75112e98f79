//! Error types for the voxel terrain core

use glam::IVec3;
use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("position ({}, {}, {}) is outside the field (size {size})", position.x, position.y, position.z)]
    OutOfBounds { position: IVec3, size: i32 },

    #[error("save depth {found} does not match field depth {expected}")]
    DepthMismatch { expected: u8, found: u8 },

    #[error("invalid world generator: {0}")]
    InvalidGenerator(String),

    #[error("no chunk has been scheduled at ({}, {}, {})", .0.x, .0.y, .0.z)]
    NotFound(IVec3),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
