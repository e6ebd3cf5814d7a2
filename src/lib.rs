//! helixcloud - spatial indexing and visibility reduction for billion-particle
//! sequence clouds
//!
//! Sequence positions are hashed to 3D coordinates, bucketed into a voxel
//! grid, and reduced per frame by frustum culling and distance-based
//! decimation into particle batches a renderer can upload directly.

pub mod core;
pub mod math;
pub mod sequence;
pub mod spatial;
pub mod memory;
pub mod streaming;
pub mod render;

pub use crate::core::{Camera, EngineConfig, Error, Result};
