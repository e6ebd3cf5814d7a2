//! Particles and the voxel-grid index that buckets them

pub mod particle;
pub mod voxel;
pub mod index;
pub mod rebuild;

pub use particle::Particle;
pub use voxel::{Voxel, VoxelId};
pub use index::SpatialIndex;
pub use rebuild::CancelToken;
