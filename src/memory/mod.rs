//! Reusable memory for ingestion and per-frame work

pub mod pool;
pub mod arena;
pub mod manager;

pub use pool::{BufferPool, IndexPool, ParticlePool, PoolStats};
pub use arena::ParticleArena;
pub use manager::{MemoryBudget, MemoryManager, MemoryStats};
