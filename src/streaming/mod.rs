//! Ingestion, capacity planning, LOD and residency management

pub mod budget;
pub mod lod;
pub mod ingest;
pub mod resident;

pub use budget::{
    BatchPlanner, BatchStatus, MemoryEstimate,
    estimate_batch_count, validate, estimate_memory, optimal_cell_size,
};
pub use lod::{
    Batch, DecimationStrategy, LodLevel, LodManager, LodOutput, LodStats, LodTable,
    DEFAULT_LOD_LEVELS,
};
pub use ingest::{IngestConfig, IngestPipeline, IngestProgress, IngestReport, SequenceChunk, chunk_count};
pub use resident::{EvictionPolicy, ResidencyConfig, ResidencyStats, ResidencyUpdate, ResidentSet};
