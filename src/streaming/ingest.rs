//! Background ingestion: sequence symbols to indexed particles
//!
//! The sequence is cut into fixed-size chunks dealt round-robin to worker
//! threads. Each worker hashes its chunks into buffers from a pool lent by the
//! [`MemoryManager`] and sends them over its own bounded channel, so a slow
//! merge blocks the workers instead of piling up memory. The owner thread
//! merges chunks strictly in chunk order and returns each buffer to the worker
//! that produced it. Every merge is a hand-off point where the index is
//! consistent and readable.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::config::EngineConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::memory::{MemoryManager, ParticlePool, PoolStats};
use crate::sequence::{symbol_code, CoordinateHasher, CODON_LEN};
use crate::spatial::{CancelToken, Particle, SpatialIndex};
use super::budget::{BatchPlanner, BatchStatus};

/// Ingestion settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Worker threads hashing chunks
    pub workers: usize,
    /// Hashed chunks that may wait for the merge before workers block
    pub channel_capacity: usize,
    /// Positions per chunk
    pub chunk_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            channel_capacity: 8,
            chunk_size: 50_000,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("ingest.workers must be > 0".into()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("ingest.channel_capacity must be > 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("ingest.chunk_size must be > 0".into()));
        }
        Ok(())
    }
}

/// A run of positions plus the lookahead symbols its last codons need
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceChunk<'a> {
    /// Chunk number within the sequence
    pub seq: usize,
    /// Global position of the first symbol
    pub start: u64,
    /// Positions owned by this chunk
    pub len: usize,
    symbols: &'a [u8],
}

impl<'a> SequenceChunk<'a> {
    /// Chunk `seq` of `sequence`, or None past the end
    pub fn nth(sequence: &'a [u8], base_position: u64, chunk_size: usize, seq: usize) -> Option<Self> {
        let offset = seq.checked_mul(chunk_size)?;
        if offset >= sequence.len() {
            return None;
        }
        let len = chunk_size.min(sequence.len() - offset);
        let end = (offset + len + CODON_LEN - 1).min(sequence.len());
        Some(Self {
            seq,
            start: base_position + offset as u64,
            len,
            symbols: &sequence[offset..end],
        })
    }

    /// Every chunk of `sequence` in order
    pub fn split(sequence: &'a [u8], base_position: u64, chunk_size: usize) -> impl Iterator<Item = Self> + 'a {
        (0..).map_while(move |seq| Self::nth(sequence, base_position, chunk_size, seq))
    }

    /// Symbols including lookahead
    pub fn symbols(&self) -> &'a [u8] {
        self.symbols
    }

    /// Hash every position into `out` (cleared first), in parallel
    pub fn hash_into(&self, hasher: &CoordinateHasher, out: &mut Vec<Particle>) {
        out.clear();
        let symbols = self.symbols;
        let start = self.start;
        out.par_extend((0..self.len).into_par_iter().map(|i| {
            let position = start + i as u64;
            let coord = hasher.hash(&symbols[i..], position);
            Particle::new(coord, symbol_code(symbols[i]), position)
        }));
    }
}

/// Number of chunks `len` symbols split into
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size.max(1))
}

/// Position of the ingestion at a hand-off
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestProgress {
    /// Chunk just merged
    pub chunk: usize,
    /// Chunks in the sequence
    pub chunks: usize,
    /// Particles merged so far in this run
    pub particles: usize,
}

/// Summary of one ingestion run
#[derive(Clone, Debug, PartialEq)]
pub struct IngestReport {
    pub particles: usize,
    pub chunks: usize,
    pub voxels: usize,
    pub estimated_batches: u64,
    pub batch_status: BatchStatus,
    pub cancelled: bool,
    /// Worker pool counters for this run
    pub pool: PoolStats,
    pub elapsed: Duration,
}

struct HashedChunk {
    seq: usize,
    particles: Vec<Particle>,
}

/// Multi-threaded sequence ingestion into a [`SpatialIndex`]
pub struct IngestPipeline {
    config: IngestConfig,
    hasher: CoordinateHasher,
    planner: BatchPlanner,
}

impl IngestPipeline {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.ingest.clone(),
            hasher: CoordinateHasher::new(config.radius_scale),
            planner: BatchPlanner::new(f64::from(config.batch_tolerance)),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Hash `sequence` (first symbol at `base_position`) into `index`.
    ///
    /// On cancellation the chunks merged so far stay in the index and the
    /// report is marked `cancelled`.
    pub fn run(
        &self,
        sequence: &[u8],
        base_position: u64,
        index: &mut SpatialIndex,
        memory: &mut MemoryManager,
        cancel: Option<&CancelToken>,
    ) -> Result<IngestReport> {
        self.run_with(sequence, base_position, index, memory, cancel, |_, _| {})
    }

    /// Like [`run`](Self::run), calling `on_merge` at every hand-off.
    ///
    /// A hand-off follows the merge of one chunk. The index is fully
    /// partitioned at that point: every particle hashed from chunks
    /// `0..=progress.chunk` is queryable and nothing else is. The callback runs
    /// on the calling thread while the workers keep hashing ahead, bounded by
    /// the channel capacity.
    pub fn run_with(
        &self,
        sequence: &[u8],
        base_position: u64,
        index: &mut SpatialIndex,
        memory: &mut MemoryManager,
        cancel: Option<&CancelToken>,
        mut on_merge: impl FnMut(&SpatialIndex, IngestProgress),
    ) -> Result<IngestReport> {
        self.config.validate()?;
        let started = Instant::now();
        let chunk_size = self.config.chunk_size;
        let total_chunks = chunk_count(sequence.len(), chunk_size);
        let workers = self.config.workers.min(total_chunks).max(1);
        let is_cancelled = || cancel.is_some_and(CancelToken::is_cancelled);
        let particles_before = index.len();

        log::info!(
            "Ingesting {} symbols in {} chunks on {} workers",
            sequence.len(),
            total_chunks,
            workers
        );

        let pools = memory.lend_worker_pools(workers);
        let pool_before = pools
            .iter()
            .fold(PoolStats::default(), |acc, pool| acc.merged(&pool.stats()));

        let outcome = std::thread::scope(|scope| {
            let mut outputs = Vec::with_capacity(workers);
            let mut recycle = Vec::with_capacity(workers);
            let mut handles = Vec::with_capacity(workers);

            for (worker, pool) in pools.into_iter().enumerate() {
                let (chunk_tx, chunk_rx) = mpsc::sync_channel::<HashedChunk>(self.config.channel_capacity);
                let (recycle_tx, recycle_rx) = mpsc::channel::<Vec<Particle>>();
                outputs.push(chunk_rx);
                recycle.push(recycle_tx);

                let job = WorkerJob {
                    first_chunk: worker,
                    stride: workers,
                    sequence,
                    base_position,
                    chunk_size,
                    hasher: self.hasher,
                };
                handles.push(scope.spawn(move || job.run(pool, chunk_tx, recycle_rx, cancel)));
            }

            let mut merged = 0usize;
            let mut cancelled = false;
            for seq in 0..total_chunks {
                if is_cancelled() {
                    cancelled = true;
                    break;
                }
                let worker = seq % workers;
                // a closed channel means the worker stopped early; join reports why
                let Ok(mut chunk) = outputs[worker].recv() else {
                    break;
                };
                debug_assert_eq!(chunk.seq, seq);
                index.extend(chunk.particles.drain(..));
                merged += 1;
                log::debug!("Merged chunk {}/{} from worker {}", seq + 1, total_chunks, worker);
                // worker may already have exited
                let _ = recycle[worker].send(chunk.particles);

                on_merge(
                    index,
                    IngestProgress {
                        chunk: seq,
                        chunks: total_chunks,
                        particles: index.len() - particles_before,
                    },
                );
            }
            // unblocks workers waiting on a full channel or on returned buffers
            drop(outputs);
            drop(recycle);

            let mut returned = Vec::with_capacity(workers);
            let mut panicked = false;
            for handle in handles {
                match handle.join() {
                    Ok(pool) => returned.push(pool),
                    Err(_) => panicked = true,
                }
            }
            let cancelled = cancelled || (merged < total_chunks && is_cancelled());
            (merged, cancelled, returned, panicked)
        });
        let (merged_chunks, cancelled, returned, panicked) = outcome;

        let pool = returned
            .iter()
            .fold(PoolStats::default(), |acc, pool| acc.merged(&pool.stats()))
            .since(&pool_before);
        memory.reclaim_worker_pools(returned);
        if panicked {
            return Err(Error::Ingest("ingestion worker panicked".into()));
        }

        index.compact();

        let estimated_batches = self.planner.estimate(index.len() as u64);
        let batch_status = self.planner.validate(estimated_batches, index.total_voxels() as u64);
        let report = IngestReport {
            particles: index.len(),
            chunks: merged_chunks,
            voxels: index.total_voxels(),
            estimated_batches,
            batch_status,
            cancelled,
            pool,
            elapsed: started.elapsed(),
        };

        if cancelled {
            log::warn!("Ingestion cancelled after {}/{} chunks", merged_chunks, total_chunks);
        }
        log::info!(
            "Ingested {} particles into {} voxels in {:.2}s (estimate {} batches, pool reuse {:.0}%)",
            report.particles,
            report.voxels,
            report.elapsed.as_secs_f64(),
            report.estimated_batches,
            report.pool.reuse_rate() * 100.0
        );
        Ok(report)
    }
}

/// What one worker hashes: chunks `first_chunk`, `first_chunk + stride`, ...
struct WorkerJob<'a> {
    first_chunk: usize,
    stride: usize,
    sequence: &'a [u8],
    base_position: u64,
    chunk_size: usize,
    hasher: CoordinateHasher,
}

impl WorkerJob<'_> {
    /// Hash this worker's chunks, then wait for every sent buffer to come
    /// back before returning the pool
    fn run(
        self,
        mut pool: ParticlePool,
        tx: mpsc::SyncSender<HashedChunk>,
        recycle: mpsc::Receiver<Vec<Particle>>,
        cancel: Option<&CancelToken>,
    ) -> ParticlePool {
        for seq in (self.first_chunk..).step_by(self.stride) {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                break;
            }
            let Some(chunk) = SequenceChunk::nth(self.sequence, self.base_position, self.chunk_size, seq) else {
                break;
            };

            while let Ok(buf) = recycle.try_recv() {
                pool.put(buf);
            }
            let mut particles = pool.get();
            chunk.hash_into(&self.hasher, &mut particles);

            if tx.send(HashedChunk { seq, particles }).is_err() {
                break;
            }
        }
        drop(tx);
        // ends once the owner drops its recycle senders
        while let Ok(buf) = recycle.recv() {
            pool.put(buf);
        }
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::hash;

    fn synthetic(len: usize) -> Vec<u8> {
        const SYMBOLS: &[u8] = b"ACGTTGCAAN";
        (0..len).map(|i| SYMBOLS[(i * 7 + i / 3) % SYMBOLS.len()]).collect()
    }

    fn config(workers: usize, chunk_size: usize) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.frame_particle_budget = 1000;
        config.pool_capacity = chunk_size;
        config.ingest = IngestConfig { workers, channel_capacity: 2, chunk_size };
        config
    }

    fn ingest(sequence: &[u8], config: &EngineConfig) -> (SpatialIndex, IngestReport) {
        let mut memory = MemoryManager::new(config).unwrap();
        let mut index = SpatialIndex::new(config.cell_size).unwrap();
        let report = IngestPipeline::new(config).run(sequence, 0, &mut index, &mut memory, None).unwrap();
        (index, report)
    }

    #[test]
    fn test_chunks_carry_lookahead() {
        let seq = b"ACGTACGTAC";
        let chunks: Vec<_> = SequenceChunk::split(seq, 100, 4).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].symbols(), b"ACGTAC");
        assert_eq!(chunks[0].start, 100);
        assert_eq!(chunks[2].len, 2);
        assert_eq!(chunks[2].symbols(), b"AC");
        assert_eq!(chunk_count(seq.len(), 4), 3);
        assert!(SequenceChunk::nth(seq, 0, 4, 3).is_none());
    }

    #[test]
    fn test_hash_into_matches_hash() {
        let seq = synthetic(64);
        let mut out = Vec::new();
        for chunk in SequenceChunk::split(&seq, 10, 16) {
            chunk.hash_into(&CoordinateHasher::default(), &mut out);
            assert_eq!(out.len(), chunk.len);
            for (i, p) in out.iter().enumerate() {
                let offset = (chunk.start - 10) as usize + i;
                assert_eq!(p.pos(), hash(&seq[offset..], chunk.start + i as u64));
                assert_eq!(p.metadata, chunk.start + i as u64);
            }
        }
    }

    #[test]
    fn test_ingest_all_positions() {
        let seq = synthetic(10_000);
        let (index, report) = ingest(&seq, &config(3, 700));
        assert_eq!(report.particles, 10_000);
        assert_eq!(report.chunks, chunk_count(10_000, 700));
        assert!(!report.cancelled);
        let total: usize = index.all_voxels().map(|v| v.len).sum();
        assert_eq!(total, 10_000);
        assert_eq!(report.voxels, index.total_voxels());
        assert_eq!(report.estimated_batches, crate::streaming::estimate_batch_count(10_000));
    }

    #[test]
    fn test_result_independent_of_chunking_and_workers() {
        let seq = synthetic(5_000);
        let (a, _) = ingest(&seq, &config(1, 5_000));
        let (b, _) = ingest(&seq, &config(4, 333));
        assert_eq!(a.total_voxels(), b.total_voxels());
        for voxel in a.all_voxels() {
            assert_eq!(a.query(voxel.id), b.query(voxel.id));
        }
    }

    #[test]
    fn test_buffers_are_recycled() {
        let seq = synthetic(20_000);
        let (_, report) = ingest(&seq, &config(2, 500));
        assert_eq!(report.pool.allocations + report.pool.reuses, 40);
        assert!(report.pool.reuses > 0);
    }

    #[test]
    fn test_empty_sequence() {
        let (index, report) = ingest(b"", &config(2, 100));
        assert_eq!(report.particles, 0);
        assert_eq!(report.chunks, 0);
        assert_eq!(index.total_voxels(), 0);
    }

    #[test]
    fn test_pre_cancelled_ingest_merges_nothing() {
        let seq = synthetic(1_000);
        let config = config(2, 100);
        let mut memory = MemoryManager::new(&config).unwrap();
        let mut index = SpatialIndex::new(config.cell_size).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let report = IngestPipeline::new(&config)
            .run(&seq, 0, &mut index, &mut memory, Some(&token))
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.particles, 0);
    }

    #[test]
    fn test_index_is_consistent_at_every_hand_off() {
        let seq = synthetic(6_000);
        let config = config(3, 500);
        let mut memory = MemoryManager::new(&config).unwrap();
        let mut index = SpatialIndex::new(config.cell_size).unwrap();
        let mut hand_offs = Vec::new();

        IngestPipeline::new(&config)
            .run_with(&seq, 0, &mut index, &mut memory, None, |index, progress| {
                assert_eq!(progress.particles, (progress.chunk + 1) * 500);
                assert_eq!(index.len(), progress.particles);
                let mut seen = 0;
                for voxel in index.all_voxels() {
                    let members = index.query(voxel.id);
                    assert!(members.iter().all(|p| index.voxel_id_for(p.pos()) == voxel.id));
                    assert!(members.iter().all(|p| (p.metadata as usize) < progress.particles));
                    seen += members.len();
                }
                assert_eq!(seen, progress.particles);
                hand_offs.push(progress.chunk);
            })
            .unwrap();

        assert_eq!(hand_offs, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancel_from_another_thread_mid_ingest() {
        let seq = synthetic(40_000);
        let config = config(4, 200);
        let total = chunk_count(seq.len(), 200);
        let mut memory = MemoryManager::new(&config).unwrap();
        let mut index = SpatialIndex::new(config.cell_size).unwrap();
        let token = CancelToken::new();
        let (reached_tx, reached_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                reached_rx.recv().unwrap();
                token.cancel();
                done_tx.send(()).unwrap();
            })
        };

        let report = IngestPipeline::new(&config)
            .run_with(&seq, 0, &mut index, &mut memory, Some(&token), |_, progress| {
                if progress.chunk == 9 {
                    // hold the merge so the workers run into full channels
                    std::thread::sleep(Duration::from_millis(20));
                    reached_tx.send(()).unwrap();
                    done_rx.recv().unwrap();
                }
            })
            .unwrap();
        canceller.join().unwrap();

        assert!(report.cancelled);
        assert_eq!(report.chunks, 10);
        assert!(report.chunks < total);
        assert_eq!(index.len(), 2_000);
        let merged: usize = index.all_voxels().map(|v| index.query(v.id).len()).sum();
        assert_eq!(merged, 2_000);
        assert!(index.iter_particles().all(|p| p.metadata < 2_000));

        // bounded channels: each worker hashed at most a full channel plus one
        // chunk beyond what was merged
        let hashed = report.pool.allocations + report.pool.reuses;
        assert!(hashed as usize <= report.chunks + 4 * (config.ingest.channel_capacity + 1));
        // every worker pool came back
        assert_eq!(memory.worker_pool_count(), 4);
    }

    #[test]
    fn test_worker_pools_carry_over_between_runs() {
        let config = config(2, 500);
        let mut memory = MemoryManager::new(&config).unwrap();
        let pipeline = IngestPipeline::new(&config);

        let mut first = SpatialIndex::new(config.cell_size).unwrap();
        let report = pipeline.run(&synthetic(10_000), 0, &mut first, &mut memory, None).unwrap();
        assert_eq!(memory.worker_pool_count(), 2);
        let allocated = memory.stats().worker_pools.allocations;
        assert_eq!(allocated, report.pool.allocations);
        assert!(memory.stats().reserved_bytes > 1000 * 48);

        let mut second = SpatialIndex::new(config.cell_size).unwrap();
        let report = pipeline.run(&synthetic(10_000), 0, &mut second, &mut memory, None).unwrap();
        // each worker's first buffer comes from the previous run
        assert!(report.pool.reuses >= 2);
        assert_eq!(report.pool.allocations + report.pool.reuses, 20);
        assert_eq!(memory.stats().worker_pools.allocations, allocated + report.pool.allocations);
    }
}
