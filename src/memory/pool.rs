//! Recycled buffers for ingestion
//!
//! A pool hands out `Vec`s with a fixed minimum capacity and takes them back
//! once the caller is done, so steady-state ingestion does not allocate.

use std::cell::Cell;
use std::marker::PhantomData;

use crate::spatial::Particle;

/// Pool counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers created because the free list was empty
    pub allocations: u64,
    /// Buffers served from the free list
    pub reuses: u64,
    /// Buffers returned and kept
    pub puts: u64,
    /// Buffers returned but dropped (too small)
    pub rejected: u64,
}

impl PoolStats {
    /// Fraction of `get` calls served without allocating
    pub fn reuse_rate(&self) -> f64 {
        let gets = self.allocations + self.reuses;
        if gets == 0 {
            return 0.0;
        }
        self.reuses as f64 / gets as f64
    }

    /// Counters accumulated since an `earlier` snapshot of the same pools
    pub fn since(&self, earlier: &PoolStats) -> PoolStats {
        PoolStats {
            allocations: self.allocations.saturating_sub(earlier.allocations),
            reuses: self.reuses.saturating_sub(earlier.reuses),
            puts: self.puts.saturating_sub(earlier.puts),
            rejected: self.rejected.saturating_sub(earlier.rejected),
        }
    }

    /// Sum of two pools' counters
    pub fn merged(&self, other: &PoolStats) -> PoolStats {
        PoolStats {
            allocations: self.allocations + other.allocations,
            reuses: self.reuses + other.reuses,
            puts: self.puts + other.puts,
            rejected: self.rejected + other.rejected,
        }
    }
}

/// Free list of equally sized buffers.
///
/// # Thread Safety
///
/// Not `Sync`. Each worker owns its own pool.
pub struct BufferPool<T> {
    free: Vec<Vec<T>>,
    capacity: usize,
    stats: PoolStats,
    _not_sync: PhantomData<Cell<()>>,
}

/// Pool of particle buffers used by ingestion workers
pub type ParticlePool = BufferPool<Particle>;

/// Pool of index buffers used for LOD selection
pub type IndexPool = BufferPool<u32>;

impl<T> BufferPool<T> {
    /// Create an empty pool whose buffers hold at least `capacity` elements
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Vec::new(),
            capacity,
            stats: PoolStats::default(),
            _not_sync: PhantomData,
        }
    }

    /// Buffer capacity handed out by `get`
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take an empty buffer, reusing a returned one when available
    pub fn get(&mut self) -> Vec<T> {
        match self.free.pop() {
            Some(buf) => {
                self.stats.reuses += 1;
                buf
            }
            None => {
                self.stats.allocations += 1;
                Vec::with_capacity(self.capacity)
            }
        }
    }

    /// Return a buffer. Its contents are dropped and its allocation kept.
    ///
    /// Buffers smaller than the pool capacity are not kept; returns whether
    /// the buffer was accepted.
    pub fn put(&mut self, mut buf: Vec<T>) -> bool {
        if buf.capacity() < self.capacity {
            self.stats.rejected += 1;
            return false;
        }
        buf.clear();
        self.free.push(buf);
        self.stats.puts += 1;
        true
    }

    /// Buffers currently waiting for reuse
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Bytes held by buffers waiting for reuse
    pub fn retained_bytes(&self) -> usize {
        self.free.iter().map(|b| b.capacity() * std::mem::size_of::<T>()).sum()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Drop every retained buffer
    pub fn shrink(&mut self) {
        self.free.clear();
        self.free.shrink_to_fit();
    }
}
