//! Memory owner for one engine instance
//!
//! Tracks how much memory the pools and the frame arena hold against a
//! configured budget. There is no global instance: the manager is built from
//! an [`EngineConfig`] and passed to ingestion and the frame loop.

use crate::core::config::EngineConfig;
use crate::core::types::Result;
use crate::spatial::Particle;
use super::arena::ParticleArena;
use super::pool::{IndexPool, ParticlePool, PoolStats};

/// Byte budget with pressure metrics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBudget {
    budget_bytes: usize,
    used_bytes: usize,
}

impl MemoryBudget {
    pub fn new(budget_mb: usize) -> Self {
        Self {
            budget_bytes: budget_mb.saturating_mul(1024 * 1024),
            used_bytes: 0,
        }
    }

    pub fn add(&mut self, bytes: usize) {
        self.used_bytes = self.used_bytes.saturating_add(bytes);
    }

    pub fn remove(&mut self, bytes: usize) {
        self.used_bytes = self.used_bytes.saturating_sub(bytes);
    }

    pub fn used(&self) -> usize {
        self.used_bytes
    }

    pub fn budget(&self) -> usize {
        self.budget_bytes
    }

    pub fn available(&self) -> usize {
        self.budget_bytes.saturating_sub(self.used_bytes)
    }

    /// Usage fraction (0.0 to 1.0+). Above 1.0 means over budget.
    pub fn pressure(&self) -> f32 {
        if self.budget_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f32 / self.budget_bytes as f32
    }

    pub fn can_reserve(&self, bytes: usize) -> bool {
        self.available() >= bytes
    }
}

/// Snapshot of pool and arena usage
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MemoryStats {
    /// Counters summed over the worker pools currently held (not lent)
    pub worker_pools: PoolStats,
    pub index_pool: PoolStats,
    pub arena_used: usize,
    pub arena_capacity: usize,
    pub arena_high_water: usize,
    /// Bytes held by the arena and idle pool buffers
    pub reserved_bytes: usize,
    pub budget_bytes: usize,
    pub pressure: f32,
}

/// Owns the frame arena, the index pool and the ingestion worker pools.
///
/// Worker pools are lent to ingestion for one run and handed back afterwards,
/// so their buffers and counters carry over between runs.
pub struct MemoryManager {
    worker_pools: Vec<ParticlePool>,
    index_pool: IndexPool,
    arena: ParticleArena,
    pool_capacity: usize,
    budget_mb: usize,
}

impl MemoryManager {
    /// Build from a validated config
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let budget = MemoryBudget::new(config.memory_budget_mb);
        let arena_bytes = config.frame_particle_budget.saturating_mul(std::mem::size_of::<Particle>());
        if !budget.can_reserve(arena_bytes) {
            log::warn!(
                "Frame arena ({} MB) exceeds memory budget ({} MB)",
                arena_bytes / (1024 * 1024),
                config.memory_budget_mb
            );
        }

        log::info!(
            "Memory manager: arena {} particles, pool buffers {} particles, budget {} MB",
            config.frame_particle_budget,
            config.pool_capacity,
            config.memory_budget_mb
        );

        Ok(Self {
            worker_pools: Vec::new(),
            index_pool: IndexPool::new(config.pool_capacity),
            arena: ParticleArena::new(config.frame_particle_budget),
            pool_capacity: config.pool_capacity,
            budget_mb: config.memory_budget_mb,
        })
    }

    /// Lend `count` worker pools, most recently returned first; pools the
    /// manager does not hold yet are created empty
    pub fn lend_worker_pools(&mut self, count: usize) -> Vec<ParticlePool> {
        let keep = self.worker_pools.len().saturating_sub(count);
        let mut lent = self.worker_pools.split_off(keep);
        let capacity = self.pool_capacity;
        lent.resize_with(count, || ParticlePool::new(capacity));
        lent
    }

    /// Take back pools lent by [`lend_worker_pools`](Self::lend_worker_pools)
    pub fn reclaim_worker_pools(&mut self, pools: impl IntoIterator<Item = ParticlePool>) {
        self.worker_pools.extend(pools);
    }

    /// Worker pools currently held
    pub fn worker_pool_count(&self) -> usize {
        self.worker_pools.len()
    }

    /// Counters summed over the held worker pools
    pub fn worker_pool_stats(&self) -> PoolStats {
        self.worker_pools
            .iter()
            .fold(PoolStats::default(), |acc, pool| acc.merged(&pool.stats()))
    }

    pub fn index_pool(&mut self) -> &mut IndexPool {
        &mut self.index_pool
    }

    pub fn arena(&mut self) -> &mut ParticleArena {
        &mut self.arena
    }

    /// Arena plus index pool, borrowed together for frame building
    pub fn frame_parts(&mut self) -> (&mut ParticleArena, &mut IndexPool) {
        (&mut self.arena, &mut self.index_pool)
    }

    fn reserved_bytes(&self) -> usize {
        self.arena.reserved_bytes()
            + self.worker_pools.iter().map(ParticlePool::retained_bytes).sum::<usize>()
            + self.index_pool.retained_bytes()
    }

    /// Current budget with idle pool buffers included
    pub fn budget(&self) -> MemoryBudget {
        let mut budget = MemoryBudget::new(self.budget_mb);
        budget.add(self.reserved_bytes());
        budget
    }

    /// Drop idle pool buffers if the budget is under pressure
    pub fn trim(&mut self) -> bool {
        if self.budget().pressure() <= 0.9 {
            return false;
        }
        for pool in &mut self.worker_pools {
            pool.shrink();
        }
        self.index_pool.shrink();
        log::debug!("Trimmed idle pool buffers");
        true
    }

    pub fn stats(&self) -> MemoryStats {
        let budget = self.budget();
        MemoryStats {
            worker_pools: self.worker_pool_stats(),
            index_pool: self.index_pool.stats(),
            arena_used: self.arena.used(),
            arena_capacity: self.arena.capacity(),
            arena_high_water: self.arena.high_water_mark(),
            reserved_bytes: budget.used(),
            budget_bytes: budget.budget(),
            pressure: budget.pressure(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.frame_particle_budget = 1000;
        config.pool_capacity = 256;
        config.ingest.chunk_size = 256;
        config.memory_budget_mb = 1;
        config
    }

    #[test]
    fn test_budget_tracking() {
        let mut budget = MemoryBudget::new(1);
        assert_eq!(budget.available(), 1024 * 1024);
        budget.add(512 * 1024);
        assert!((budget.pressure() - 0.5).abs() < 1e-6);
        budget.remove(usize::MAX);
        assert_eq!(budget.used(), 0);
        assert_eq!(MemoryBudget::new(0).pressure(), 0.0);
    }

    #[test]
    fn test_manager_from_config() {
        let manager = MemoryManager::new(&small_config()).unwrap();
        let stats = manager.stats();
        assert_eq!(stats.arena_capacity, 1000);
        assert_eq!(stats.reserved_bytes, 1000 * 48);
        assert_eq!(stats.budget_bytes, 1024 * 1024);
    }

    #[test]
    fn test_manager_rejects_invalid_config() {
        let mut config = small_config();
        config.cell_size = -1.0;
        assert!(MemoryManager::new(&config).is_err());
    }

    #[test]
    fn test_worker_pools_are_independent() {
        let mut manager = MemoryManager::new(&small_config()).unwrap();
        let mut pools = manager.lend_worker_pools(2);
        assert_eq!(pools.len(), 2);
        let buf = pools[0].get();
        assert_eq!(buf.capacity(), 256);
        pools[0].put(buf);
        assert_eq!(pools[0].available(), 1);
        assert_eq!(pools[1].available(), 0);
    }

    #[test]
    fn test_worker_pools_survive_lending() {
        let mut manager = MemoryManager::new(&small_config()).unwrap();
        let mut pools = manager.lend_worker_pools(1);
        assert_eq!(manager.worker_pool_count(), 0);
        let buf = pools[0].get();
        let addr = buf.as_ptr();
        pools[0].put(buf);
        manager.reclaim_worker_pools(pools);

        assert_eq!(manager.worker_pool_count(), 1);
        assert_eq!(manager.stats().worker_pools.allocations, 1);
        assert_eq!(manager.stats().reserved_bytes, 1000 * 48 + 256 * 48);

        let mut again = manager.lend_worker_pools(3);
        assert_eq!(again.len(), 3);
        assert_eq!(again.iter().filter(|p| p.available() == 1).count(), 1);
        let reused = again.iter_mut().find(|p| p.available() == 1).unwrap();
        assert_eq!(reused.get().as_ptr(), addr);
    }

    #[test]
    fn test_idle_buffers_count_against_budget_and_trim() {
        let mut config = small_config();
        config.pool_capacity = 20_000;
        config.ingest.chunk_size = 1000;
        let mut manager = MemoryManager::new(&config).unwrap();
        let mut pools = manager.lend_worker_pools(1);
        let bufs: Vec<_> = (0..2).map(|_| pools[0].get()).collect();
        for buf in bufs {
            pools[0].put(buf);
        }
        manager.reclaim_worker_pools(pools);
        // 2 * 20_000 * 48 bytes is well over 1 MB
        assert!(manager.stats().pressure > 1.0);
        assert!(manager.trim());
        assert!(manager.stats().pressure < 0.1);
    }
}
