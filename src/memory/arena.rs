//! Bump arena for per-frame particle output

use std::cell::Cell;
use std::marker::PhantomData;

use bytemuck::Zeroable;

use crate::spatial::Particle;

/// Fixed-capacity bump allocator of particles.
///
/// All storage is reserved up front. Regions are handed out in order and
/// freed together by [`reset`](Self::reset); a region borrows the arena, so
/// the borrow checker rules out use after reset.
///
/// # Thread Safety
///
/// Not `Sync`. Use one arena per thread.
pub struct ParticleArena {
    storage: Box<[Particle]>,
    used: usize,
    high_water: usize,
    _not_sync: PhantomData<Cell<()>>,
}

impl ParticleArena {
    /// Create an arena holding up to `capacity` particles
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![Particle::zeroed(); capacity].into_boxed_slice(),
            used: 0,
            high_water: 0,
            _not_sync: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Particles handed out since the last reset
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.storage.len() - self.used
    }

    /// Largest `used()` ever observed
    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    /// Bytes reserved by the arena
    pub fn reserved_bytes(&self) -> usize {
        std::mem::size_of_val(&*self.storage)
    }

    /// Bump-allocate `n` particles. Returns None when out of capacity.
    ///
    /// The region holds whatever a previous frame left there; callers
    /// overwrite it.
    pub fn alloc(&mut self, n: usize) -> Option<&mut [Particle]> {
        let end = self.used.checked_add(n)?;
        if end > self.storage.len() {
            return None;
        }
        let start = self.used;
        self.used = end;
        self.high_water = self.high_water.max(end);
        Some(&mut self.storage[start..end])
    }

    /// Every region allocated since the last reset, in allocation order
    pub fn filled(&self) -> &[Particle] {
        &self.storage[..self.used]
    }

    /// Invalidate all regions
    pub fn reset(&mut self) {
        self.used = 0;
    }
}
