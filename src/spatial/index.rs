//! Uniform-grid spatial index over particles.
//!
//! Particles live in one contiguous store. Each voxel owns a run
//! `start..start + capacity` of that store and fills it from the front, so
//! `(start, len)` always describes exactly the voxel's particles and every
//! insert is visible to reads as soon as it returns.
//!
//! A full run doubles: in place when it ends the store, otherwise by moving to
//! the end and leaving a dead run behind. Dead runs are reclaimed by an
//! in-place compaction once they outnumber live particles, which keeps insert
//! O(1) amortized and the store within a small factor of the particle count.
//! [`SpatialIndex::compact`] packs the store tight on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Zeroable;

use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::math::Aabb;
use super::particle::Particle;
use super::voxel::{Voxel, VoxelId};

/// Run length given to a voxel on its first insert
const MIN_VOXEL_CAPACITY: usize = 4;

/// Dead store slots tolerated before an automatic compaction
const MIN_DEAD_BEFORE_COMPACT: usize = 1 << 16;

static NEXT_INDEX_ID: AtomicU64 = AtomicU64::new(1);

/// Spatial hash grid keyed by [`VoxelId`]
pub struct SpatialIndex {
    id: u64,
    cell_size: f32,
    /// Voxel runs plus their unused tails and dead runs
    store: Vec<Particle>,
    slots: Vec<Voxel>,
    /// Run capacity per slot
    capacities: Vec<usize>,
    lookup: HashMap<VoxelId, usize>,
    live: usize,
    dead: usize,
    /// Slot order scratch for compaction
    order: Vec<usize>,
    bounds: Option<Aabb>,
    generation: u64,
}

impl SpatialIndex {
    /// Create an empty index. The cell size must be finite and positive.
    pub fn new(cell_size: f32) -> Result<Self> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(Error::InvalidCellSize(cell_size));
        }
        Ok(Self {
            id: NEXT_INDEX_ID.fetch_add(1, Ordering::Relaxed),
            cell_size,
            store: Vec::new(),
            slots: Vec::new(),
            capacities: Vec::new(),
            lookup: HashMap::new(),
            live: 0,
            dead: 0,
            order: Vec::new(),
            bounds: None,
            generation: 0,
        })
    }

    /// Process-unique identity of this index instance
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Voxel that would hold a particle at `point`
    pub fn voxel_id_for(&self, point: Vec3) -> VoxelId {
        VoxelId::from_point(point, self.cell_size)
    }

    /// Add a particle to the voxel containing it. O(1) amortized.
    pub fn insert(&mut self, particle: Particle) {
        let pos = particle.pos();
        let id = self.voxel_id_for(pos);
        let slot = match self.lookup.get(&id) {
            Some(&slot) => slot,
            None => {
                let slot = self.slots.len();
                let mut voxel = Voxel::new(id, self.cell_size);
                voxel.start = self.store.len();
                self.slots.push(voxel);
                self.capacities.push(0);
                self.lookup.insert(id, slot);
                slot
            }
        };
        self.reserve_one(slot);

        let voxel = &mut self.slots[slot];
        self.store[voxel.start + voxel.len] = particle;
        voxel.len += 1;
        self.live += 1;
        self.generation += 1;

        self.bounds = Some(match self.bounds {
            Some(mut bounds) => {
                bounds.expand(pos);
                bounds
            }
            None => Aabb::from_point(pos),
        });
    }

    /// Insert many particles
    pub fn extend(&mut self, particles: impl IntoIterator<Item = Particle>) {
        for particle in particles {
            self.insert(particle);
        }
    }

    /// Make room for one more particle in `slot`'s run
    fn reserve_one(&mut self, slot: usize) {
        if self.slots[slot].len < self.capacities[slot] {
            return;
        }
        if self.dead > self.live.max(MIN_DEAD_BEFORE_COMPACT) {
            self.compact_in_place();
        }

        let voxel = self.slots[slot];
        let capacity = self.capacities[slot];
        let grown = (capacity * 2).max(MIN_VOXEL_CAPACITY);
        if voxel.start + capacity == self.store.len() {
            self.store.resize(voxel.start + grown, Particle::zeroed());
        } else {
            let start = self.store.len();
            self.store.extend_from_within(voxel.range());
            self.store.resize(start + grown, Particle::zeroed());
            self.slots[slot].start = start;
            self.dead += capacity;
        }
        self.capacities[slot] = grown;
    }

    /// Slide every run to the front of the store, dropping dead runs and
    /// unused tails. Relative order inside each voxel is kept.
    fn compact_in_place(&mut self) {
        self.order.clear();
        self.order.extend(0..self.slots.len());
        let slots = &self.slots;
        self.order.sort_unstable_by_key(|&slot| slots[slot].start);

        // runs are visited by ascending start, so a run never moves right
        let mut cursor = 0;
        for &slot in &self.order {
            let voxel = &mut self.slots[slot];
            self.store.copy_within(voxel.range(), cursor);
            voxel.start = cursor;
            self.capacities[slot] = voxel.len;
            cursor += voxel.len;
        }
        self.store.truncate(cursor);
        self.dead = 0;
    }

    /// Pack the store tight and release its spare allocation.
    ///
    /// Reads are unaffected. Returns the number of store slots reclaimed.
    pub fn compact(&mut self) -> usize {
        let before = self.store.len();
        self.compact_in_place();
        self.store.shrink_to_fit();
        self.order = Vec::new();
        let reclaimed = before - self.store.len();
        log::debug!(
            "Compacted index: {} particles in {} voxels, {} slots reclaimed",
            self.live,
            self.slots.len(),
            reclaimed
        );
        reclaimed
    }

    /// Particles in a voxel; empty for ids never inserted into
    pub fn query(&self, id: VoxelId) -> &[Particle] {
        match self.lookup.get(&id) {
            Some(&slot) => &self.store[self.slots[slot].range()],
            None => &[],
        }
    }

    /// Particles of a voxel read from this index since its last insert
    pub fn particles_of(&self, voxel: &Voxel) -> &[Particle] {
        &self.store[voxel.range()]
    }

    /// Voxel for an id, if populated
    pub fn voxel(&self, id: VoxelId) -> Option<&Voxel> {
        self.lookup.get(&id).map(|&slot| &self.slots[slot])
    }

    /// Iterate populated voxels in creation order
    pub fn all_voxels(&self) -> std::slice::Iter<'_, Voxel> {
        self.slots.iter()
    }

    /// Populated voxels whose ids fall inside the cells covering `[min, max]`
    pub fn range_query(&self, min: Vec3, max: Vec3) -> Vec<&Voxel> {
        let lo = self.voxel_id_for(min.min(max)).as_ivec3();
        let hi = self.voxel_id_for(min.max(max)).as_ivec3();
        let extent = hi.as_i64vec3() - lo.as_i64vec3() + 1;
        let cells = extent.x.saturating_mul(extent.y).saturating_mul(extent.z);

        if cells as u64 <= self.slots.len() as u64 {
            let mut found = Vec::new();
            for x in lo.x..=hi.x {
                for y in lo.y..=hi.y {
                    for z in lo.z..=hi.z {
                        if let Some(voxel) = self.voxel(VoxelId::new(x, y, z)) {
                            found.push(voxel);
                        }
                    }
                }
            }
            found
        } else {
            self.all_voxels()
                .filter(|v| {
                    let id = v.id.as_ivec3();
                    id.cmpge(lo).all() && id.cmple(hi).all()
                })
                .collect()
        }
    }

    /// Number of populated voxels
    pub fn total_voxels(&self) -> usize {
        self.slots.len()
    }

    /// Number of particles
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Store slots held, including unused tails and dead runs
    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    /// Bounds of every inserted particle, None before the first insert
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    /// Incremented by every change to the contents
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Every particle, voxel by voxel
    pub fn iter_particles(&self) -> impl Iterator<Item = &Particle> + '_ {
        self.slots.iter().flat_map(|voxel| self.particles_of(voxel))
    }

    /// Remove everything while keeping allocations
    pub fn clear(&mut self) {
        self.store.clear();
        self.slots.clear();
        self.capacities.clear();
        self.lookup.clear();
        self.live = 0;
        self.dead = 0;
        self.bounds = None;
        self.generation += 1;
    }
}
