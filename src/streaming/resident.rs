//! Camera-driven resident voxel set
//!
//! Keeps the voxels within a stream radius of the camera resident, drops the
//! ones past an unload radius (a multiple of the stream radius, so small
//! camera moves do not thrash), and evicts further under a voxel-count cap and
//! a byte budget.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::memory::MemoryBudget;
use crate::spatial::{Particle, SpatialIndex, Voxel, VoxelId};
use super::budget::VOXEL_RECORD_BYTES;

/// Which resident voxels go first when over budget
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Farthest from the camera first
    #[default]
    Farthest,
    /// Least recently loaded or touched first, farthest breaking ties
    Lru,
}

/// Residency settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidencyConfig {
    /// Voxels whose centers lie within this distance are loaded
    pub stream_radius: f32,
    /// Unload radius as a multiple of the stream radius
    pub unload_factor: f32,
    /// Hard cap on resident voxels
    pub max_resident_voxels: usize,
    pub eviction: EvictionPolicy,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            stream_radius: 1000.0,
            unload_factor: 1.5,
            max_resident_voxels: 100_000,
            eviction: EvictionPolicy::default(),
        }
    }
}

impl ResidencyConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.stream_radius.is_finite() || self.stream_radius <= 0.0 {
            return Err(Error::Config(format!(
                "residency.stream_radius must be > 0, got {}",
                self.stream_radius
            )));
        }
        if !self.unload_factor.is_finite() || self.unload_factor < 1.0 {
            return Err(Error::Config(format!(
                "residency.unload_factor must be >= 1, got {}",
                self.unload_factor
            )));
        }
        if self.max_resident_voxels == 0 {
            return Err(Error::Config("residency.max_resident_voxels must be > 0".into()));
        }
        Ok(())
    }

    pub fn unload_radius(&self) -> f32 {
        self.stream_radius * self.unload_factor
    }
}

/// What one camera update changed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResidencyUpdate {
    pub loaded: usize,
    /// Dropped for being past the unload radius
    pub unloaded: usize,
    /// Dropped to get back under the cap or the byte budget
    pub evicted: usize,
    /// The camera barely moved and the index did not change
    pub skipped: bool,
}

/// Running residency counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResidencyStats {
    pub resident_voxels: usize,
    pub resident_particles: usize,
    pub resident_bytes: usize,
    pub loaded: u64,
    pub unloaded: u64,
    pub evicted: u64,
    /// Voxels in range that were already resident
    pub cache_hits: u64,
    pub updates: u64,
    pub skipped: u64,
}

#[derive(Clone, Copy, Debug)]
struct Resident {
    center: Vec3,
    particles: usize,
    last_used: u64,
}

impl Resident {
    fn bytes(&self) -> usize {
        VOXEL_RECORD_BYTES as usize + self.particles * std::mem::size_of::<Particle>()
    }
}

/// Set of voxels kept resident around the camera.
///
/// Holds only ids and accounting; particle data stays in the
/// [`SpatialIndex`], which [`voxels`](Self::voxels) filters.
pub struct ResidentSet {
    config: ResidencyConfig,
    resident: HashMap<VoxelId, Resident>,
    budget: MemoryBudget,
    last_camera: Option<Vec3>,
    /// (index id, generation) seen by the last update
    last_index: Option<(u64, u64)>,
    tick: u64,
    stats: ResidencyStats,
    candidates: Vec<(VoxelId, f32, u64)>,
}

impl ResidentSet {
    pub fn new(config: ResidencyConfig, budget_mb: usize) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            resident: HashMap::new(),
            budget: MemoryBudget::new(budget_mb),
            last_camera: None,
            last_index: None,
            tick: 0,
            stats: ResidencyStats::default(),
            candidates: Vec::new(),
        })
    }

    pub fn config(&self) -> &ResidencyConfig {
        &self.config
    }

    /// Stream voxels of `index` in and out around `camera_position`.
    ///
    /// Skipped when the camera moved less than half a cell and the index is
    /// unchanged since the last update.
    pub fn update_camera(&mut self, index: &SpatialIndex, camera_position: Vec3) -> ResidencyUpdate {
        let index_key = (index.id(), index.generation());
        let moved_little = self
            .last_camera
            .is_some_and(|last| last.distance(camera_position) < index.cell_size() * 0.5);
        if moved_little && self.last_index == Some(index_key) {
            self.stats.skipped += 1;
            return ResidencyUpdate { skipped: true, ..Default::default() };
        }
        if self.last_index.is_some_and(|(id, _)| id != index.id()) {
            self.clear();
        }
        self.last_camera = Some(camera_position);
        self.last_index = Some(index_key);
        self.tick += 1;
        self.stats.updates += 1;

        let mut update = ResidencyUpdate {
            unloaded: self.unload_distant(camera_position),
            loaded: self.load_nearby(index, camera_position),
            ..Default::default()
        };
        update.evicted = self.enforce_budget(camera_position);
        self.refresh_stats();

        log::debug!(
            "Residency: {} resident ({} loaded, {} unloaded, {} evicted), {:.1}% of budget",
            self.resident.len(),
            update.loaded,
            update.unloaded,
            update.evicted,
            self.budget.pressure() * 100.0
        );
        update
    }

    fn unload_distant(&mut self, camera_position: Vec3) -> usize {
        let limit = self.config.unload_radius().powi(2);
        let budget = &mut self.budget;
        let before = self.resident.len();
        self.resident.retain(|_, resident| {
            let keep = resident.center.distance_squared(camera_position) <= limit;
            if !keep {
                budget.remove(resident.bytes());
            }
            keep
        });
        let unloaded = before - self.resident.len();
        self.stats.unloaded += unloaded as u64;
        unloaded
    }

    fn load_nearby(&mut self, index: &SpatialIndex, camera_position: Vec3) -> usize {
        let radius = self.config.stream_radius;
        let reach = Vec3::splat(radius);
        let mut loaded = 0;
        for voxel in index.range_query(camera_position - reach, camera_position + reach) {
            let center = voxel.center();
            if center.distance_squared(camera_position) > radius * radius {
                continue;
            }
            match self.resident.get_mut(&voxel.id) {
                Some(resident) => {
                    // the voxel may have grown since it was loaded
                    self.budget.remove(resident.bytes());
                    resident.particles = voxel.len;
                    resident.last_used = self.tick;
                    self.budget.add(resident.bytes());
                    self.stats.cache_hits += 1;
                }
                None => {
                    let resident = Resident { center, particles: voxel.len, last_used: self.tick };
                    self.budget.add(resident.bytes());
                    self.resident.insert(voxel.id, resident);
                    loaded += 1;
                }
            }
        }
        self.stats.loaded += loaded as u64;
        loaded
    }

    fn over_budget(&self) -> bool {
        self.resident.len() > self.config.max_resident_voxels || self.budget.used() > self.budget.budget()
    }

    fn enforce_budget(&mut self, camera_position: Vec3) -> usize {
        if !self.over_budget() {
            return 0;
        }
        self.candidates.clear();
        self.candidates.extend(
            self.resident
                .iter()
                .map(|(&id, r)| (id, r.center.distance_squared(camera_position), r.last_used)),
        );
        match self.config.eviction {
            EvictionPolicy::Farthest => {
                self.candidates.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            }
            EvictionPolicy::Lru => {
                self.candidates
                    .sort_unstable_by(|a, b| a.2.cmp(&b.2).then(b.1.total_cmp(&a.1)).then(a.0.cmp(&b.0)));
            }
        }

        let mut evicted = 0;
        for i in 0..self.candidates.len() {
            if !self.over_budget() {
                break;
            }
            let id = self.candidates[i].0;
            if let Some(resident) = self.resident.remove(&id) {
                self.budget.remove(resident.bytes());
                evicted += 1;
            }
        }
        if evicted > 0 {
            log::debug!("Evicted {} voxels ({:?})", evicted, self.config.eviction);
        }
        self.stats.evicted += evicted as u64;
        evicted
    }

    fn refresh_stats(&mut self) {
        self.stats.resident_voxels = self.resident.len();
        self.stats.resident_particles = self.resident.values().map(|r| r.particles).sum();
        self.stats.resident_bytes = self.budget.used();
    }

    /// Mark a resident voxel as used now, e.g. because it was drawn
    pub fn touch(&mut self, id: VoxelId) -> bool {
        self.tick += 1;
        match self.resident.get_mut(&id) {
            Some(resident) => {
                resident.last_used = self.tick;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: VoxelId) -> bool {
        self.resident.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.resident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resident.is_empty()
    }

    /// Resident voxels of `index`, in index order
    pub fn voxels<'a>(&'a self, index: &'a SpatialIndex) -> impl Iterator<Item = &'a Voxel> + 'a {
        index.all_voxels().filter(move |voxel| self.resident.contains_key(&voxel.id))
    }

    /// Bytes charged for resident voxels against the budget
    pub fn budget(&self) -> MemoryBudget {
        self.budget
    }

    pub fn stats(&self) -> ResidencyStats {
        self.stats
    }

    /// Drop every resident voxel; the next update reloads from scratch
    pub fn clear(&mut self) {
        self.resident.clear();
        self.budget.remove(usize::MAX);
        self.last_camera = None;
        self.last_index = None;
        self.refresh_stats();
    }
}
