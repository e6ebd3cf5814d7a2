//! Level of Detail (LOD) selection and particle decimation
//!
//! Each visible voxel gets a level from its distance to the camera. Levels
//! map to keep ratios, and a voxel's particles are thinned to
//! `max(1, round(len * ratio))` with a deterministic sampler, so the same
//! camera always produces the same output.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::core::camera::Camera;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::spatial::{Particle, SpatialIndex, Voxel, VoxelId};

/// One distance band. Voxels closer than `max_distance` (and not in an
/// earlier band) keep `keep_ratio` of their particles.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LodLevel {
    pub max_distance: f32,
    pub keep_ratio: f32,
}

impl LodLevel {
    pub const fn new(max_distance: f32, keep_ratio: f32) -> Self {
        Self { max_distance, keep_ratio }
    }
}

/// Default bands
/// - LOD 0: full detail, 0-100
/// - LOD 1: half, 100-500
/// - LOD 2: a tenth, 500-2000
/// - LOD 3: 3%, beyond
pub const DEFAULT_LOD_LEVELS: [LodLevel; 4] = [
    LodLevel::new(100.0, 1.0),
    LodLevel::new(500.0, 0.5),
    LodLevel::new(2000.0, 0.1),
    LodLevel::new(f32::MAX, 0.03),
];

/// Validated, ordered LOD bands
#[derive(Clone, Debug, PartialEq)]
pub struct LodTable {
    levels: Vec<LodLevel>,
}

impl Default for LodTable {
    fn default() -> Self {
        Self { levels: DEFAULT_LOD_LEVELS.to_vec() }
    }
}

impl LodTable {
    /// Distances must be strictly increasing; ratios must lie in (0, 1] and
    /// never increase with distance.
    pub fn new(levels: Vec<LodLevel>) -> Result<Self> {
        if levels.is_empty() {
            return Err(Error::InvalidLodTable("no levels".into()));
        }
        if levels.len() > usize::from(u8::MAX) + 1 {
            return Err(Error::InvalidLodTable(format!("{} levels, at most 256 allowed", levels.len())));
        }
        for (i, level) in levels.iter().enumerate() {
            if !(level.keep_ratio > 0.0 && level.keep_ratio <= 1.0) {
                return Err(Error::InvalidLodTable(format!(
                    "level {} keep_ratio {} outside (0, 1]",
                    i, level.keep_ratio
                )));
            }
            if level.max_distance.is_nan() || level.max_distance <= 0.0 {
                return Err(Error::InvalidLodTable(format!(
                    "level {} max_distance {} must be positive",
                    i, level.max_distance
                )));
            }
        }
        for (i, pair) in levels.windows(2).enumerate() {
            if pair[1].max_distance <= pair[0].max_distance {
                return Err(Error::InvalidLodTable(format!(
                    "level {} distance {} not above previous {}",
                    i + 1,
                    pair[1].max_distance,
                    pair[0].max_distance
                )));
            }
            if pair[1].keep_ratio > pair[0].keep_ratio {
                return Err(Error::InvalidLodTable(format!(
                    "level {} keep_ratio {} exceeds previous {}",
                    i + 1,
                    pair[1].keep_ratio,
                    pair[0].keep_ratio
                )));
            }
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[LodLevel] {
        &self.levels
    }

    /// Index of the coarsest level
    pub fn max_level(&self) -> u8 {
        (self.levels.len() - 1) as u8
    }

    /// First band whose threshold exceeds `distance`; the last band otherwise
    pub fn select_level(&self, distance: f32) -> u8 {
        self.levels
            .iter()
            .position(|level| distance < level.max_distance)
            .unwrap_or(self.levels.len() - 1) as u8
    }

    /// Keep ratio of a level; levels past the end use the last band
    pub fn reduction_ratio(&self, level: u8) -> f32 {
        let i = usize::from(level).min(self.levels.len() - 1);
        self.levels[i].keep_ratio
    }

    /// Particles kept from a voxel of `len` at `level`
    pub fn keep_count(&self, len: usize, level: u8) -> usize {
        if len == 0 {
            return 0;
        }
        let kept = (len as f64 * f64::from(self.reduction_ratio(level))).round() as usize;
        kept.clamp(1, len)
    }
}

/// How a voxel's particles are thinned
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecimationStrategy {
    /// Keep the particles with the smallest hash of their metadata.
    /// Stable under re-ordering and spreads evenly along the sequence.
    #[default]
    Keyed,
    /// Keep every `len / k`-th particle in storage order
    Stride,
}

/// 64-bit finalizer from SplitMix64
#[inline]
fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// LOD assignment for one voxel
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub voxel: VoxelId,
    pub visible: bool,
    pub lod: u8,
    /// Camera to voxel-center distance
    pub distance: f32,
    /// Range of this batch in the accompanying particle list
    pub particles: Range<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

/// Per-pass LOD counters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LodStats {
    pub voxels_per_level: Vec<usize>,
    pub particles_in: usize,
    pub particles_out: usize,
}

impl LodStats {
    fn new(levels: usize) -> Self {
        Self { voxels_per_level: vec![0; levels], particles_in: 0, particles_out: 0 }
    }

    pub(crate) fn reset(&mut self, levels: usize) {
        self.voxels_per_level.clear();
        self.voxels_per_level.resize(levels, 0);
        self.particles_in = 0;
        self.particles_out = 0;
    }

    pub(crate) fn record(&mut self, level: u8, len_in: usize, len_out: usize) {
        if let Some(count) = self.voxels_per_level.get_mut(usize::from(level)) {
            *count += 1;
        }
        self.particles_in += len_in;
        self.particles_out += len_out;
    }

    /// Output over input particles (1.0 when nothing came in)
    pub fn kept_fraction(&self) -> f32 {
        if self.particles_in == 0 {
            return 1.0;
        }
        self.particles_out as f32 / self.particles_in as f32
    }
}

/// Result of [`LodManager::apply_lod`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LodOutput {
    pub batches: Vec<Batch>,
    pub particles: Vec<Particle>,
    pub stats: LodStats,
}

/// Assigns LOD levels from a camera and decimates voxel contents
pub struct LodManager {
    camera: Camera,
    table: LodTable,
    strategy: DecimationStrategy,
    keys: Vec<(u64, u32)>,
}

impl LodManager {
    /// Default table and keyed decimation
    pub fn new(camera: Camera) -> Self {
        Self::with_table(camera, LodTable::default(), DecimationStrategy::default())
    }

    pub fn with_table(camera: Camera, table: LodTable, strategy: DecimationStrategy) -> Self {
        Self { camera, table, strategy, keys: Vec::new() }
    }

    pub fn update_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn table(&self) -> &LodTable {
        &self.table
    }

    pub fn strategy(&self) -> DecimationStrategy {
        self.strategy
    }

    pub fn select_level(&self, distance: f32) -> u8 {
        self.table.select_level(distance)
    }

    pub fn reduction_ratio(&self, level: u8) -> f32 {
        self.table.reduction_ratio(level)
    }

    /// Level for a voxel from the camera position to its center
    pub fn level_for(&self, voxel: &Voxel) -> (u8, f32) {
        let distance = self.camera.distance_to(voxel.center());
        (self.select_level(distance), distance)
    }

    /// Write the indices of the particles kept at `level` into `out`, ascending
    pub fn select_indices(&mut self, particles: &[Particle], level: u8, out: &mut Vec<u32>) {
        out.clear();
        let len = particles.len();
        let keep = self.table.keep_count(len, level);
        if keep == len {
            out.extend(0..len as u32);
            return;
        }

        match self.strategy {
            DecimationStrategy::Stride => {
                out.extend((0..keep).map(|i| (i * len / keep) as u32));
            }
            DecimationStrategy::Keyed => {
                self.keys.clear();
                self.keys.extend(
                    particles.iter().enumerate().map(|(i, p)| (mix64(p.metadata), i as u32)),
                );
                self.keys.select_nth_unstable(keep - 1);
                out.extend(self.keys[..keep].iter().map(|&(_, i)| i));
                out.sort_unstable();
            }
        }
    }

    /// Decimated copy of `particles` at `level`
    pub fn decimate(&mut self, particles: &[Particle], level: u8) -> Vec<Particle> {
        let mut indices = Vec::new();
        self.select_indices(particles, level, &mut indices);
        indices.iter().map(|&i| particles[i as usize]).collect()
    }

    /// Assign levels to `voxels` and collect their decimated particles.
    ///
    /// Batches follow the input order and are all marked visible.
    pub fn apply_lod<'a>(
        &mut self,
        index: &SpatialIndex,
        voxels: impl IntoIterator<Item = &'a Voxel>,
    ) -> LodOutput {
        let mut output = LodOutput { stats: LodStats::new(self.table.levels().len()), ..Default::default() };
        let mut indices = Vec::new();

        for voxel in voxels {
            let (lod, distance) = self.level_for(voxel);
            let source = index.particles_of(voxel);
            self.select_indices(source, lod, &mut indices);

            let start = output.particles.len();
            output.particles.extend(indices.iter().map(|&i| source[i as usize]));
            let end = output.particles.len();

            output.stats.record(lod, source.len(), indices.len());
            output.batches.push(Batch { voxel: voxel.id, visible: true, lod, distance, particles: start..end });
        }

        log::trace!(
            "LOD: {} batches, {} -> {} particles",
            output.batches.len(),
            output.stats.particles_in,
            output.stats.particles_out
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;

    fn particles(n: u64) -> Vec<Particle> {
        (0..n).map(|i| Particle::new(Vec3::new(i as f32 * 0.001, 0.0, 0.0), 1, i)).collect()
    }

    #[test]
    fn test_default_table() {
        let table = LodTable::default();
        assert_eq!(table.select_level(0.0), 0);
        assert_eq!(table.select_level(99.9), 0);
        assert_eq!(table.select_level(100.0), 1);
        assert_eq!(table.select_level(499.0), 1);
        assert_eq!(table.select_level(1999.0), 2);
        assert_eq!(table.select_level(1e9), 3);
        assert_eq!(table.select_level(f32::INFINITY), 3);
        assert_eq!(table.select_level(f32::NAN), 3);
    }

    #[test]
    fn test_ratios_non_increasing() {
        let table = LodTable::default();
        for level in 1..=table.max_level() {
            assert!(table.reduction_ratio(level) <= table.reduction_ratio(level - 1));
        }
        assert_eq!(table.reduction_ratio(200), 0.03);
    }

    #[test]
    fn test_table_validation() {
        assert!(LodTable::new(vec![]).is_err());
        assert!(LodTable::new(vec![LodLevel::new(10.0, 0.0)]).is_err());
        assert!(LodTable::new(vec![LodLevel::new(10.0, 1.5)]).is_err());
        assert!(LodTable::new(vec![LodLevel::new(10.0, 1.0), LodLevel::new(5.0, 0.5)]).is_err());
        assert!(LodTable::new(vec![LodLevel::new(10.0, 0.5), LodLevel::new(20.0, 0.6)]).is_err());
        assert!(LodTable::new(vec![LodLevel::new(10.0, 1.0), LodLevel::new(20.0, 1.0)]).is_ok());
    }

    #[test]
    fn test_keep_count() {
        let table = LodTable::default();
        assert_eq!(table.keep_count(0, 3), 0);
        assert_eq!(table.keep_count(1, 3), 1);
        assert_eq!(table.keep_count(10, 3), 1);
        assert_eq!(table.keep_count(1000, 2), 100);
        assert_eq!(table.keep_count(5, 1), 3);
        assert_eq!(table.keep_count(7, 0), 7);
    }

    #[test]
    fn test_keyed_decimation_exact_and_reproducible() {
        let source = particles(1000);
        let mut lod = LodManager::new(Camera::default());
        let first = lod.decimate(&source, 2);
        let second = lod.decimate(&source, 2);
        assert_eq!(first.len(), 100);
        assert_eq!(first, second);

        // sorted, no duplicates
        let metas: Vec<u64> = first.iter().map(|p| p.metadata).collect();
        assert!(metas.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_keyed_decimation_independent_of_order() {
        let source = particles(500);
        let mut reversed = source.clone();
        reversed.reverse();
        let mut lod = LodManager::new(Camera::default());
        let mut a: Vec<u64> = lod.decimate(&source, 1).iter().map(|p| p.metadata).collect();
        let mut b: Vec<u64> = lod.decimate(&reversed, 1).iter().map(|p| p.metadata).collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stride_decimation() {
        let source = particles(1000);
        let mut lod = LodManager::with_table(Camera::default(), LodTable::default(), DecimationStrategy::Stride);
        let kept = lod.decimate(&source, 2);
        assert_eq!(kept.len(), 100);
        assert_eq!(kept[0].metadata, 0);
        assert_eq!(kept[1].metadata, 10);
        assert_eq!(kept[99].metadata, 990);
    }

    #[test]
    fn test_full_detail_keeps_everything() {
        let source = particles(37);
        let mut lod = LodManager::new(Camera::default());
        assert_eq!(lod.decimate(&source, 0), source);
        assert!(lod.decimate(&[], 3).is_empty());
    }

    #[test]
    fn test_apply_lod_assigns_levels_by_distance() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        // near voxel centered at (5,5,5), farther one at (205,5,5)
        for i in 0..100u64 {
            index.insert(Particle::new(Vec3::new(1.0, 1.0, 1.0), 1, i));
            index.insert(Particle::new(Vec3::new(201.0, 1.0, 1.0), 2, 1000 + i));
        }

        let camera = Camera::look_at(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::Y);
        let mut lod = LodManager::new(camera);
        let output = lod.apply_lod(&index, index.all_voxels());

        assert_eq!(output.batches.len(), 2);
        let near = &output.batches[0];
        let far = &output.batches[1];
        assert_eq!(near.lod, 0);
        assert_eq!(near.len(), 100);
        assert_eq!(far.lod, 1);
        assert_eq!(far.len(), 50);
        assert_eq!(output.particles.len(), 150);
        assert_eq!(output.stats.particles_in, 200);
        assert_eq!(output.stats.voxels_per_level, vec![1, 1, 0, 0]);
        assert!(output.particles[far.particles.start..].iter().all(|p| p.category == 2));
    }

    #[test]
    fn test_apply_lod_empty() {
        let index = SpatialIndex::new(10.0).unwrap();
        let mut lod = LodManager::new(Camera::default());
        let output = lod.apply_lod(&index, index.all_voxels());
        assert!(output.batches.is_empty());
        assert_eq!(output.stats.kept_fraction(), 1.0);
    }
}
