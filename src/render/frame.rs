//! Per-frame visibility pipeline: cull, assign LOD, emit particles
//!
//! The output particles live in the memory manager's frame arena, which is
//! reset at the start of every recomputation. Frames are only recomputed when
//! the camera or the index contents change.

use crate::core::camera::Camera;
use crate::core::config::EngineConfig;
use crate::core::types::Result;
use crate::memory::MemoryManager;
use crate::spatial::{Particle, SpatialIndex, Voxel};
use crate::streaming::lod::{Batch, LodManager, LodStats};
use super::culling::VisibilityCuller;

/// Counters for the last computed frame
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub total_voxels: usize,
    pub visible_voxels: usize,
    /// Batches that made it into the arena
    pub emitted_batches: usize,
    /// Set when the arena filled up before every visible voxel was emitted
    pub truncated: bool,
    /// False when the previous frame was returned unchanged
    pub recomputed: bool,
    pub lod: LodStats,
}

/// Output of [`FrameBuilder::build`], valid until the next build
#[derive(Clone, Copy, Debug)]
pub struct Frame<'a> {
    /// Visible voxels, nearest first
    pub batches: &'a [Batch],
    /// Decimated particles; each batch's range indexes into this
    pub particles: &'a [Particle],
    pub stats: &'a FrameStats,
}

impl<'a> Frame<'a> {
    /// Particles as raw bytes for upload
    pub fn as_bytes(&self) -> &'a [u8] {
        bytemuck::cast_slice(self.particles)
    }

    pub fn batch_particles(&self, batch: &Batch) -> &'a [Particle] {
        &self.particles[batch.particles.clone()]
    }
}

#[derive(Clone, Copy, PartialEq)]
struct FrameKey {
    camera: Camera,
    index: u64,
    generation: u64,
    voxels: usize,
    cell_size: f32,
}

/// Builds frames, reusing its buffers between calls
pub struct FrameBuilder {
    culler: VisibilityCuller,
    lod: LodManager,
    visible: Vec<(f32, Voxel)>,
    batches: Vec<Batch>,
    stats: FrameStats,
    last: Option<FrameKey>,
}

impl FrameBuilder {
    pub fn new(config: &EngineConfig, camera: Camera) -> Result<Self> {
        Ok(Self {
            culler: VisibilityCuller::with_epsilon(camera, config.plane_epsilon()),
            lod: LodManager::with_table(camera, config.lod_table()?, config.decimation),
            visible: Vec::new(),
            batches: Vec::new(),
            stats: FrameStats::default(),
            last: None,
        })
    }

    /// Force the next build to recompute
    pub fn invalidate(&mut self) {
        self.last = None;
    }

    pub fn lod(&self) -> &LodManager {
        &self.lod
    }

    /// Cull and decimate `index` for `camera`.
    ///
    /// The frame arena is owned by the builder between calls; anything else
    /// that allocates from it must call [`invalidate`](Self::invalidate).
    pub fn build<'a>(
        &'a mut self,
        index: &SpatialIndex,
        camera: &Camera,
        memory: &'a mut MemoryManager,
    ) -> Frame<'a> {
        let key = FrameKey {
            camera: *camera,
            index: index.id(),
            generation: index.generation(),
            voxels: index.total_voxels(),
            cell_size: index.cell_size(),
        };

        if self.last == Some(key) {
            self.stats.recomputed = false;
        } else {
            self.recompute(index, camera, memory);
            self.last = Some(key);
        }

        Frame {
            batches: &self.batches,
            particles: memory.arena().filled(),
            stats: &self.stats,
        }
    }

    fn recompute(&mut self, index: &SpatialIndex, camera: &Camera, memory: &mut MemoryManager) {
        self.culler.set_camera(*camera);
        self.lod.update_camera(*camera);

        self.visible.clear();
        for voxel in index.all_voxels() {
            if self.culler.test_aabb(&voxel.bounds) {
                self.visible.push((camera.position.distance_squared(voxel.center()), *voxel));
            }
        }
        // front-to-back
        self.visible.sort_by(|a, b| a.0.total_cmp(&b.0));

        let levels = self.lod.table().levels().len();
        self.stats.lod.reset(levels);
        self.stats.total_voxels = index.total_voxels();
        self.stats.visible_voxels = self.visible.len();
        self.stats.truncated = false;
        self.stats.recomputed = true;
        self.batches.clear();

        let (arena, index_pool) = memory.frame_parts();
        arena.reset();
        let mut selected = index_pool.get();

        for &(distance_sq, voxel) in &self.visible {
            let (lod, _) = self.lod.level_for(&voxel);
            let source = index.particles_of(&voxel);
            self.lod.select_indices(source, lod, &mut selected);

            let start = arena.used();
            let Some(region) = arena.alloc(selected.len()) else {
                log::warn!(
                    "Frame arena full ({} particles), dropped {} of {} visible voxels",
                    arena.capacity(),
                    self.visible.len() - self.batches.len(),
                    self.visible.len()
                );
                self.stats.truncated = true;
                break;
            };
            for (slot, &i) in region.iter_mut().zip(&selected) {
                *slot = source[i as usize];
            }

            self.stats.lod.record(lod, source.len(), selected.len());
            self.batches.push(Batch {
                voxel: voxel.id,
                visible: true,
                lod,
                distance: distance_sq.sqrt(),
                particles: start..start + selected.len(),
            });
        }
        index_pool.put(selected);
        self.stats.emitted_batches = self.batches.len();

        log::trace!(
            "Frame: {}/{} voxels visible, {} -> {} particles",
            self.stats.visible_voxels,
            self.stats.total_voxels,
            self.stats.lod.particles_in,
            self.stats.lod.particles_out
        );
    }
}
