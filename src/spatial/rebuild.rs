//! Re-bucketing an index under a new cell size

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::types::Result;
use super::index::SpatialIndex;

/// Shared cancellation flag, checked cooperatively by long-running work
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl SpatialIndex {
    /// Build a new index holding the same particles with a different cell size.
    ///
    /// The token is checked once per source voxel. Returns `Ok(None)` when
    /// cancelled; `self` is never modified.
    pub fn rebuilt(&self, cell_size: f32, cancel: &CancelToken) -> Result<Option<SpatialIndex>> {
        self.rebuilt_with_progress(cell_size, cancel, |_, _| {})
    }

    /// Like [`rebuilt`](Self::rebuilt), calling `progress(done, total)` after
    /// each source voxel is copied
    pub fn rebuilt_with_progress(
        &self,
        cell_size: f32,
        cancel: &CancelToken,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<Option<SpatialIndex>> {
        let mut rebuilt = SpatialIndex::new(cell_size)?;
        let total = self.total_voxels();
        for (done, voxel) in self.all_voxels().enumerate() {
            if cancel.is_cancelled() {
                log::debug!("Rebuild to cell size {} cancelled after {}/{} voxels", cell_size, done, total);
                return Ok(None);
            }
            rebuilt.extend(self.particles_of(voxel).iter().copied());
            progress(done + 1, total);
        }
        if cancel.is_cancelled() {
            return Ok(None);
        }
        rebuilt.compact();

        log::info!(
            "Rebuilt index: cell {} -> {}, {} -> {} voxels",
            self.cell_size(),
            cell_size,
            total,
            rebuilt.total_voxels()
        );
        Ok(Some(rebuilt))
    }
}
