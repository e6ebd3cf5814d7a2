//! Capacity planning for per-frame work
//!
//! The number of work units (one per populated voxel) is expected to grow as
//! `sqrt(n) * log2(n)` in the particle count. The planner computes that
//! estimate, compares it with what the index actually produced, and sizes
//! memory and cells from it.

use crate::spatial::Particle;

/// Relative error accepted by [`validate`]
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Bytes per voxel record in memory estimates
pub const VOXEL_RECORD_BYTES: u64 = 32;

/// `round(sqrt(n) * log2(n))` for `n > 1`, else 1
pub fn estimate_batch_count(n: u64) -> u64 {
    if n <= 1 {
        return 1;
    }
    let n = n as f64;
    (n.sqrt() * n.log2()).round() as u64
}

/// Outcome of comparing an estimate with the observed count
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BatchStatus {
    WithinTolerance { relative_error: f64 },
    Warning { relative_error: f64 },
}

impl BatchStatus {
    pub fn relative_error(&self) -> f64 {
        match *self {
            BatchStatus::WithinTolerance { relative_error } | BatchStatus::Warning { relative_error } => {
                relative_error
            }
        }
    }

    pub fn is_within_tolerance(&self) -> bool {
        matches!(self, BatchStatus::WithinTolerance { .. })
    }
}

/// Estimates and checks batch counts against a tolerance
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchPlanner {
    tolerance: f64,
}

impl Default for BatchPlanner {
    fn default() -> Self {
        Self { tolerance: DEFAULT_TOLERANCE }
    }
}

impl BatchPlanner {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn estimate(&self, particle_count: u64) -> u64 {
        estimate_batch_count(particle_count)
    }

    /// Classify `|actual - estimate| / estimate`. A mismatch is logged, never an error.
    pub fn validate(&self, estimate: u64, actual: u64) -> BatchStatus {
        let relative_error = actual.abs_diff(estimate) as f64 / estimate.max(1) as f64;
        if relative_error <= self.tolerance {
            BatchStatus::WithinTolerance { relative_error }
        } else {
            log::warn!(
                "Batch count {} deviates {:.1}% from estimate {} (tolerance {:.1}%)",
                actual,
                relative_error * 100.0,
                estimate,
                self.tolerance * 100.0
            );
            BatchStatus::Warning { relative_error }
        }
    }
}

/// Validate with the default tolerance
pub fn validate(estimate: u64, actual: u64) -> BatchStatus {
    BatchPlanner::default().validate(estimate, actual)
}

/// Projected memory for a particle set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryEstimate {
    pub voxel_count: u64,
    pub voxel_bytes: u64,
    pub particle_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryEstimate {
    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Memory needed for `total_particles` spread at `particles_per_voxel`
pub fn estimate_memory(total_particles: u64, particles_per_voxel: u64) -> MemoryEstimate {
    let voxel_count = total_particles / particles_per_voxel.max(1);
    let voxel_bytes = voxel_count.saturating_mul(VOXEL_RECORD_BYTES);
    let particle_bytes = total_particles.saturating_mul(std::mem::size_of::<Particle>() as u64);
    MemoryEstimate {
        voxel_count,
        voxel_bytes,
        particle_bytes,
        total_bytes: voxel_bytes.saturating_add(particle_bytes),
    }
}

/// Cell size that yields roughly the estimated batch count when the
/// particles fill a cube of side `cbrt(total_particles)`.
///
/// None when either argument is zero.
pub fn optimal_cell_size(total_particles: u64, particles_per_voxel: u64) -> Option<f32> {
    if total_particles == 0 || particles_per_voxel == 0 {
        return None;
    }
    let voxels = (total_particles / particles_per_voxel).max(1);
    let batches = estimate_batch_count(voxels) as f64;
    let span = (total_particles as f64).cbrt();
    Some((span / batches.cbrt()) as f32)
}
