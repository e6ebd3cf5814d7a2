//! CPU-side frustum culling of voxels

use crate::core::camera::Camera;
use crate::math::{Aabb, Frustum};
use crate::spatial::Voxel;

/// Plane tolerance used when none is configured
pub const DEFAULT_PLANE_EPSILON: f32 = 1e-4;

/// Keeps the voxels whose bounds intersect a camera's view frustum.
///
/// The box holding the look-at target is always kept, even when the target
/// lies beyond the far plane or in front of the near plane. A degenerate
/// camera yields no frustum; the culler then keeps everything.
pub struct VisibilityCuller {
    camera: Camera,
    frustum: Option<Frustum>,
    epsilon: f32,
    reported_degenerate: bool,
}

impl VisibilityCuller {
    pub fn new(camera: Camera) -> Self {
        Self::with_epsilon(camera, DEFAULT_PLANE_EPSILON)
    }

    /// Boxes up to `epsilon` outside a plane still count as visible
    pub fn with_epsilon(camera: Camera, epsilon: f32) -> Self {
        let mut culler = Self {
            camera,
            frustum: None,
            epsilon: epsilon.max(0.0),
            reported_degenerate: false,
        };
        culler.set_camera(camera);
        culler
    }

    /// Recompute the frustum for a new camera
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
        self.frustum = Frustum::from_camera(&camera);
        if self.frustum.is_none() && !self.reported_degenerate {
            log::debug!("Degenerate camera {:?}, culling disabled", camera);
            self.reported_degenerate = true;
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// None while the camera is degenerate
    pub fn frustum(&self) -> Option<&Frustum> {
        self.frustum.as_ref()
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Conservative visibility test
    pub fn test_aabb(&self, aabb: &Aabb) -> bool {
        if aabb.contains_point(self.camera.target) {
            return true;
        }
        match &self.frustum {
            Some(frustum) => frustum.intersects_aabb(aabb, self.epsilon),
            None => true,
        }
    }

    /// Visible voxels, in input order
    pub fn cull<'a>(&self, voxels: impl IntoIterator<Item = &'a Voxel>) -> Vec<&'a Voxel> {
        let mut visible = Vec::new();
        self.cull_into(voxels, &mut visible);
        visible
    }

    /// Like [`cull`](Self::cull) but reuses `out` (cleared first)
    pub fn cull_into<'a>(&self, voxels: impl IntoIterator<Item = &'a Voxel>, out: &mut Vec<&'a Voxel>) {
        out.clear();
        out.extend(voxels.into_iter().filter(|voxel| self.test_aabb(&voxel.bounds)));
    }
}
