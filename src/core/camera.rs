//! Look-at camera supplied by the UI layer
//!
//! The spatial engine only ever reads a camera. It is passed by reference
//! into the culler and the LOD manager once per interaction event.

use crate::core::types::{Vec3, Mat4};

/// Smallest vector length treated as non-zero when building a view basis
const MIN_AXIS_LENGTH: f32 = 1e-6;

/// Camera with position, look-at target, and projection parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    /// World position
    pub position: Vec3,
    /// Point the camera looks at
    pub target: Vec3,
    /// Up hint (need not be orthogonal to the view direction)
    pub up: Vec3,
    /// Vertical field of view in degrees
    pub fov_y_degrees: f32,
    /// Aspect ratio (width / height)
    pub aspect: f32,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
}

impl Camera {
    /// Create camera looking at a target with default projection
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        Self {
            position,
            target,
            up,
            fov_y_degrees: 60.0,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 5000.0,
        }
    }

    /// Builder-style projection override
    pub fn with_projection(mut self, fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        self.fov_y_degrees = fov_y_degrees;
        self.aspect = aspect;
        self.near = near;
        self.far = far;
        self
    }

    /// Unnormalized view vector (target - position)
    pub fn view_vector(&self) -> Vec3 {
        self.target - self.position
    }

    /// Normalized forward direction, or None for a zero-length view vector
    pub fn forward(&self) -> Option<Vec3> {
        let v = self.view_vector();
        (v.is_finite() && v.length() > MIN_AXIS_LENGTH).then(|| v.normalize())
    }

    /// Distance from the camera to a point
    pub fn distance_to(&self, point: Vec3) -> f32 {
        self.position.distance(point)
    }

    /// Check whether view/projection math is well defined for this camera.
    ///
    /// Degenerate cases: zero-length view or up vector, up parallel to the
    /// view direction, non-finite components, fov outside (0, 180) degrees,
    /// non-positive aspect or near plane, far <= near.
    pub fn is_degenerate(&self) -> bool {
        let Some(forward) = self.forward() else {
            return true;
        };
        if !self.up.is_finite() || self.up.length() <= MIN_AXIS_LENGTH {
            return true;
        }
        if forward.cross(self.up.normalize()).length() <= MIN_AXIS_LENGTH {
            return true;
        }
        let projection_ok = self.fov_y_degrees.is_finite()
            && self.fov_y_degrees > 0.0
            && self.fov_y_degrees < 180.0
            && self.aspect.is_finite()
            && self.aspect > 0.0
            && self.near.is_finite()
            && self.near > 0.0
            && self.far.is_finite()
            && self.far > self.near;
        !projection_ok
    }

    /// Get view matrix (world to camera space), None if degenerate
    pub fn view_matrix(&self) -> Option<Mat4> {
        if self.is_degenerate() {
            return None;
        }
        Some(Mat4::look_at_rh(self.position, self.target, self.up))
    }

    /// Get projection matrix (camera to clip space, OpenGL depth range)
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y_degrees.to_radians(), self.aspect, self.near, self.far)
    }

    /// Get combined view-projection matrix, None if degenerate
    pub fn view_projection(&self) -> Option<Mat4> {
        self.view_matrix().map(|view| self.projection_matrix() * view)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 0.0, 100.0), Vec3::ZERO, Vec3::Y)
    }
}
