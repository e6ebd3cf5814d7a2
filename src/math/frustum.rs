//! View frustum for culling

use crate::core::camera::Camera;
use crate::core::types::{Mat4, Vec3, Vec4};
use super::aabb::Aabb;

/// A plane `normal · p + distance = 0` with unit normal
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Signed distance from point to plane (positive = inside)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Normalize a raw `(a, b, c, d)` row combination.
    /// Returns None when the normal vanishes or anything is non-finite.
    fn from_coefficients(v: Vec4) -> Option<Self> {
        let normal = v.truncate();
        let len = normal.length();
        if !len.is_finite() || len <= f32::EPSILON || !v.w.is_finite() {
            return None;
        }
        Some(Self { normal: normal / len, distance: v.w / len })
    }
}

/// View frustum with 6 planes (Near, Far, Left, Right, Top, Bottom)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract frustum planes from a view-projection matrix (Gribb/Hartmann).
    /// Returns None for singular matrices.
    pub fn from_view_projection(vp: &Mat4) -> Option<Self> {
        let r0 = vp.row(0);
        let r1 = vp.row(1);
        let r2 = vp.row(2);
        let r3 = vp.row(3);

        Some(Self {
            planes: [
                Plane::from_coefficients(r3 + r2)?, // near
                Plane::from_coefficients(r3 - r2)?, // far
                Plane::from_coefficients(r3 + r0)?, // left
                Plane::from_coefficients(r3 - r0)?, // right
                Plane::from_coefficients(r3 - r1)?, // top
                Plane::from_coefficients(r3 + r1)?, // bottom
            ],
        })
    }

    /// Frustum of a camera, or None if the camera is degenerate
    pub fn from_camera(camera: &Camera) -> Option<Self> {
        Self::from_view_projection(&camera.view_projection()?)
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Conservative AABB test.
    ///
    /// The box is rejected only when its positive vertex lies more than
    /// `epsilon` behind some plane, so boxes straddling a plane are kept.
    pub fn intersects_aabb(&self, aabb: &Aabb, epsilon: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(aabb.positive_vertex(plane.normal)) >= -epsilon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::look_at(Vec3::new(0.0, 0.0, 50.0), Vec3::ZERO, Vec3::Y)
    }

    #[test]
    fn test_plane_distance() {
        let plane = Plane::new(Vec3::Y, 0.0);
        assert_eq!(plane.distance_to_point(Vec3::new(0.0, 5.0, 0.0)), 5.0);
        assert_eq!(plane.distance_to_point(Vec3::new(0.0, -3.0, 0.0)), -3.0);
    }

    #[test]
    fn test_planes_are_normalized() {
        let frustum = Frustum::from_camera(&camera()).unwrap();
        for plane in &frustum.planes {
            assert!((plane.normal.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_frustum_contains_target() {
        let frustum = Frustum::from_camera(&camera()).unwrap();
        assert!(frustum.contains_point(Vec3::ZERO));
        // behind the camera
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 60.0)));
    }

    #[test]
    fn test_orthographic_extraction() {
        let proj = Mat4::orthographic_rh_gl(-1.0, 1.0, -1.0, 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let frustum = Frustum::from_view_projection(&(proj * view)).unwrap();
        assert!(frustum.contains_point(Vec3::ZERO));
        assert!(!frustum.contains_point(Vec3::new(3.0, 0.0, 0.0)));
    }

    #[test]
    fn test_aabb_straddling_plane_is_kept() {
        let frustum = Frustum::from_camera(&camera()).unwrap();
        // far plane sits near z = 50 - 5000
        let straddling = Aabb::new(Vec3::new(-1.0, -1.0, -5100.0), Vec3::new(1.0, 1.0, -4900.0));
        let beyond = Aabb::new(Vec3::new(-1.0, -1.0, -5300.0), Vec3::new(1.0, 1.0, -5200.0));
        assert!(frustum.intersects_aabb(&straddling, 0.0));
        assert!(!frustum.intersects_aabb(&beyond, 0.0));
    }

    #[test]
    fn test_epsilon_keeps_boxes_near_plane() {
        let frustum = Frustum::from_camera(&camera()).unwrap();
        // just behind the near plane at z = 49.9
        let near_miss = Aabb::new(Vec3::new(-0.01, -0.01, 49.905), Vec3::new(0.01, 0.01, 49.91));
        assert!(!frustum.intersects_aabb(&near_miss, 0.0));
        assert!(frustum.intersects_aabb(&near_miss, 0.1));
    }

    #[test]
    fn test_singular_matrix_has_no_frustum() {
        assert!(Frustum::from_view_projection(&Mat4::ZERO).is_none());
        assert!(Frustum::from_view_projection(&Mat4::from_cols_array(&[f32::NAN; 16])).is_none());
    }
}
