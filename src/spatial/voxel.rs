//! Voxel identifiers and per-voxel metadata

use std::ops::Range;

use crate::core::types::{IVec3, Vec3};
use crate::math::Aabb;

/// Integer coordinate of a grid cell
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoxelId {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelId {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Cell containing a world position: `floor(p / cell_size)` per axis.
    /// Out-of-range values saturate; NaN maps to 0.
    pub fn from_point(p: Vec3, cell_size: f32) -> Self {
        Self {
            x: (p.x / cell_size).floor() as i32,
            y: (p.y / cell_size).floor() as i32,
            z: (p.z / cell_size).floor() as i32,
        }
    }

    /// World-space bounds of this cell
    pub fn bounds(&self, cell_size: f32) -> Aabb {
        let min = self.as_ivec3().as_vec3() * cell_size;
        Aabb::new(min, min + Vec3::splat(cell_size))
    }

    pub fn as_ivec3(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }
}

impl From<IVec3> for VoxelId {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// A populated grid cell.
///
/// `start`/`len` index the owning index's particle store and are only
/// meaningful for the index that produced this voxel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Voxel {
    pub id: VoxelId,
    pub bounds: Aabb,
    pub start: usize,
    pub len: usize,
}

impl Voxel {
    pub(crate) fn new(id: VoxelId, cell_size: f32) -> Self {
        Self { id, bounds: id.bounds(cell_size), start: 0, len: 0 }
    }

    pub fn center(&self) -> Vec3 {
        self.bounds.center()
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_point() {
        assert_eq!(VoxelId::from_point(Vec3::new(1.0, 2.0, 3.0), 10.0), VoxelId::new(0, 0, 0));
        assert_eq!(VoxelId::from_point(Vec3::new(15.0, 16.0, 17.0), 10.0), VoxelId::new(1, 1, 1));
        assert_eq!(VoxelId::from_point(Vec3::new(-0.5, -10.0, 10.0), 10.0), VoxelId::new(-1, -1, 1));
    }

    #[test]
    fn test_from_point_saturates() {
        let id = VoxelId::from_point(Vec3::new(f32::MAX, f32::MIN, f32::NAN), 1e-3);
        assert_eq!(id, VoxelId::new(i32::MAX, i32::MIN, 0));
    }

    #[test]
    fn test_bounds_contain_member_points() {
        let p = Vec3::new(-23.5, 4.0, 99.9);
        let id = VoxelId::from_point(p, 10.0);
        let bounds = id.bounds(10.0);
        assert!(bounds.contains_point(p));
        assert_eq!(bounds.min, Vec3::new(-30.0, 0.0, 90.0));
        assert_eq!(bounds.size(), Vec3::splat(10.0));
    }

    #[test]
    fn test_voxel_range() {
        let mut voxel = Voxel::new(VoxelId::new(1, 2, 3), 5.0);
        assert!(voxel.is_empty());
        voxel.start = 4;
        voxel.len = 3;
        assert_eq!(voxel.range(), 4..7);
        assert_eq!(voxel.center(), Vec3::new(7.5, 12.5, 17.5));
    }
}
