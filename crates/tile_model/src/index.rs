use std::fmt;

use glam::DVec3;

use crate::bounds::Aabb;
use crate::error::Result;
use crate::scale::{coord_to_index, index_to_coord, Scale3D};

/// Address of a voxel in UTM space at a given scale.
///
/// Equality and hashing include the scale, so indexes at tile scale and at
/// super tile scale never collide as map keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileIndex {
    scale: Scale3D,
    x: i64,
    y: i64,
    z: i64,
}

impl TileIndex {
    pub fn new(scale: Scale3D, x: i64, y: i64, z: i64) -> Self {
        Self { scale, x, y, z }
    }

    /// Index of the tile containing `p`.
    pub fn from_point(scale: Scale3D, p: DVec3) -> Result<Self> {
        Ok(Self {
            scale,
            x: coord_to_index(p.x, scale.x() as f64)?,
            y: coord_to_index(p.y, scale.y() as f64)?,
            z: coord_to_index(p.z, scale.z() as f64)?,
        })
    }

    #[inline]
    pub fn scale(&self) -> Scale3D {
        self.scale
    }

    #[inline]
    pub fn x(&self) -> i64 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> i64 {
        self.y
    }

    #[inline]
    pub fn z(&self) -> i64 {
        self.z
    }

    /// Same scale, different cell.
    pub fn with_indices(&self, x: i64, y: i64, z: i64) -> Self {
        Self::new(self.scale, x, y, z)
    }

    /// Low corner of the tile in UTM metres.
    pub fn origin(&self) -> DVec3 {
        DVec3::new(
            index_to_coord(self.x, self.scale.x() as f64),
            index_to_coord(self.y, self.scale.y() as f64),
            index_to_coord(self.z, self.scale.z() as f64),
        )
    }

    pub fn bounding_box(&self) -> Aabb {
        let origin = self.origin();
        Aabb::new(origin, origin + self.scale.to_vector())
    }

    /// Index at `super_scale` of the volume containing this tile's origin.
    pub fn super_tile_index(&self, super_scale: Scale3D) -> TileIndex {
        let down = |index: i64, size: u32, super_size: u32| {
            (index * size as i64).div_euclid(super_size as i64)
        };

        TileIndex {
            scale: super_scale,
            x: down(self.x, self.scale.x(), super_scale.x()),
            y: down(self.y, self.scale.y(), super_scale.y()),
            z: down(self.z, self.scale.z(), super_scale.z()),
        }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn scale(size: u32) -> Scale3D {
        Scale3D::cube(size).unwrap()
    }

    #[test]
    fn test_origin_and_bounding_box() {
        let index = TileIndex::new(scale(10), 3, 7, -1);
        assert_eq!(index.origin(), DVec3::new(30.0, 70.0, -10.0));
        assert_eq!(index.bounding_box().max, DVec3::new(40.0, 80.0, 0.0));
        assert_eq!(index.to_string(), "3,7,-1");
    }

    #[test]
    fn test_from_point_matches_bounding_box() {
        let p = DVec3::new(552_013.4, 4_182_999.9, -0.5);
        let index = TileIndex::from_point(scale(10), p).unwrap();
        assert!(index.bounding_box().contains(p));
    }

    #[test]
    fn test_super_tile_index() {
        let tile = TileIndex::new(scale(10), 5, -1, 0);
        let st = tile.super_tile_index(scale(30));
        assert_eq!((st.x(), st.y(), st.z()), (1, -1, 0));
        assert_eq!(st.scale(), scale(30));

        // Agrees with locating the origin directly.
        assert_eq!(st, TileIndex::from_point(scale(30), tile.origin()).unwrap());
    }

    #[test]
    fn test_equality_includes_scale() {
        let a = TileIndex::new(scale(10), 1, 2, 3);
        let b = TileIndex::new(scale(8), 1, 2, 3);
        assert_ne!(a, b);

        let set: HashSet<TileIndex> = [a, b, a.with_indices(1, 2, 3)].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
