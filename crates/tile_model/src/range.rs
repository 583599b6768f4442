use std::collections::HashSet;
use std::ops::RangeInclusive;

use glam::DVec3;

use crate::bounds::Aabb;
use crate::error::Result;
use crate::index::TileIndex;
use crate::scale::{coord_to_index, Scale3D};

/// Axis-aligned search volume in UTM metres. The corners may be given in any order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSearch {
    pub min_point: DVec3,
    pub max_point: DVec3,
}

impl RangeSearch {
    pub fn new(min_point: DVec3, max_point: DVec3) -> Self {
        Self { min_point, max_point }
    }

    fn index_ranges(&self, scale: Scale3D) -> Result<[RangeInclusive<i64>; 3]> {
        let a = TileIndex::from_point(scale, self.min_point)?;
        let b = TileIndex::from_point(scale, self.max_point)?;

        Ok([
            a.x().min(b.x())..=a.x().max(b.x()),
            a.y().min(b.y())..=a.y().max(b.y()),
            a.z().min(b.z())..=a.z().max(b.z()),
        ])
    }

    /// Every index at `scale` that intersects the search, in x-major order.
    pub fn enumerate_indexes(&self, scale: Scale3D) -> Result<Vec<TileIndex>> {
        let [xs, ys, zs] = self.index_ranges(scale)?;
        let mut indexes = Vec::new();

        for x in xs {
            for y in ys.clone() {
                for z in zs.clone() {
                    indexes.push(TileIndex::new(scale, x, y, z));
                }
            }
        }

        Ok(indexes)
    }

    /// Whether `index` (at its own scale) intersects the search.
    pub fn intersects(&self, index: &TileIndex) -> bool {
        match self.index_ranges(index.scale()) {
            Ok([xs, ys, zs]) => {
                xs.contains(&index.x()) && ys.contains(&index.y()) && zs.contains(&index.z())
            }
            Err(_) => false,
        }
    }
}

impl From<Aabb> for RangeSearch {
    fn from(b: Aabb) -> Self {
        Self::new(b.min, b.max)
    }
}

/// Indexes intersecting any of `searches`, without duplicates, in first-seen order.
pub fn enumerate_intersecting(searches: &[RangeSearch], scale: Scale3D) -> Result<Vec<TileIndex>> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();

    for search in searches {
        for index in search.enumerate_indexes(scale)? {
            if seen.insert(index) {
                unique.push(index);
            }
        }
    }

    Ok(unique)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale() -> Scale3D {
        Scale3D::cube(10).unwrap()
    }

    #[test]
    fn test_enumerate_with_reversed_corners() {
        let search = RangeSearch::new(DVec3::new(19.0, 5.0, 0.0), DVec3::new(0.0, 0.0, 9.0));
        let indexes = search.enumerate_indexes(scale()).unwrap();

        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0], TileIndex::new(scale(), 0, 0, 0));
        assert_eq!(indexes[1], TileIndex::new(scale(), 1, 0, 0));
    }

    #[test]
    fn test_enumerate_intersecting_drops_duplicates() {
        let a = RangeSearch::new(DVec3::ZERO, DVec3::new(15.0, 0.0, 0.0));
        let b = RangeSearch::new(DVec3::new(12.0, 0.0, 0.0), DVec3::new(25.0, 0.0, 0.0));

        let indexes = enumerate_intersecting(&[a, b], scale()).unwrap();
        let xs: Vec<i64> = indexes.iter().map(|i| i.x()).collect();
        assert_eq!(xs, vec![0, 1, 2]);

        assert!(enumerate_intersecting(&[], scale()).unwrap().is_empty());
    }

    #[test]
    fn test_intersects() {
        let search = RangeSearch::new(DVec3::ZERO, DVec3::new(29.999, 9.0, 9.0));
        assert!(search.intersects(&TileIndex::new(scale(), 2, 0, 0)));
        assert!(!search.intersects(&TileIndex::new(scale(), 3, 0, 0)));
        assert!(!search.intersects(&TileIndex::new(scale(), 0, -1, 0)));
    }
}
