//! Tile dimensions and grid arithmetic.
//!
//! Tiles are axis-aligned boxes in UTM space. All dimensions are metres.

use std::fmt;
use std::str::FromStr;

use glam::DVec3;

use crate::error::{ModelError, Result};

/// Edge lengths of one tile in metres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scale3D {
    x: u32,
    y: u32,
    z: u32,
}

impl Scale3D {
    pub fn new(x: u32, y: u32, z: u32) -> Result<Self> {
        if x == 0 || y == 0 || z == 0 {
            return Err(ModelError::InvalidScale(format!("{},{},{}", x, y, z)));
        }

        Ok(Self { x, y, z })
    }

    /// Same edge length on every axis.
    pub fn cube(size: u32) -> Result<Self> {
        Self::new(size, size, size)
    }

    #[inline]
    pub fn x(&self) -> u32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> u32 {
        self.y
    }

    #[inline]
    pub fn z(&self) -> u32 {
        self.z
    }

    pub fn is_multiple_of(&self, that: &Scale3D) -> bool {
        self.x % that.x == 0 && self.y % that.y == 0 && self.z % that.z == 0
    }

    pub fn volume(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    pub fn to_vector(&self) -> DVec3 {
        DVec3::new(self.x as f64, self.y as f64, self.z as f64)
    }
}

/// The canonical form leads with an underscore, matching the scale names
/// used by the tile service: `_010_010_010`.
impl fmt::Display for Scale3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{:03}_{:03}_{:03}", self.x, self.y, self.z)
    }
}

/// Accepts `_010_010_010` or `10,10,10`.
impl FromStr for Scale3D {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let parts: Vec<&str> = match trimmed.strip_prefix('_') {
            Some(rest) => rest.split('_').collect(),
            None => trimmed.split(',').map(str::trim).collect(),
        };

        let invalid = || ModelError::InvalidScale(s.to_string());

        if parts.len() != 3 {
            return Err(invalid());
        }

        let mut dims = [0u32; 3];
        for (dim, part) in dims.iter_mut().zip(parts) {
            *dim = part.parse().map_err(|_| invalid())?;
        }

        Self::new(dims[0], dims[1], dims[2]).map_err(|_| invalid())
    }
}

/// Grid cell containing `coord` for cells of `size` metres.
pub fn coord_to_index(coord: f64, size: f64) -> Result<i64> {
    let floor = (coord / size).floor();

    if !floor.is_finite() || size <= 0.0 {
        return Err(ModelError::IndexOutOfBounds { coord, size });
    }

    // Very small negative coords can underflow to -0.0 and floor to zero.
    if floor == 0.0 && coord < 0.0 {
        Ok(-1)
    } else {
        Ok(floor as i64)
    }
}

#[inline]
pub fn index_to_coord(index: i64, size: f64) -> f64 {
    index as f64 * size
}

/// Tile and super tile dimensions, fixed for the lifetime of the application.
/// Super tile boundaries coincide with tile boundaries, with no overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleProvider {
    pub utm_tile_scale: Scale3D,
    pub super_tile_scale: Scale3D,
}

impl ScaleProvider {
    pub fn new(utm_tile_scale: Scale3D, super_tile_scale: Scale3D) -> Result<Self> {
        if !super_tile_scale.is_multiple_of(&utm_tile_scale) {
            return Err(ModelError::IncompatibleScales {
                tile: utm_tile_scale,
                super_tile: super_tile_scale,
            });
        }

        Ok(Self {
            utm_tile_scale,
            super_tile_scale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_display_and_parse() {
        let scale = Scale3D::new(8, 8, 10).unwrap();
        assert_eq!(scale.to_string(), "_008_008_010");
        assert_eq!("_008_008_010".parse::<Scale3D>().unwrap(), scale);
        assert_eq!("8, 8, 10".parse::<Scale3D>().unwrap(), scale);

        assert!("10,10".parse::<Scale3D>().is_err());
        assert!("0,10,10".parse::<Scale3D>().is_err());
        assert!("_a_010_010".parse::<Scale3D>().is_err());
    }

    #[test]
    fn test_is_multiple_of() {
        let tile = Scale3D::cube(10).unwrap();
        let super_tile = Scale3D::new(30, 30, 10).unwrap();

        assert!(super_tile.is_multiple_of(&tile));
        assert!(!tile.is_multiple_of(&super_tile));
        assert_eq!(super_tile.volume(), 9000);
    }

    #[test]
    fn test_coord_to_index() {
        assert_eq!(coord_to_index(0.0, 10.0).unwrap(), 0);
        assert_eq!(coord_to_index(9.999, 10.0).unwrap(), 0);
        assert_eq!(coord_to_index(10.0, 10.0).unwrap(), 1);
        assert_eq!(coord_to_index(-0.001, 10.0).unwrap(), -1);
        assert_eq!(coord_to_index(-1e-320, 10.0).unwrap(), -1);
        assert!(coord_to_index(1.0, 0.0).is_err());
        assert!(coord_to_index(f64::NAN, 10.0).is_err());
    }

    #[test]
    fn test_scale_provider_rejects_misaligned_super_tiles() {
        let tile = Scale3D::cube(10).unwrap();
        assert!(ScaleProvider::new(tile, Scale3D::cube(30).unwrap()).is_ok());

        let err = ScaleProvider::new(tile, Scale3D::cube(25).unwrap()).unwrap_err();
        assert!(matches!(err, ModelError::IncompatibleScales { .. }));
    }
}
