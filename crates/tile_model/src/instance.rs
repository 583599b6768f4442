use std::path::{Path, PathBuf};

use crate::error::{ModelError, Result};
use crate::index::TileIndex;
use crate::scale::Scale3D;

/// Name of a layer of tiles; each tile manager reads a single layer.
pub type LayerId = String;

/// A tile advertised by a tile source: where it is and how to fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileInstance {
    pub tile_index: TileIndex,
    pub layer_id: LayerId,
    pub url: String,
}

impl TileInstance {
    pub fn new(tile_index: TileIndex, layer_id: impl Into<LayerId>, url: impl Into<String>) -> Self {
        Self {
            tile_index,
            layer_id: layer_id.into(),
            url: url.into(),
        }
    }
}

/// `x_y_z`, the file stem of a tile on disk.
pub fn tile_file_stem(index: &TileIndex) -> String {
    format!("{}_{}_{}", index.x(), index.y(), index.z())
}

pub fn parse_tile_file_stem(scale: Scale3D, stem: &str) -> Result<TileIndex> {
    let invalid = || ModelError::InvalidTileName(stem.to_string());

    let mut parts = stem.split('_');
    let mut next = || -> Result<i64> {
        parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())
    };

    let (x, y, z) = (next()?, next()?, next()?);
    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok(TileIndex::new(scale, x, y, z))
}

/// Directory holding one layer's tiles at one scale: `root/layer/_010_010_010`.
pub fn tile_directory(root: &Path, layer_id: &str, scale: Scale3D) -> PathBuf {
    root.join(layer_id).join(scale.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_round_trip_with_negatives() {
        let scale = Scale3D::cube(10).unwrap();
        let index = TileIndex::new(scale, -3, 418_299, 0);

        let stem = tile_file_stem(&index);
        assert_eq!(stem, "-3_418299_0");
        assert_eq!(parse_tile_file_stem(scale, &stem).unwrap(), index);
    }

    #[test]
    fn test_rejects_malformed_stems() {
        let scale = Scale3D::cube(10).unwrap();
        for stem in ["1_2", "1_2_3_4", "a_2_3", ""] {
            assert!(parse_tile_file_stem(scale, stem).is_err(), "{stem}");
        }
    }

    #[test]
    fn test_tile_directory() {
        let dir = tile_directory(Path::new("/data"), "anot1", Scale3D::cube(10).unwrap());
        assert_eq!(dir, PathBuf::from("/data/anot1/_010_010_010"));
    }
}
