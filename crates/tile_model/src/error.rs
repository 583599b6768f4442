use thiserror::Error;

use crate::scale::Scale3D;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid tile scale '{0}'")]
    InvalidScale(String),

    #[error("super tile scale {super_tile} must be a multiple of utm tile scale {tile}")]
    IncompatibleScales { tile: Scale3D, super_tile: Scale3D },

    #[error("out-of-bounds arguments in coord_to_index({coord}, {size})")]
    IndexOutOfBounds { coord: f64, size: f64 },

    #[error("point cloud has {points} coordinates and {colors} color values; both must be equal multiples of 3")]
    PointCloudShape { points: usize, colors: usize },

    #[error("invalid UTM zone '{0}'")]
    InvalidZone(String),

    #[error("({0}, {1}) is outside the UTM domain")]
    OutOfUtmRange(f64, f64),

    #[error("invalid tile file name '{0}'")]
    InvalidTileName(String),

    #[error("malformed tile message: {0}")]
    Wire(#[from] std::io::Error),

    #[error("malformed annotation document: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
