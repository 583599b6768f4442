use std::sync::Arc;

use thiserror::Error;
use tile_model::{DVec3, ModelError, UtmZone};

/// Errors surfaced by tiles and tile managers.
///
/// Cloneable so that one failed fetch can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// The tile's loader failed. Displays the loader's own message.
    #[error("{0:#}")]
    Fetch(Arc<anyhow::Error>),

    #[error("busy loading tiles")]
    Busy,

    #[error("checkCoordinateSystem failed on first tile at: {zone} {origin}")]
    CoordinateSystem { zone: UtmZone, origin: DVec3 },

    #[error("tile source query failed: {0:#}")]
    Source(Arc<anyhow::Error>),

    #[error(transparent)]
    Model(Arc<ModelError>),
}

impl TileError {
    pub fn fetch(e: anyhow::Error) -> Self {
        TileError::Fetch(Arc::new(e))
    }

    pub fn query(e: anyhow::Error) -> Self {
        TileError::Source(Arc::new(e))
    }
}

impl From<ModelError> for TileError {
    fn from(e: ModelError) -> Self {
        TileError::Model(Arc::new(e))
    }
}
