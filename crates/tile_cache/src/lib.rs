//! Tile lifecycle for UTM-addressed lidar and annotation tiles.
//!
//! - [`UtmTile`]: one tile, fetched lazily through an injected loader and cached until unloaded.
//! - [`SuperTile`]: the tiles of one larger volume, loaded and unloaded together.
//! - [`TileSource`]: where tile listings and bytes come from; [`FsTileSource`] reads a directory tree.
//! - [`TileManager`]: loads super tiles for range searches and evicts the least recently used.

pub mod error;
pub mod layers;
pub mod manager;
pub mod source;
pub mod super_tile;
pub mod utm_tile;

pub use self::error::TileError;
pub use self::layers::{AnnotationLayer, PointCloudLayer, TileLayer};
pub use self::manager::{
    AnnotationTileManager, PointCloudTileManager, TileEvent, TileManager, TileManagerConfig,
    TileManagerStats,
};
pub use self::source::{FsTileSource, TileSource, TILE_SEARCH_OFFSET};
pub use self::super_tile::{LayerContents, SuperTile};
pub use self::utm_tile::{AnnotationUtmTile, AnyUtmTile, PointCloudUtmTile, TileLoader, UtmTile};
