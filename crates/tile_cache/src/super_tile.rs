use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use tile_model::{Aabb, AnnotationTileContents, PointCloudTileContents, TileContents, TileIndex};

use crate::error::TileError;
use crate::utm_tile::UtmTile;

/// What a super tile needs to know about the contents of its tiles.
pub trait LayerContents: Send + Sync + 'static {
    /// Points for point clouds, annotations for annotation tiles.
    fn object_count(&self) -> usize;

    fn bounding_box(&self) -> Option<Aabb>;
}

impl LayerContents for AnnotationTileContents {
    fn object_count(&self) -> usize {
        self.annotations.len()
    }

    fn bounding_box(&self) -> Option<Aabb> {
        AnnotationTileContents::bounding_box(self)
    }
}

impl LayerContents for PointCloudTileContents {
    fn object_count(&self) -> usize {
        self.point_count()
    }

    fn bounding_box(&self) -> Option<Aabb> {
        PointCloudTileContents::bounding_box(self)
    }
}

impl LayerContents for TileContents {
    fn object_count(&self) -> usize {
        TileContents::object_count(self)
    }

    fn bounding_box(&self) -> Option<Aabb> {
        TileContents::bounding_box(self)
    }
}

struct Loaded<C> {
    is_loaded: bool,
    object_count: usize,
    contents: Vec<Arc<C>>,
}

/// Zero or more tiles within one contiguous volume, the index of the super
/// tile at super tile scale. Tiles can be added until the contents are
/// loaded, never removed. The volume is inclusive at the low edges and
/// exclusive at the high edges.
pub struct SuperTile<C> {
    index: TileIndex,
    tiles: RwLock<Vec<Arc<UtmTile<C>>>>,
    loaded: Mutex<Loaded<C>>,
}

impl<C: LayerContents> SuperTile<C> {
    pub fn new(index: TileIndex) -> Self {
        Self {
            index,
            tiles: RwLock::new(Vec::new()),
            loaded: Mutex::new(Loaded {
                is_loaded: false,
                object_count: 0,
                contents: Vec::new(),
            }),
        }
    }

    #[inline]
    pub fn index(&self) -> TileIndex {
        self.index
    }

    pub fn bounding_box(&self) -> Aabb {
        self.index.bounding_box()
    }

    /// Super tiles need not be filled densely; add only tiles that exist.
    ///
    /// Refused once loaded, for a duplicate index, or for a tile outside this volume.
    pub fn add_tile(&self, tile: Arc<UtmTile<C>>) -> bool {
        if self.is_loaded() {
            return false;
        }

        let mut tiles = self.tiles.write();
        if tiles.iter().any(|t| t.index() == tile.index()) {
            return false;
        }

        if tile.super_tile_index(self.index.scale()) != self.index {
            return false;
        }

        tiles.push(tile);
        true
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.read().len()
    }

    pub fn tiles(&self) -> Vec<Arc<UtmTile<C>>> {
        self.tiles.read().clone()
    }

    /// Load every tile concurrently. Loads once; call `add_tile` first.
    /// Any tile failure fails the whole call and leaves the super tile unloaded.
    pub async fn load_contents(&self) -> Result<(), TileError> {
        if self.is_loaded() {
            return Ok(());
        }

        let tiles = self.tiles();
        let contents = try_join_all(tiles.iter().map(|t| t.load())).await?;
        let object_count = contents.iter().map(|c| c.object_count()).sum();

        let mut loaded = self.loaded.lock();
        loaded.is_loaded = true;
        loaded.object_count = object_count;
        loaded.contents = contents;

        tracing::debug!(
            super_tile = %self.index,
            tiles = tiles.len(),
            objects = object_count,
            "Super tile contents loaded"
        );
        Ok(())
    }

    /// Reset to the initial state, unloading every tile.
    pub fn unload_contents(&self) {
        for tile in self.tiles.read().iter() {
            tile.unload();
        }

        let mut loaded = self.loaded.lock();
        loaded.is_loaded = false;
        loaded.object_count = 0;
        loaded.contents.clear();
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_loaded
    }

    /// Zero until loaded.
    pub fn object_count(&self) -> usize {
        self.loaded.lock().object_count
    }

    pub fn contents(&self) -> Vec<Arc<C>> {
        self.loaded.lock().contents.clone()
    }

    /// Union of the loaded contents' boxes.
    pub fn contents_bounding_box(&self) -> Option<Aabb> {
        self.loaded
            .lock()
            .contents
            .iter()
            .filter_map(|c| c.bounding_box())
            .reduce(|a, b| a.union(&b))
    }
}
