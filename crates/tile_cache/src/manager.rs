//! Loads tiles of one layer from a tile source, groups them into super tiles,
//! and keeps the number of loaded super tiles and objects within budget.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{try_join_all, FutureExt};
use parking_lot::{Mutex, RwLock};
use tile_model::range::enumerate_intersecting;
use tile_model::{
    Aabb, DVec3, LayerId, RangeSearch, ScaleProvider, TileIndex, TileInstance,
    UtmCoordinateSystem, UtmZone,
};
use tokio::sync::broadcast;

use crate::error::TileError;
use crate::layers::{check_coordinate_system, AnnotationLayer, PointCloudLayer, TileLayer};
use crate::source::{TileSource, TILE_SEARCH_OFFSET};
use crate::super_tile::SuperTile;
use crate::utm_tile::UtmTile;

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Configuration for a [`TileManager`].
#[derive(Debug, Clone)]
pub struct TileManagerConfig {
    /// Each manager gets all its data from a single layer of tiles.
    pub layer_id: LayerId,
    /// How many new super tiles one request loads, unless asked to load all.
    pub initial_super_tiles_to_load: usize,
    /// Sanity limit so that very sparse or empty super tiles don't pile up.
    pub maximum_super_tiles_to_load: usize,
    /// Loaded super tiles are trimmed back to this many points or annotations.
    pub maximum_objects_to_load: usize,
    /// Zone assumed for the coordinate system before any tile is read.
    pub default_utm_zone: UtmZone,
}

impl TileManagerConfig {
    fn with_defaults(layer_id: &str, maximum_objects_to_load: usize) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            initial_super_tiles_to_load: 4,
            maximum_super_tiles_to_load: 10_000,
            maximum_objects_to_load,
            default_utm_zone: UtmZone::new(10, true).unwrap_or(UtmZone::FALLBACK),
        }
    }

    pub fn annotations() -> Self {
        Self::with_defaults("anot1", 1_000)
    }

    pub fn point_cloud() -> Self {
        Self::with_defaults("base1", 100_000)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TileEvent {
    SuperTileLoaded { index: TileIndex, object_count: usize },
    SuperTileUnloaded { index: TileIndex },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileManagerStats {
    pub super_tiles: usize,
    pub loaded_super_tiles: usize,
    pub tiles: usize,
    pub objects: usize,
    pub object_name: &'static str,
}

impl fmt::Display for TileManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loaded {} of {} super tiles ({} tiles); {} {}",
            self.loaded_super_tiles, self.super_tiles, self.tiles, self.objects, self.object_name
        )
    }
}

/// Clears the loading flag however the load ends.
struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Super tiles are the unit of caching. All of a super tile's tiles are
/// discovered up front, then loaded and unloaded together.
pub struct TileManager<L: TileLayer> {
    config: TileManagerConfig,
    scales: ScaleProvider,
    layer: Arc<L>,
    source: Arc<dyn TileSource>,
    coordinate_system: Arc<RwLock<UtmCoordinateSystem>>,
    coordinate_system_initialized: AtomicBool,
    /// Every super tile we know about, loaded or not.
    super_tiles: DashMap<TileIndex, Arc<SuperTile<L::Contents>>>,
    /// Loaded super tiles, least recently used first.
    loaded_super_tiles: Mutex<VecDeque<TileIndex>>,
    // Only one load at a time; super tile state assumes it.
    is_loading: AtomicBool,
    loaded_objects_bounding_box: Mutex<Option<Aabb>>,
    events: broadcast::Sender<TileEvent>,
}

pub type AnnotationTileManager = TileManager<AnnotationLayer>;
pub type PointCloudTileManager = TileManager<PointCloudLayer>;

impl<L: TileLayer> TileManager<L> {
    pub fn new(
        config: TileManagerConfig,
        scales: ScaleProvider,
        layer: L,
        source: Arc<dyn TileSource>,
        coordinate_system: Arc<RwLock<UtmCoordinateSystem>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            scales,
            layer: Arc::new(layer),
            source,
            coordinate_system,
            coordinate_system_initialized: AtomicBool::new(false),
            super_tiles: DashMap::new(),
            loaded_super_tiles: Mutex::new(VecDeque::new()),
            is_loading: AtomicBool::new(false),
            loaded_objects_bounding_box: Mutex::new(None),
            events,
        }
    }

    pub fn config(&self) -> &TileManagerConfig {
        &self.config
    }

    pub fn scales(&self) -> ScaleProvider {
        self.scales
    }

    pub fn coordinate_system(&self) -> &Arc<RwLock<UtmCoordinateSystem>> {
        &self.coordinate_system
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TileEvent> {
        self.events.subscribe()
    }

    pub fn is_loading_tiles(&self) -> bool {
        self.is_loading.load(Ordering::Acquire)
    }

    /// Find the super tiles intersecting `searches` and load as many new ones
    /// as configured, or all of them with `load_all`. Old super tiles are
    /// pruned afterwards. Returns whether any super tiles were loaded.
    pub async fn load_from_source(
        &self,
        searches: &[RangeSearch],
        load_all: bool,
    ) -> Result<bool, TileError> {
        let _guard = LoadingGuard::acquire(&self.is_loading).ok_or(TileError::Busy)?;

        let mut indexes: Vec<TileIndex> =
            enumerate_intersecting(searches, self.scales.super_tile_scale)?
                .into_iter()
                .filter(|index| !self.super_tiles.contains_key(index))
                .collect();

        if indexes.is_empty() {
            return Ok(false);
        }

        if !load_all {
            indexes.truncate(self.config.initial_super_tiles_to_load);
        }

        self.ensure_coordinate_system(indexes[0].origin())?;

        tracing::debug!(
            layer = %self.config.layer_id,
            super_tiles = indexes.len(),
            "Loading super tiles"
        );

        let result = self.load_super_tiles(&indexes).await;
        if result.is_err() {
            // Let a later request retry what failed.
            for index in &indexes {
                let loaded = self.super_tiles.get(index).map_or(false, |st| st.is_loaded());
                if !loaded {
                    self.super_tiles.remove(index);
                }
            }
        }

        // Super tiles that did load count against the budgets either way.
        self.prune_super_tiles();
        result?;

        tracing::info!(stats = %self.stats(), "Tiles loaded");
        Ok(true)
    }

    async fn load_super_tiles(&self, indexes: &[TileIndex]) -> Result<(), TileError> {
        // Record every super tile, even those that prove to be empty.
        for index in indexes {
            self.get_or_create_super_tile(*index);
        }

        let queries = indexes.iter().map(|index| async move {
            let search = RangeSearch::from(index.bounding_box().offset_max(TILE_SEARCH_OFFSET));
            let instances = self
                .source
                .tiles_in_range(&self.config.layer_id, &search)
                .await
                .map_err(TileError::query)?;

            for instance in instances {
                self.add_tile_instance(instance);
            }
            Ok::<_, TileError>(())
        });
        try_join_all(queries).await?;

        let super_tiles: Vec<_> = indexes
            .iter()
            .filter_map(|index| self.super_tiles.get(index).map(|st| st.value().clone()))
            .collect();

        try_join_all(super_tiles.iter().map(|st| self.load_super_tile(st))).await?;
        Ok(())
    }

    fn ensure_coordinate_system(&self, origin: DVec3) -> Result<(), TileError> {
        if self.coordinate_system_initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let zone = self.config.default_utm_zone;
        if !check_coordinate_system(&self.coordinate_system, Some(zone), origin) {
            return Err(TileError::CoordinateSystem { zone, origin });
        }

        self.coordinate_system_initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn get_or_create_super_tile(&self, index: TileIndex) -> Arc<SuperTile<L::Contents>> {
        self.super_tiles
            .entry(index)
            .or_insert_with(|| Arc::new(SuperTile::new(index)))
            .value()
            .clone()
    }

    fn add_tile_instance(&self, instance: TileInstance) {
        let url = instance.url.clone();
        let tile = Arc::new(self.tile_instance_to_utm_tile(instance));
        let super_tile = self.get_or_create_super_tile(tile.super_tile_index(self.scales.super_tile_scale));

        if !super_tile.add_tile(tile) {
            tracing::warn!(super_tile = %super_tile.index(), url, "add_tile failed");
        }
    }

    /// A tile whose loader fetches and decodes the instance.
    fn tile_instance_to_utm_tile(&self, instance: TileInstance) -> UtmTile<L::Contents> {
        let index = instance.tile_index;
        let instance = Arc::new(instance);
        let layer_id = self.config.layer_id.clone();
        let layer = self.layer.clone();
        let source = self.source.clone();
        let coordinate_system = self.coordinate_system.clone();

        UtmTile::from_loader(
            index,
            Arc::new(move || {
                let instance = instance.clone();
                let layer_id = layer_id.clone();
                let layer = layer.clone();
                let source = source.clone();
                let coordinate_system = coordinate_system.clone();

                async move {
                    if instance.layer_id != layer_id {
                        anyhow::bail!("unknown tile instance layer id: {}", instance.layer_id);
                    }

                    let bytes = source.tile_contents(&instance.url).await?;
                    layer.decode(&instance, &bytes, &coordinate_system)
                }
                .boxed()
            }),
        )
    }

    async fn load_super_tile(&self, super_tile: &Arc<SuperTile<L::Contents>>) -> Result<(), TileError> {
        let index = super_tile.index();

        {
            let mut lru = self.loaded_super_tiles.lock();
            if let Some(pos) = lru.iter().position(|i| *i == index) {
                // Most recently used goes to the back.
                if let Some(i) = lru.remove(pos) {
                    lru.push_back(i);
                }
                return Ok(());
            }
        }

        super_tile.load_contents().await?;

        *self.loaded_objects_bounding_box.lock() = None;
        self.loaded_super_tiles.lock().push_back(index);
        let _ = self.events.send(TileEvent::SuperTileLoaded {
            index,
            object_count: super_tile.object_count(),
        });
        Ok(())
    }

    fn unload_super_tile(&self, index: &TileIndex) -> usize {
        let Some((_, super_tile)) = self.super_tiles.remove(index) else {
            return 0;
        };

        let object_count = super_tile.object_count();
        super_tile.unload_contents();
        *self.loaded_objects_bounding_box.lock() = None;
        let _ = self.events.send(TileEvent::SuperTileUnloaded { index: *index });

        tracing::debug!(super_tile = %index, objects = object_count, "Super tile unloaded");
        object_count
    }

    /// Unload the least recently used super tiles while either budget is
    /// exceeded, keeping at least one.
    fn prune_super_tiles(&self) {
        let mut object_count = self.object_count();
        let mut lru = self.loaded_super_tiles.lock();

        while lru.len() > 1
            && (lru.len() > self.config.maximum_super_tiles_to_load
                || object_count > self.config.maximum_objects_to_load)
        {
            let Some(oldest) = lru.pop_front() else {
                break;
            };
            object_count = object_count.saturating_sub(self.unload_super_tile(&oldest));
        }
    }

    /// Objects in all loaded super tiles.
    pub fn object_count(&self) -> usize {
        self.super_tiles.iter().map(|st| st.object_count()).sum()
    }

    /// Union of the boxes of everything loaded. Cached until the next load or unload.
    pub fn loaded_objects_bounding_box(&self) -> Option<Aabb> {
        let mut cached = self.loaded_objects_bounding_box.lock();
        if cached.is_none() {
            *cached = self
                .super_tiles
                .iter()
                .filter_map(|st| st.contents_bounding_box())
                .reduce(|a, b| a.union(&b));
        }
        *cached
    }

    /// Centre of the bottom of the loaded objects' box, so that a model
    /// viewed from there sits above the ground plane.
    pub fn center_point(&self) -> Option<DVec3> {
        self.loaded_objects_bounding_box().map(|b| b.bottom_center())
    }

    /// `center_point` in absolute UTM metres.
    pub fn center_point_utm(&self) -> Option<DVec3> {
        let center = self.center_point()?;
        Some(self.layer.contents_to_utm(center, &self.coordinate_system.read()))
    }

    pub fn super_tile(&self, index: &TileIndex) -> Option<Arc<SuperTile<L::Contents>>> {
        self.super_tiles.get(index).map(|st| st.value().clone())
    }

    /// Loaded super tiles, least recently used first.
    pub fn loaded_super_tile_indexes(&self) -> Vec<TileIndex> {
        self.loaded_super_tiles.lock().iter().copied().collect()
    }

    pub fn stats(&self) -> TileManagerStats {
        let (mut tiles, mut objects) = (0, 0);
        for st in self.super_tiles.iter() {
            tiles += st.tile_count();
            objects += st.object_count();
        }

        TileManagerStats {
            super_tiles: self.super_tiles.len(),
            loaded_super_tiles: self.loaded_super_tiles.lock().len(),
            tiles,
            objects,
            object_name: L::OBJECT_NAME,
        }
    }

    /// Clean slate. Refused while a load is running.
    pub fn unload_all_tiles(&self) -> bool {
        let Some(_guard) = LoadingGuard::acquire(&self.is_loading) else {
            return false;
        };

        let indexes: Vec<TileIndex> = self.super_tiles.iter().map(|st| *st.key()).collect();
        for index in &indexes {
            self.unload_super_tile(index);
        }
        self.loaded_super_tiles.lock().clear();
        true
    }
}
