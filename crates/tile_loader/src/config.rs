use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tile_cache::TileManagerConfig;
use tile_model::{DVec3, Scale3D, UtmZone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayerKind {
    /// Annotation files (JSON or UTMT).
    Annotations,
    /// Lidar tiles (UTMT).
    PointCloud,
}

/// `tile_loader` - Loads the UTM tiles intersecting a search box.
///
/// Tiles are read from `<tile-root>/<layer>/<scale>/<x>_<y>_<z>.<ext>`,
/// grouped into super tiles and kept within the configured budgets, exactly
/// as an interactive viewer would load them.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Root directory of the tile layers.
    #[arg(long, env = "TILE_ROOT")]
    pub tile_root: PathBuf,

    /// What the layer contains.
    #[arg(long, env = "TILE_LAYER_KIND", value_enum, default_value_t = LayerKind::PointCloud)]
    pub layer_kind: LayerKind,

    /// Layer to read. Defaults to `anot1` for annotations and `base1` for point clouds.
    #[arg(long, env = "TILE_LAYER_ID")]
    pub layer_id: Option<String>,

    /// Tile dimensions in metres, `_010_010_010` or `10,10,10`.
    #[arg(long, env = "UTM_TILE_SCALE", default_value = "_010_010_010")]
    pub utm_tile_scale: Scale3D,

    /// Super tile dimensions in metres; a multiple of the tile dimensions.
    #[arg(long, env = "SUPER_TILE_SCALE", default_value = "_030_030_030")]
    pub super_tile_scale: Scale3D,

    /// New super tiles loaded per request unless `--load-all` is given.
    #[arg(long, env = "INITIAL_SUPER_TILES_TO_LOAD", default_value_t = 4)]
    pub initial_super_tiles_to_load: usize,

    #[arg(long, env = "MAXIMUM_SUPER_TILES_TO_LOAD", default_value_t = 10_000)]
    pub maximum_super_tiles_to_load: usize,

    /// Defaults to 1000 annotations or 100000 points.
    #[arg(long, env = "MAXIMUM_OBJECTS_TO_LOAD")]
    pub maximum_objects_to_load: Option<usize>,

    /// UTM zone of the tile data, e.g. `10N`.
    #[arg(long, env = "DEFAULT_UTM_ZONE", default_value = "10N")]
    pub default_utm_zone: UtmZone,

    /// Keep every n-th lidar point.
    #[arg(long, env = "SAMPLING_STEP", default_value_t = 5)]
    pub sampling_step: usize,

    /// Thin lidar tiles denser than this many points per cubic metre; 0 disables.
    #[arg(long, env = "MAXIMUM_POINT_DENSITY", default_value_t = 0.0)]
    pub maximum_point_density: f64,

    /// One corner of the search box in UTM metres: `easting,northing,altitude`.
    #[arg(long, env = "SEARCH_MIN", value_parser = parse_point, allow_hyphen_values = true)]
    pub search_min: DVec3,

    /// The opposite corner of the search box.
    #[arg(long, env = "SEARCH_MAX", value_parser = parse_point, allow_hyphen_values = true)]
    pub search_max: DVec3,

    /// Load every intersecting super tile instead of the initial batch.
    #[arg(long, env = "LOAD_ALL")]
    pub load_all: bool,

    /// If set, serve Prometheus metrics on this address until interrupted.
    #[arg(long, env = "TILE_LOADER_METRICS_LISTEN_ADDR")]
    pub metrics_listen_addr: Option<SocketAddr>,
}

impl Config {
    pub fn manager_config(&self) -> TileManagerConfig {
        let defaults = match self.layer_kind {
            LayerKind::Annotations => TileManagerConfig::annotations(),
            LayerKind::PointCloud => TileManagerConfig::point_cloud(),
        };

        TileManagerConfig {
            layer_id: self.layer_id.clone().unwrap_or(defaults.layer_id),
            initial_super_tiles_to_load: self.initial_super_tiles_to_load,
            maximum_super_tiles_to_load: self.maximum_super_tiles_to_load,
            maximum_objects_to_load: self
                .maximum_objects_to_load
                .unwrap_or(defaults.maximum_objects_to_load),
            default_utm_zone: self.default_utm_zone,
        }
    }
}

fn parse_point(s: &str) -> Result<DVec3, String> {
    let coords = s
        .split(',')
        .map(|c| c.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid point '{s}': {e}"))?;

    match coords[..] {
        [x, y, z] => Ok(DVec3::new(x, y, z)),
        _ => Err(format!("invalid point '{s}': expected x,y,z")),
    }
}
