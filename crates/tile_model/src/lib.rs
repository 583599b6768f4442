// src/lib.rs
//! Tile model for UTM-addressed lidar and annotation tiles.
//!
//! This crate provides:
//! - Grid addressing (`Scale3D`, `TileIndex`, `RangeSearch`) and the on-disk tile layout.
//! - The closed set of tile payloads (`TileContents`) and the `TileMessage` transfer value.
//! - A set-once UTM coordinate system and UTM <-> geodetic conversion.

pub mod annotation;
pub mod bounds;
pub mod contents;
pub mod coordinate;
pub mod error;
pub mod index;
pub mod instance;
pub mod message;
pub mod range;
pub mod scale;
pub mod utm;

// Re-export commonly used types for convenience.
pub use self::annotation::{Annotation, AnnotationDocument, AnnotationType, UtmPoint};
pub use self::bounds::Aabb;
pub use self::contents::{AnnotationTileContents, PointCloudTileContents, TileContents};
pub use self::coordinate::UtmCoordinateSystem;
pub use self::error::{ModelError, Result};
pub use self::index::TileIndex;
pub use self::instance::{LayerId, TileInstance};
pub use self::message::{TileMessage, UtmZone};
pub use self::range::RangeSearch;
pub use self::scale::{Scale3D, ScaleProvider};

pub use glam::DVec3;
