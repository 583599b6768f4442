//! Annotation files as stored in annotation tile layers.
//!
//! A document carries its coordinate reference system and a list of
//! annotations. Individual entries that do not parse are skipped, so one bad
//! record does not take down a whole tile.

use std::collections::BTreeMap;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bounds::Aabb;
use crate::coordinate::DATUM;
use crate::error::Result;
use crate::message::UtmZone;

pub const CURRENT_ANNOTATION_FILE_VERSION: u32 = 3;

/// The closed set of annotation kinds an annotation tile can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationType {
    Lane,
    Boundary,
    Connection,
    TrafficDevice,
    Territory,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtmPoint {
    #[serde(rename = "E")]
    pub easting: f64,
    #[serde(rename = "N")]
    pub northing: f64,
    pub alt: f64,
}

impl From<UtmPoint> for DVec3 {
    fn from(p: UtmPoint) -> Self {
        DVec3::new(p.easting, p.northing, p.alt)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub uuid: String,
    pub annotation_type: AnnotationType,
    #[serde(default)]
    pub markers: Vec<UtmPoint>,
    /// Kind-specific fields (lane types, device state, labels) kept verbatim.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtmParameters {
    pub utm_zone_number: u8,
    pub utm_zone_northern_hemisphere: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinateReferenceSystem {
    pub coordinate_system: String,
    pub datum: String,
    pub parameters: UtmParameters,
}

impl CoordinateReferenceSystem {
    pub fn utm(zone: UtmZone) -> Self {
        Self {
            coordinate_system: "UTM".to_string(),
            datum: DATUM.to_string(),
            parameters: UtmParameters {
                utm_zone_number: zone.number(),
                utm_zone_northern_hemisphere: zone.is_northern(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate_reference_system: Option<CoordinateReferenceSystem>,
    #[serde(default)]
    pub annotations: Vec<Value>,
}

impl AnnotationDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn new(zone: Option<UtmZone>, annotations: &[Annotation]) -> Result<Self> {
        let annotations = annotations
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            version: Some(Value::from(CURRENT_ANNOTATION_FILE_VERSION)),
            created: None,
            coordinate_reference_system: zone.map(CoordinateReferenceSystem::utm),
            annotations,
        })
    }

    /// The document's UTM zone, if it declares a WGS-84 UTM reference system.
    pub fn utm_zone(&self) -> Option<UtmZone> {
        let crs = self.coordinate_reference_system.as_ref()?;
        if crs.coordinate_system != "UTM" || crs.datum != DATUM {
            return None;
        }

        UtmZone::new(
            crs.parameters.utm_zone_number,
            crs.parameters.utm_zone_northern_hemisphere,
        )
        .ok()
    }

    /// Parse every entry; failures are logged by error kind and skipped.
    pub fn into_annotations(self) -> Vec<Annotation> {
        let mut failures: BTreeMap<String, usize> = BTreeMap::new();
        let mut annotations = Vec::with_capacity(self.annotations.len());

        for value in self.annotations {
            match serde_json::from_value::<Annotation>(value) {
                Ok(a) => annotations.push(a),
                Err(e) => *failures.entry(e.to_string()).or_default() += 1,
            }
        }

        for (error, count) in failures {
            tracing::warn!(count, error = %error, "Skipped annotations that failed to parse");
        }

        annotations
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Bounding box of every marker of every annotation.
pub fn markers_bounding_box(annotations: &[Annotation]) -> Option<Aabb> {
    Aabb::from_points(
        annotations
            .iter()
            .flat_map(|a| a.markers.iter().copied().map(DVec3::from)),
    )
}
