//! Decoders turning raw tile bytes into layer contents.

use anyhow::{bail, Context};
use parking_lot::RwLock;
use tile_model::{
    AnnotationDocument, AnnotationTileContents, DVec3, PointCloudTileContents, TileContents,
    TileInstance, TileMessage, UtmCoordinateSystem, UtmZone,
};

use crate::super_tile::LayerContents;

/// The kind of data a tile manager handles.
pub trait TileLayer: Send + Sync + 'static {
    type Contents: LayerContents;

    /// Plural noun for the objects counted by `LayerContents::object_count`.
    const OBJECT_NAME: &'static str;

    fn decode(
        &self,
        instance: &TileInstance,
        bytes: &[u8],
        coordinate_system: &RwLock<UtmCoordinateSystem>,
    ) -> anyhow::Result<Self::Contents>;

    /// Absolute UTM position of a point taken from decoded contents.
    fn contents_to_utm(&self, p: DVec3, _coordinate_system: &UtmCoordinateSystem) -> DVec3 {
        p
    }
}

/// The first tile defines the UTM zone and origin for the lifetime of the
/// coordinate system; every other tile must lie in the same zone.
pub fn check_coordinate_system(
    coordinate_system: &RwLock<UtmCoordinateSystem>,
    zone: Option<UtmZone>,
    origin: DVec3,
) -> bool {
    // The unspecified zone is what producers emit when they don't know better.
    let Some(zone) = zone else {
        return false;
    };

    let mut cs = coordinate_system.write();
    cs.set_origin(zone.number(), zone.is_northern(), origin)
        || cs.zone_match(zone.number(), zone.is_northern())
}

/// Annotation files: JSON documents, or UTMT messages carrying annotations.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationLayer;

impl AnnotationLayer {
    fn decode_json(
        &self,
        instance: &TileInstance,
        bytes: &[u8],
        coordinate_system: &RwLock<UtmCoordinateSystem>,
    ) -> anyhow::Result<AnnotationTileContents> {
        let document = AnnotationDocument::from_slice(bytes)
            .with_context(|| format!("Failed to parse annotation file {}", instance.url))?;

        if let Some(zone) = document.utm_zone() {
            let cs = coordinate_system.read();
            if cs.has_origin() && !cs.zone_match(zone.number(), zone.is_northern()) {
                bail!(
                    "annotation file {} is in UTM zone {zone}, expected {}",
                    instance.url,
                    cs.zone_string()
                );
            }
        }

        Ok(AnnotationTileContents::new(document.into_annotations()))
    }
}

impl TileLayer for AnnotationLayer {
    type Contents = AnnotationTileContents;

    const OBJECT_NAME: &'static str = "annotations";

    fn decode(
        &self,
        instance: &TileInstance,
        bytes: &[u8],
        coordinate_system: &RwLock<UtmCoordinateSystem>,
    ) -> anyhow::Result<AnnotationTileContents> {
        if !bytes.starts_with(&utmt::UTMT_MAGIC) {
            return self.decode_json(instance, bytes, coordinate_system);
        }

        let msg = TileMessage::from_bytes(bytes)
            .with_context(|| format!("UTMT read failed on {}", instance.url))?;

        match msg.into_contents() {
            TileContents::Annotations(contents) => Ok(contents),
            TileContents::Empty => Ok(AnnotationTileContents::default()),
            other => bail!("got bad message contents with type: {}", other.kind_name()),
        }
    }
}

/// Lidar tiles stored as UTMT point messages.
///
/// Decoded points are UTM axes (easting, northing, altitude) relative to the
/// coordinate system offset, which keeps them precise as `f32`.
#[derive(Debug, Clone, Copy)]
pub struct PointCloudLayer {
    /// Keep every n-th point.
    pub sampling_step: usize,
    /// Points per cubic metre above which a tile is thinned further; 0 disables.
    pub maximum_point_density: f64,
}

impl Default for PointCloudLayer {
    fn default() -> Self {
        Self {
            sampling_step: 5,
            maximum_point_density: 0.0,
        }
    }
}

impl PointCloudLayer {
    pub fn new(sampling_step: usize, maximum_point_density: f64) -> anyhow::Result<Self> {
        if sampling_step == 0 {
            bail!("bad sampling step {sampling_step}; step should be > 0");
        }

        Ok(Self {
            sampling_step,
            maximum_point_density,
        })
    }

    /// The more restrictive of the configured step and the step implied by
    /// the tile's density.
    fn effective_step(&self, point_count: usize, tile_volume: u64) -> usize {
        let mut step = self.sampling_step;

        if self.maximum_point_density > 0.0 && tile_volume > 0 {
            let density = point_count as f64 / tile_volume as f64;
            if density > self.maximum_point_density {
                step = step.max((density / self.maximum_point_density).ceil() as usize);
            }
        }

        step.max(1)
    }
}

impl TileLayer for PointCloudLayer {
    type Contents = PointCloudTileContents;

    const OBJECT_NAME: &'static str = "points";

    fn decode(
        &self,
        instance: &TileInstance,
        bytes: &[u8],
        coordinate_system: &RwLock<UtmCoordinateSystem>,
    ) -> anyhow::Result<PointCloudTileContents> {
        let msg = TileMessage::from_bytes(bytes)
            .with_context(|| format!("UTMT read failed on {}", instance.url))?;

        let (origin, zone) = (msg.origin(), msg.utm_zone());
        let cloud = match msg.into_contents() {
            TileContents::PointCloud(cloud) => cloud,
            TileContents::Empty => return Ok(PointCloudTileContents::default()),
            other => bail!("got bad message contents with type: {}", other.kind_name()),
        };

        if cloud.point_count() == 0 {
            return Ok(PointCloudTileContents::default());
        }

        if !check_coordinate_system(coordinate_system, zone, origin) {
            bail!("checkCoordinateSystem failed on: {}", instance.url);
        }

        let step = self.effective_step(cloud.point_count(), instance.tile_index.scale().volume());
        let shift = origin - coordinate_system.read().offset();

        let (points, colors) = cloud.into_parts();
        let sampled = points.len() / 3 / step + usize::from((points.len() / 3) % step != 0);
        let mut positions = Vec::with_capacity(sampled * 3);
        let mut sampled_colors = Vec::with_capacity(sampled * 3);

        for (p, c) in points
            .chunks_exact(3)
            .zip(colors.chunks_exact(3))
            .step_by(step)
        {
            let utm = shift + DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64);
            positions.extend_from_slice(&utm.as_vec3().to_array());
            sampled_colors.extend_from_slice(c);
        }

        Ok(PointCloudTileContents::new(positions, sampled_colors)?)
    }

    fn contents_to_utm(&self, p: DVec3, coordinate_system: &UtmCoordinateSystem) -> DVec3 {
        p + coordinate_system.offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_model::{Scale3D, TileIndex};

    fn instance(layer: &str) -> TileInstance {
        TileInstance::new(TileIndex::new(Scale3D::cube(10).unwrap(), 0, 0, 0), layer, "mem://0_0_0")
    }

    fn zone_10n() -> UtmZone {
        UtmZone::new(10, true).unwrap()
    }

    fn cloud_bytes(origin: DVec3, zone: UtmZone, n: usize) -> Vec<u8> {
        let points: Vec<f32> = (0..n).flat_map(|i| [i as f32, 0.0, 1.0]).collect();
        let colors = vec![0.5; points.len()];
        let contents = PointCloudTileContents::new(points, colors).unwrap();
        TileMessage::new(origin, zone, TileContents::PointCloud(contents))
            .to_bytes(false)
            .unwrap()
    }

    #[test]
    fn test_point_cloud_relative_to_offset() {
        let cs = RwLock::new(UtmCoordinateSystem::new());
        cs.write().set_origin(10, true, DVec3::new(552_000.0, 4_182_000.0, 0.0));

        let layer = PointCloudLayer::new(1, 0.0).unwrap();
        let bytes = cloud_bytes(DVec3::new(552_010.0, 4_182_020.0, 5.0), zone_10n(), 3);
        let contents = layer.decode(&instance("base1"), &bytes, &cs).unwrap();

        assert_eq!(contents.point_count(), 3);
        assert_eq!(&contents.points()[..6], &[10.0, 20.0, 6.0, 11.0, 20.0, 6.0]);
        assert_eq!(contents.colors().len(), 9);
    }

    #[test]
    fn test_point_cloud_sampling() {
        let cs = RwLock::new(UtmCoordinateSystem::new());
        let layer = PointCloudLayer::default();
        let bytes = cloud_bytes(DVec3::ZERO, zone_10n(), 12);

        let contents = layer.decode(&instance("base1"), &bytes, &cs).unwrap();
        // Points 0, 5 and 10.
        assert_eq!(contents.point_count(), 3);
        assert_eq!(contents.points()[3], 5.0);

        // 1000 points in a 1000 m^3 tile at a limit of 0.25/m^3 keeps every 4th.
        let dense = PointCloudLayer::new(1, 0.25).unwrap();
        let bytes = cloud_bytes(DVec3::ZERO, zone_10n(), 1000);
        assert_eq!(dense.decode(&instance("base1"), &bytes, &cs).unwrap().point_count(), 250);

        assert!(PointCloudLayer::new(0, 0.0).is_err());
    }

    #[test]
    fn test_point_cloud_rejects_foreign_zone() {
        let cs = RwLock::new(UtmCoordinateSystem::new());
        cs.write().set_origin(10, true, DVec3::ZERO);
        let layer = PointCloudLayer::new(1, 0.0).unwrap();

        let bytes = cloud_bytes(DVec3::ZERO, UtmZone::new(11, true).unwrap(), 2);
        let err = layer.decode(&instance("base1"), &bytes, &cs).unwrap_err();
        assert!(err.to_string().contains("checkCoordinateSystem failed"), "{err}");

        // Same zone at another origin is fine.
        let bytes = cloud_bytes(DVec3::splat(100.0), zone_10n(), 2);
        assert!(layer.decode(&instance("base1"), &bytes, &cs).is_ok());
    }

    #[test]
    fn test_point_cloud_empty_and_wrong_kind() {
        let cs = RwLock::new(UtmCoordinateSystem::new());
        let layer = PointCloudLayer::default();

        let empty = TileMessage::without_zone(DVec3::ZERO, TileContents::Empty)
            .to_bytes(false)
            .unwrap();
        assert_eq!(layer.decode(&instance("base1"), &empty, &cs).unwrap().point_count(), 0);
        assert!(!cs.read().has_origin());

        let annotations = TileMessage::new(
            DVec3::ZERO,
            zone_10n(),
            TileContents::Annotations(AnnotationTileContents::default()),
        )
        .to_bytes(false)
        .unwrap();
        let err = layer.decode(&instance("base1"), &annotations, &cs).unwrap_err();
        assert_eq!(err.to_string(), "got bad message contents with type: annotations");

        assert!(layer.decode(&instance("base1"), b"UTMT", &cs).is_err());
    }

    #[test]
    fn test_annotation_json_zone_check() {
        let cs = RwLock::new(UtmCoordinateSystem::new());
        cs.write().set_origin(10, true, DVec3::ZERO);

        let doc = |zone: u8| {
            format!(
                r#"{{"coordinateReferenceSystem": {{"coordinateSystem": "UTM", "datum": "WGS84",
                    "parameters": {{"utmZoneNumber": {zone}, "utmZoneNorthernHemisphere": true}}}},
                    "annotations": [{{"uuid": "a", "annotationType": "Lane"}}]}}"#
            )
        };

        let contents = AnnotationLayer
            .decode(&instance("anot1"), doc(10).as_bytes(), &cs)
            .unwrap();
        assert_eq!(contents.annotations.len(), 1);

        let err = AnnotationLayer
            .decode(&instance("anot1"), doc(11).as_bytes(), &cs)
            .unwrap_err();
        assert!(err.to_string().contains("zone 11N"), "{err}");

        assert!(AnnotationLayer.decode(&instance("anot1"), b"not json", &cs).is_err());
    }

    #[test]
    fn test_annotation_utmt_message() {
        let cs = RwLock::new(UtmCoordinateSystem::new());
        let contents = AnnotationTileContents::from_json(
            br#"{"annotations":[{"uuid":"t","annotationType":"Territory"}]}"#,
        )
        .unwrap();
        let bytes = TileMessage::new(DVec3::ZERO, zone_10n(), TileContents::Annotations(contents))
            .to_bytes(true)
            .unwrap();

        let decoded = AnnotationLayer.decode(&instance("anot1"), &bytes, &cs).unwrap();
        assert_eq!(decoded.annotations[0].uuid, "t");
    }
}
