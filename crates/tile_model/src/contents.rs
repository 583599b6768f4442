//! What a tile holds once loaded.

use glam::DVec3;

use crate::annotation::{markers_bounding_box, Annotation, AnnotationDocument};
use crate::bounds::Aabb;
use crate::error::{ModelError, Result};

/// Flat, index-aligned point and color triplets: point `i` is
/// `points[3i..3i+3]` and its color is `colors[3i..3i+3]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloudTileContents {
    points: Vec<f32>,
    colors: Vec<f32>,
}

impl PointCloudTileContents {
    pub fn new(points: Vec<f32>, colors: Vec<f32>) -> Result<Self> {
        if points.len() % 3 != 0 || colors.len() != points.len() {
            return Err(ModelError::PointCloudShape {
                points: points.len(),
                colors: colors.len(),
            });
        }

        Ok(Self { points, colors })
    }

    pub fn points(&self) -> &[f32] {
        &self.points
    }

    pub fn colors(&self) -> &[f32] {
        &self.colors
    }

    pub fn point_count(&self) -> usize {
        self.points.len() / 3
    }

    pub fn iter_points(&self) -> impl Iterator<Item = DVec3> + '_ {
        self.points
            .chunks_exact(3)
            .map(|p| DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64))
    }

    pub fn bounding_box(&self) -> Option<Aabb> {
        Aabb::from_points(self.iter_points())
    }

    pub fn into_parts(self) -> (Vec<f32>, Vec<f32>) {
        (self.points, self.colors)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationTileContents {
    pub annotations: Vec<Annotation>,
}

impl AnnotationTileContents {
    pub fn new(annotations: Vec<Annotation>) -> Self {
        Self { annotations }
    }

    /// Parse an annotation JSON file; see [`AnnotationDocument`].
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(AnnotationDocument::from_slice(bytes)?.into_annotations()))
    }

    pub fn bounding_box(&self) -> Option<Aabb> {
        markers_bounding_box(&self.annotations)
    }
}

/// Closed set of tile payloads. Consumers match exhaustively; a new variant is
/// a breaking change for every consumer.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TileContents {
    #[default]
    Empty,
    PointCloud(PointCloudTileContents),
    Annotations(AnnotationTileContents),
}

impl TileContents {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TileContents::Empty => "empty",
            TileContents::PointCloud(_) => "point cloud",
            TileContents::Annotations(_) => "annotations",
        }
    }

    /// Points for point clouds, annotations for annotation tiles.
    pub fn object_count(&self) -> usize {
        match self {
            TileContents::Empty => 0,
            TileContents::PointCloud(pc) => pc.point_count(),
            TileContents::Annotations(a) => a.annotations.len(),
        }
    }

    pub fn bounding_box(&self) -> Option<Aabb> {
        match self {
            TileContents::Empty => None,
            TileContents::PointCloud(pc) => pc.bounding_box(),
            TileContents::Annotations(a) => a.bounding_box(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_cloud_invariant() {
        let pc = PointCloudTileContents::new(
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            vec![255.0, 0.0, 0.0, 0.0, 255.0, 0.0],
        )
        .unwrap();
        assert_eq!(pc.point_count(), 2);
        assert_eq!(pc.bounding_box().unwrap().max, DVec3::ONE);

        assert!(matches!(
            PointCloudTileContents::new(vec![0.0; 4], vec![0.0; 4]),
            Err(ModelError::PointCloudShape { points: 4, colors: 4 })
        ));
        assert!(PointCloudTileContents::new(vec![0.0; 6], vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_object_count_per_variant() {
        assert_eq!(TileContents::Empty.object_count(), 0);
        assert!(TileContents::Empty.bounding_box().is_none());

        let pc = PointCloudTileContents::new(vec![0.0; 9], vec![0.0; 9]).unwrap();
        assert_eq!(TileContents::PointCloud(pc).object_count(), 3);

        let a = AnnotationTileContents::from_json(br#"{"annotations":[{"uuid":"x","annotationType":"Boundary"}]}"#)
            .unwrap();
        let contents = TileContents::Annotations(a);
        assert_eq!(contents.object_count(), 1);
        assert_eq!(contents.kind_name(), "annotations");
        assert!(contents.bounding_box().is_none());
    }
}
