//! Where tiles come from.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use tile_model::instance::{parse_tile_file_stem, tile_directory};
use tile_model::{RangeSearch, Scale3D, TileInstance};

/// Shrinks the upper corner of a search built from a tile volume, so that a
/// volume that is exclusive at its high edges does not pull in its neighbours.
pub const TILE_SEARCH_OFFSET: f64 = -0.001;

/// Lists and fetches the tiles of a layer.
pub trait TileSource: Send + Sync {
    /// Every tile of `layer_id` intersecting `search`.
    fn tiles_in_range<'a>(
        &'a self,
        layer_id: &'a str,
        search: &'a RangeSearch,
    ) -> BoxFuture<'a, anyhow::Result<Vec<TileInstance>>>;

    /// Raw contents of the tile at `url`, as advertised by `tiles_in_range`.
    fn tile_contents<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<Bytes>>;
}

/// Tiles stored as files: `root/<layer>/<scale>/<x>_<y>_<z>.<ext>`.
#[derive(Debug, Clone)]
pub struct FsTileSource {
    root: PathBuf,
    scale: Scale3D,
    extension: Option<String>,
}

impl FsTileSource {
    pub fn new(root: impl Into<PathBuf>, scale: Scale3D) -> Self {
        Self {
            root: root.into(),
            scale,
            extension: None,
        }
    }

    /// Only consider files with this extension (without the dot).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn list(&self, layer_id: &str, search: &RangeSearch) -> anyhow::Result<Vec<TileInstance>> {
        let dir = tile_directory(&self.root, layer_id, self.scale);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "No tile directory for layer");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list tiles in {}", dir.display()))
            }
        };

        let mut instances = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to list tiles in {}", dir.display()))?
        {
            let path = entry.path();

            if let Some(wanted) = &self.extension {
                if path.extension().and_then(|e| e.to_str()) != Some(wanted.as_str()) {
                    continue;
                }
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let index = match parse_tile_file_stem(self.scale, stem) {
                Ok(index) => index,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Skipping non-tile file");
                    continue;
                }
            };

            if search.intersects(&index) {
                instances.push(TileInstance::new(index, layer_id, path.to_string_lossy()));
            }
        }

        // Directory order is arbitrary.
        instances.sort_by_key(|i| (i.tile_index.x(), i.tile_index.y(), i.tile_index.z()));
        Ok(instances)
    }
}

impl TileSource for FsTileSource {
    fn tiles_in_range<'a>(
        &'a self,
        layer_id: &'a str,
        search: &'a RangeSearch,
    ) -> BoxFuture<'a, anyhow::Result<Vec<TileInstance>>> {
        self.list(layer_id, search).boxed()
    }

    fn tile_contents<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<Bytes>> {
        async move {
            let data = tokio::fs::read(url)
                .await
                .with_context(|| format!("Failed to read tile file {url}"))?;
            Ok(Bytes::from(data))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_model::instance::tile_file_stem;
    use tile_model::{DVec3, TileIndex};

    fn scale() -> Scale3D {
        Scale3D::cube(10).unwrap()
    }

    async fn touch(dir: &Path, index: TileIndex, ext: &str, data: &[u8]) {
        let path = dir.join(format!("{}.{ext}", tile_file_stem(&index)));
        tokio::fs::write(path, data).await.unwrap();
    }

    #[tokio::test]
    async fn test_lists_intersecting_tiles() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tile_directory(tmp.path(), "base1", scale());
        tokio::fs::create_dir_all(&dir).await.unwrap();

        for (x, y) in [(0, 0), (2, 0), (3, 0), (-1, 0)] {
            touch(&dir, TileIndex::new(scale(), x, y, 0), "utmt", b"tile").await;
        }
        tokio::fs::write(dir.join("readme.txt"), b"not a tile").await.unwrap();

        let source = FsTileSource::new(tmp.path(), scale());
        let search = RangeSearch::new(DVec3::ZERO, DVec3::new(30.0 + TILE_SEARCH_OFFSET, 9.0, 9.0));
        let instances = source.tiles_in_range("base1", &search).await.unwrap();

        let xs: Vec<i64> = instances.iter().map(|i| i.tile_index.x()).collect();
        assert_eq!(xs, vec![0, 2]);
        assert!(instances.iter().all(|i| i.layer_id == "base1"));

        let bytes = source.tile_contents(&instances[0].url).await.unwrap();
        assert_eq!(&bytes[..], b"tile");
    }

    #[tokio::test]
    async fn test_extension_filter_and_missing_layer() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tile_directory(tmp.path(), "anot1", scale());
        tokio::fs::create_dir_all(&dir).await.unwrap();
        touch(&dir, TileIndex::new(scale(), 0, 0, 0), "json", b"{}").await;
        touch(&dir, TileIndex::new(scale(), 0, 0, 0), "bak", b"{}").await;

        let source = FsTileSource::new(tmp.path(), scale()).with_extension("json");
        let search = RangeSearch::new(DVec3::ZERO, DVec3::splat(5.0));
        assert_eq!(source.tiles_in_range("anot1", &search).await.unwrap().len(), 1);
        assert!(source.tiles_in_range("nope", &search).await.unwrap().is_empty());

        assert!(source.tile_contents("/definitely/not/here.json").await.is_err());
    }
}
