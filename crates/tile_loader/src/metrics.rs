use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tile_cache::{TileEvent, TileManagerStats, TileSource};
use tile_model::{RangeSearch, TileInstance};

/// Prometheus collectors for the tile loader, shared behind an `Arc`.
pub struct Metrics {
    pub registry: Registry,
    /// Range queries sent to the tile source.
    pub tile_queries_total: IntCounter,
    /// Tile files fetched successfully.
    pub tile_fetches_total: IntCounter,
    pub tile_fetch_errors_total: IntCounter,
    pub tile_bytes_total: IntCounter,
    pub super_tiles_loaded_total: IntCounter,
    pub super_tiles_unloaded_total: IntCounter,
    /// Super tiles currently holding contents.
    pub super_tiles_loaded: IntGauge,
    /// Points or annotations currently loaded.
    pub objects_loaded: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("tile_loader".into()), None)?;

        macro_rules! reg {
            ($metric:expr) => {{
                let collector = $metric?;
                registry.register(Box::new(collector.clone()))?;
                collector
            }};
        }

        Ok(Self {
            tile_queries_total: reg!(IntCounter::new(
                "tile_queries_total",
                "Total number of tile range queries"
            )),
            tile_fetches_total: reg!(IntCounter::new(
                "tile_fetches_total",
                "Total number of tile files fetched"
            )),
            tile_fetch_errors_total: reg!(IntCounter::new(
                "tile_fetch_errors_total",
                "Total number of failed tile fetches"
            )),
            tile_bytes_total: reg!(IntCounter::new(
                "tile_bytes_total",
                "Total bytes of tile data fetched"
            )),
            super_tiles_loaded_total: reg!(IntCounter::new(
                "super_tiles_loaded_total",
                "Total number of super tiles loaded"
            )),
            super_tiles_unloaded_total: reg!(IntCounter::new(
                "super_tiles_unloaded_total",
                "Total number of super tiles unloaded to stay within budget"
            )),
            super_tiles_loaded: reg!(IntGauge::new(
                "super_tiles_loaded",
                "Number of super tiles currently loaded"
            )),
            objects_loaded: reg!(IntGauge::new(
                "objects_loaded",
                "Number of points or annotations currently loaded"
            )),
            registry,
        })
    }

    /// Serves the registry on `/metrics`.
    pub fn router(&self) -> Router {
        let registry = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let mut buffer = Vec::new();
                    match TextEncoder::new().encode(&registry.gather(), &mut buffer) {
                        Ok(()) => String::from_utf8_lossy(&buffer).into_owned().into_response(),
                        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
                    }
                }
            }),
        )
    }

    pub fn record_event(&self, event: &TileEvent) {
        match event {
            TileEvent::SuperTileLoaded { .. } => self.super_tiles_loaded_total.inc(),
            TileEvent::SuperTileUnloaded { .. } => self.super_tiles_unloaded_total.inc(),
        }
    }

    pub fn update_stats(&self, stats: &TileManagerStats) {
        self.super_tiles_loaded.set(stats.loaded_super_tiles as i64);
        self.objects_loaded.set(stats.objects as i64);
    }
}

/// Counts what passes through a tile source.
pub struct MeteredSource<S> {
    inner: S,
    metrics: Arc<Metrics>,
}

impl<S> MeteredSource<S> {
    pub fn new(inner: S, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }
}

impl<S: TileSource> TileSource for MeteredSource<S> {
    fn tiles_in_range<'a>(
        &'a self,
        layer_id: &'a str,
        search: &'a RangeSearch,
    ) -> BoxFuture<'a, anyhow::Result<Vec<TileInstance>>> {
        self.metrics.tile_queries_total.inc();
        self.inner.tiles_in_range(layer_id, search)
    }

    fn tile_contents<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<Bytes>> {
        async move {
            let result = self.inner.tile_contents(url).await;
            match &result {
                Ok(bytes) => {
                    self.metrics.tile_fetches_total.inc();
                    self.metrics.tile_bytes_total.inc_by(bytes.len() as u64);
                }
                Err(e) => {
                    self.metrics.tile_fetch_errors_total.inc();
                    tracing::warn!(url, error = %e, "Tile fetch failed");
                }
            }
            result
        }
        .boxed()
    }
}
