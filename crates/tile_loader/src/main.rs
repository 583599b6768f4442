mod config;
mod metrics;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parking_lot::RwLock;
use tile_cache::{
    AnnotationLayer, FsTileSource, PointCloudLayer, TileEvent, TileLayer, TileManager, TileSource,
};
use tile_model::{RangeSearch, ScaleProvider, UtmCoordinateSystem};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{Config, LayerKind};
use crate::metrics::{MeteredSource, Metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::parse();
    tracing::info!(config = ?config, "Loaded configuration");

    let metrics = Arc::new(Metrics::new().context("Failed to create metrics registry")?);

    let metrics_handle = config.metrics_listen_addr.map(|addr| {
        let router = metrics.router();
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(%addr, "Serving metrics");
            axum::serve(listener, router.into_make_service()).await?;
            Ok::<(), anyhow::Error>(())
        })
    });

    let scales = ScaleProvider::new(config.utm_tile_scale, config.super_tile_scale)
        .context("Invalid tile scales")?;
    let mut fs_source = FsTileSource::new(&config.tile_root, scales.utm_tile_scale);
    if config.layer_kind == LayerKind::PointCloud {
        fs_source = fs_source.with_extension(utmt::UTMT_EXTENSION);
    }
    let source: Arc<dyn TileSource> = Arc::new(MeteredSource::new(fs_source, metrics.clone()));
    let coordinate_system = Arc::new(RwLock::new(UtmCoordinateSystem::new()));

    match config.layer_kind {
        LayerKind::Annotations => {
            let manager = TileManager::new(
                config.manager_config(),
                scales,
                AnnotationLayer,
                source,
                coordinate_system,
            );
            run(&manager, &config, &metrics).await?;
        }
        LayerKind::PointCloud => {
            let layer = PointCloudLayer::new(config.sampling_step, config.maximum_point_density)?;
            let manager =
                TileManager::new(config.manager_config(), scales, layer, source, coordinate_system);
            run(&manager, &config, &metrics).await?;
        }
    }

    if let Some(handle) = metrics_handle {
        tracing::info!("Tiles loaded. Awaiting shutdown signal...");
        tokio::select! {
            _ = shutdown_signal() => {},
            res = handle => match res {
                Ok(Err(e)) => tracing::error!(error = %e, "Metrics server failed."),
                Err(e) => tracing::error!(error = %e, "Metrics server task failed."),
                Ok(Ok(())) => {}
            },
        }
    }

    tracing::info!("Tile loader shut down gracefully.");
    Ok(())
}

/// Load the configured search box once and report what ended up in memory.
async fn run<L: TileLayer>(
    manager: &TileManager<L>,
    config: &Config,
    metrics: &Arc<Metrics>,
) -> anyhow::Result<()> {
    let mut events = manager.subscribe();

    let search = RangeSearch::new(config.search_min, config.search_max);
    let searches = [search];
    let load = manager.load_from_source(&searches, config.load_all);
    tokio::pin!(load);

    let result = loop {
        tokio::select! {
            result = &mut load => break result,
            event = events.recv() => record_event(metrics, event),
        }
    };

    // Events sent just before the load finished are still queued.
    loop {
        match events.try_recv() {
            Ok(event) => record_event(metrics, Ok(event)),
            Err(TryRecvError::Lagged(skipped)) => record_event(metrics, Err(RecvError::Lagged(skipped))),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    let loaded = result.context("Failed to load tiles")?;

    let stats = manager.stats();
    metrics.update_stats(&stats);
    tracing::info!(loaded, stats = %stats, "Finished loading");

    if let Some(center) = manager.center_point_utm() {
        let cs = manager.coordinate_system().read();
        let local = cs.utm_to_local(center);
        match cs.local_to_lng_lat_alt(local) {
            Ok(lng_lat_alt) => tracing::info!(
                zone = %cs.zone_string(),
                easting = center.x,
                northing = center.y,
                longitude = lng_lat_alt.x,
                latitude = lng_lat_alt.y,
                altitude = lng_lat_alt.z,
                "Center of loaded tiles"
            ),
            Err(e) => tracing::warn!(error = %e, "Center of loaded tiles has no geodetic position"),
        }
    }

    Ok(())
}

fn record_event(metrics: &Metrics, event: Result<TileEvent, RecvError>) {
    match event {
        Ok(event) => {
            tracing::debug!(event = ?event, "Tile event");
            metrics.record_event(&event);
        }
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Tile event listener lagged");
        }
        Err(RecvError::Closed) => {}
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_model::instance::{tile_directory, tile_file_stem};
    use tile_model::{DVec3, PointCloudTileContents, Scale3D, TileContents, TileIndex, TileMessage, UtmZone};

    fn write_point_tile(root: &std::path::Path, index: TileIndex) {
        let dir = tile_directory(root, "base1", index.scale());
        std::fs::create_dir_all(&dir).unwrap();

        let contents = PointCloudTileContents::new(vec![0.5; 3], vec![1.0; 3]).unwrap();
        let msg = TileMessage::new(
            index.origin(),
            UtmZone::new(10, true).unwrap(),
            TileContents::PointCloud(contents),
        );
        let path = dir.join(format!("{}.utmt", tile_file_stem(&index)));
        std::fs::write(path, msg.to_bytes(false).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_run_records_every_event() {
        let tmp = tempfile::tempdir().unwrap();
        let scale = Scale3D::cube(10).unwrap();
        for x in [0, 3, 6] {
            write_point_tile(tmp.path(), TileIndex::new(scale, x, 0, 0));
        }

        let root = tmp.path().to_string_lossy().into_owned();
        let config = Config::try_parse_from([
            "tile_loader",
            "--tile-root",
            root.as_str(),
            "--sampling-step",
            "1",
            "--maximum-super-tiles-to-load",
            "2",
            "--search-min",
            "0,0,0",
            "--search-max",
            "89,29,29",
            "--load-all",
        ])
        .unwrap();

        let scales = ScaleProvider::new(config.utm_tile_scale, config.super_tile_scale).unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let source = MeteredSource::new(FsTileSource::new(&config.tile_root, scales.utm_tile_scale), metrics.clone());
        let manager = TileManager::new(
            config.manager_config(),
            scales,
            PointCloudLayer::new(config.sampling_step, config.maximum_point_density).unwrap(),
            Arc::new(source),
            Arc::new(RwLock::new(UtmCoordinateSystem::new())),
        );

        run(&manager, &config, &metrics).await.unwrap();

        let stats = manager.stats();
        assert_eq!(stats.loaded_super_tiles, 2);
        assert_eq!(metrics.super_tiles_loaded_total.get(), 3);
        assert_eq!(metrics.super_tiles_unloaded_total.get(), 1);
        assert_eq!(metrics.super_tiles_loaded.get(), 2);
        assert_eq!(metrics.objects_loaded.get(), 2);
        assert_eq!(metrics.tile_fetches_total.get(), 3);
        assert_eq!(DVec3::ZERO, manager.coordinate_system().read().offset());
    }
}
