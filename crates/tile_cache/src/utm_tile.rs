//! One addressable tile whose contents are fetched lazily and cached until
//! unloaded.
//!
//! `load()` coalesces: while a fetch is in flight, further callers wait on the
//! same fetch instead of starting another one. A fetch that is still in flight
//! when `unload()` runs is not cancelled, but its result is not cached.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tile_model::{
    AnnotationTileContents, PointCloudTileContents, Scale3D, TileContents, TileIndex,
};

use crate::error::TileError;

/// Fetches a tile's contents. Fixed for the lifetime of the tile.
pub type TileLoader<C> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<C>> + Send + Sync>;

type Fetch<C> = Shared<BoxFuture<'static, Result<Arc<C>, TileError>>>;

enum Slot<C> {
    Absent,
    Loading { generation: u64, fetch: Fetch<C> },
    Loaded(Arc<C>),
}

struct SlotState<C> {
    slot: Slot<C>,
    // Bumped per fetch so a completion can tell whether it is still current.
    generation: u64,
}

pub struct UtmTile<C> {
    index: TileIndex,
    loader: TileLoader<C>,
    state: Mutex<SlotState<C>>,
}

/// A tile of annotations.
pub type AnnotationUtmTile = UtmTile<AnnotationTileContents>;

/// A tile of lidar points.
pub type PointCloudUtmTile = UtmTile<PointCloudTileContents>;

/// A tile holding any kind of payload.
pub type AnyUtmTile = UtmTile<TileContents>;

impl<C: Send + Sync + 'static> UtmTile<C> {
    pub fn new<F, Fut>(index: TileIndex, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<C>> + Send + 'static,
    {
        Self::from_loader(index, Arc::new(move || loader().boxed()))
    }

    pub fn from_loader(index: TileIndex, loader: TileLoader<C>) -> Self {
        Self {
            index,
            loader,
            state: Mutex::new(SlotState {
                slot: Slot::Absent,
                generation: 0,
            }),
        }
    }

    #[inline]
    pub fn index(&self) -> TileIndex {
        self.index
    }

    pub fn super_tile_index(&self, super_scale: Scale3D) -> TileIndex {
        self.index.super_tile_index(super_scale)
    }

    /// Cached contents, or the result of the (possibly shared) fetch.
    ///
    /// A failed fetch leaves the tile absent, so the next call fetches again.
    pub async fn load(&self) -> Result<Arc<C>, TileError> {
        let (generation, fetch) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            match &state.slot {
                Slot::Loaded(contents) => return Ok(contents.clone()),
                Slot::Loading { generation, fetch } => (*generation, fetch.clone()),
                Slot::Absent => {
                    state.generation += 1;
                    let generation = state.generation;

                    tracing::trace!(tile = %self.index, generation, "Fetching tile contents");
                    let fetch = (self.loader)()
                        .map(|result| result.map(Arc::new).map_err(TileError::fetch))
                        .boxed()
                        .shared();

                    state.slot = Slot::Loading {
                        generation,
                        fetch: fetch.clone(),
                    };
                    (generation, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut state = self.state.lock();
        if matches!(state.slot, Slot::Loading { generation: current, .. } if current == generation) {
            state.slot = match &result {
                Ok(contents) => Slot::Loaded(contents.clone()),
                Err(e) => {
                    tracing::debug!(tile = %self.index, error = %e, "Tile fetch failed");
                    Slot::Absent
                }
            };
        }

        result
    }

    /// Drop cached contents and forget any in-flight fetch. Never fails.
    pub fn unload(&self) {
        self.state.lock().slot = Slot::Absent;
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state.lock().slot, Slot::Loaded(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state.lock().slot, Slot::Loading { .. })
    }
}

impl<C> fmt::Debug for UtmTile<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.lock().slot {
            Slot::Absent => "absent",
            Slot::Loading { .. } => "loading",
            Slot::Loaded(_) => "loaded",
        };

        f.debug_struct("UtmTile")
            .field("index", &self.index)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn index(x: i64, y: i64) -> TileIndex {
        TileIndex::new(Scale3D::cube(10).unwrap(), x, y, 0)
    }

    fn scenario_contents() -> TileContents {
        TileContents::PointCloud(
            PointCloudTileContents::new(
                vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
                vec![255.0, 0.0, 0.0, 0.0, 255.0, 0.0],
            )
            .unwrap(),
        )
    }

    /// A tile whose loader counts its invocations and yields once before resolving.
    fn counting_tile(calls: Arc<AtomicUsize>) -> AnyUtmTile {
        UtmTile::new(index(3, 7), move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(scenario_contents())
            }
        })
    }

    #[tokio::test]
    async fn test_load_returns_loader_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tile = counting_tile(calls.clone());
        assert!(!tile.is_loaded());

        let contents = tile.load().await.unwrap();
        assert_eq!(*contents, scenario_contents());
        assert!(tile.is_loaded());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_loads_fetch_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tile = counting_tile(calls.clone());

        let first = tile.load().await.unwrap();
        let second = tile.load().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tile = counting_tile(calls.clone());
        assert_eq!((tile.index().x(), tile.index().y()), (3, 7));

        let (a, b) = tokio::join!(tile.load(), tile.load());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(*a, scenario_contents());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_across_threads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let tile = {
            let (calls, gate) = (calls.clone(), gate.clone());
            Arc::new(UtmTile::new(index(3, 7), move || {
                let (calls, gate) = (calls.clone(), gate.clone());
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok(scenario_contents())
                }
            }))
        };

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tile = tile.clone();
                tokio::spawn(async move { tile.load().await })
            })
            .collect();

        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for handle in handles {
            assert_eq!(*handle.await.unwrap().unwrap(), scenario_contents());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_propagates_and_next_load_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tile: AnyUtmTile = {
            let calls = calls.clone();
            UtmTile::new(index(3, 7), move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        anyhow::bail!("network unreachable");
                    }
                    Ok(TileContents::Empty)
                }
            })
        };

        let err = tile.load().await.unwrap_err();
        assert!(matches!(err, TileError::Fetch(_)));
        assert_eq!(err.to_string(), "network unreachable");
        assert!(!tile.is_loaded());
        assert!(!tile.is_loading());

        assert_eq!(*tile.load().await.unwrap(), TileContents::Empty);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let tile: AnyUtmTile = UtmTile::new(index(0, 0), || async {
            tokio::task::yield_now().await;
            Err(anyhow::anyhow!("network unreachable"))
        });

        let (a, b) = tokio::join!(tile.load(), tile.load());
        assert_eq!(a.unwrap_err().to_string(), "network unreachable");
        assert_eq!(b.unwrap_err().to_string(), "network unreachable");
    }

    #[tokio::test]
    async fn test_unload_then_load_refetches_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tile = counting_tile(calls.clone());

        tile.load().await.unwrap();
        tile.unload();
        assert!(!tile.is_loaded());

        tile.load().await.unwrap();
        tile.load().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unload_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tile = counting_tile(calls.clone());

        tile.unload();
        tile.unload();
        assert!(!tile.is_loaded());

        tile.load().await.unwrap();
        tile.unload();
        tile.unload();
        tile.unload();
        assert!(!tile.is_loaded());

        tile.load().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unload_during_fetch_does_not_repopulate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let tile: Arc<AnyUtmTile> = {
            let (calls, gate) = (calls.clone(), gate.clone());
            Arc::new(UtmTile::new(index(1, 1), move || {
                let (calls, gate) = (calls.clone(), gate.clone());
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok(scenario_contents())
                }
            }))
        };

        let pending = {
            let tile = tile.clone();
            tokio::spawn(async move { tile.load().await })
        };
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(tile.is_loading());

        tile.unload();
        gate.notify_one();

        // The waiter still gets its value; the tile stays absent.
        assert_eq!(*pending.await.unwrap().unwrap(), scenario_contents());
        assert!(!tile.is_loaded());
        assert!(!tile.is_loading());

        gate.notify_one();
        tile.load().await.unwrap();
        assert!(tile.is_loaded());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_super_tile_index() {
        let tile: AnnotationUtmTile =
            UtmTile::new(index(5, -1), || async { Ok(AnnotationTileContents::default()) });
        let st = tile.super_tile_index(Scale3D::cube(30).unwrap());
        assert_eq!((st.x(), st.y(), st.z()), (1, -1, 0));
        assert!(format!("{tile:?}").contains("absent"));
    }
}
