use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use proptest::prelude::*;

use lichen_height::{DEFAULT_MAX_GRID_POINTS, HeightmapCache, fallback_height};
use lichen_world::{HeightError, SurfaceHeight};

/// Height provider backed by a pure function, with an invocation counter.
struct FnProvider<F> {
    f: F,
    calls: AtomicU64,
}

impl<F: Fn(i32, i32) -> i32 + Send + Sync> FnProvider<F> {
    fn new(f: F) -> Self {
        Self {
            f,
            calls: AtomicU64::new(0),
        }
    }
}

impl<F: Fn(i32, i32) -> i32 + Send + Sync> SurfaceHeight for FnProvider<F> {
    fn surface_height(&self, bx: i32, bz: i32) -> Result<i32, HeightError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.f)(bx, bz))
    }
}

struct FailingProvider;

impl SurfaceHeight for FailingProvider {
    fn surface_height(&self, bx: i32, bz: i32) -> Result<i32, HeightError> {
        Err(HeightError::Unavailable { x: bx, z: bz })
    }
}

#[test]
fn grid_corners_round_trip_exactly() {
    let provider = Arc::new(FnProvider::new(|x, z| 60 + (x % 7).abs() + (z % 5).abs()));
    let cache = HeightmapCache::new(provider.clone(), 16, DEFAULT_MAX_GRID_POINTS);

    for gx in -3..=3 {
        for gz in -3..=3 {
            let bx = gx * 16;
            let bz = gz * 16;
            let expected = provider.surface_height(bx, bz).unwrap();
            assert_eq!(cache.height(bx, bz), expected, "corner {},{}", bx, bz);
        }
    }
}

#[test]
fn interpolation_stays_within_corner_bounds() {
    let provider = Arc::new(FnProvider::new(|x, z| 64 + x.rem_euclid(32) - z.rem_euclid(16)));
    let cache = HeightmapCache::new(provider.clone(), 16, DEFAULT_MAX_GRID_POINTS);

    for bx in 0..16 {
        for bz in 0..16 {
            let corners = [
                provider.surface_height(0, 0).unwrap(),
                provider.surface_height(16, 0).unwrap(),
                provider.surface_height(0, 16).unwrap(),
                provider.surface_height(16, 16).unwrap(),
            ];
            let lo = *corners.iter().min().unwrap();
            let hi = *corners.iter().max().unwrap();
            let h = cache.height(bx, bz);
            assert!(h >= lo - 1 && h <= hi + 1, "height {} out of [{},{}]", h, lo, hi);
        }
    }
}

#[test]
fn repeated_queries_reuse_published_samples() {
    let provider = Arc::new(FnProvider::new(|_, _| 64));
    let cache = HeightmapCache::new(provider.clone(), 16, DEFAULT_MAX_GRID_POINTS);

    cache.height(3, 3);
    let after_first = provider.calls.load(Ordering::SeqCst);
    assert_eq!(after_first, 4); // one call per corner

    for _ in 0..32 {
        cache.height(3, 3);
    }
    assert_eq!(provider.calls.load(Ordering::SeqCst), after_first);
}

#[test]
fn concurrent_threads_publish_each_corner_once() {
    let provider = Arc::new(FnProvider::new(|x, z| 64 + x + z));
    let cache = Arc::new(HeightmapCache::new(provider.clone(), 16, DEFAULT_MAX_GRID_POINTS));

    let mut handles = Vec::new();
    for _ in 0..64 {
        let cache = Arc::clone(&cache);
        handles.push(thread::spawn(move || cache.height(5, 5)));
    }
    let results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let first = results[0];
    assert!(results.iter().all(|r| *r == first));
    // Four corners feed the interpolation; each is computed at most once.
    assert!(
        provider.calls.load(Ordering::SeqCst) <= 4,
        "expected at most 4 generator calls, saw {}",
        provider.calls.load(Ordering::SeqCst)
    );
}

#[test]
fn sample_count_stays_under_bound() {
    let provider = Arc::new(FnProvider::new(|_, _| 64));
    // Room for two 4-point grids only.
    let cache = HeightmapCache::new(provider, 16, 8);

    for chunk in 0..12 {
        cache.height(chunk * 16 + 1, 1);
        assert!(cache.stats().grid_points <= 8);
    }
    assert!(cache.stats().evictions > 0);
}

#[test]
fn failed_provider_uses_deterministic_estimator() {
    let cache = HeightmapCache::new(Arc::new(FailingProvider), 16, DEFAULT_MAX_GRID_POINTS);
    let other = HeightmapCache::new(Arc::new(FailingProvider), 16, DEFAULT_MAX_GRID_POINTS);

    assert_eq!(cache.height(0, 0), fallback_height(0, 0).round() as i32);
    for &(bx, bz) in &[(0, 0), (100, -250), (-513, 7)] {
        assert_eq!(cache.height(bx, bz), other.height(bx, bz));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    // Queries that land exactly on grid corners reproduce the provider's
    // value, for every supported spacing.
    #[test]
    fn corners_round_trip_for_all_spacings(gx in -64i32..64, gz in -64i32..64, spacing in prop::sample::select(vec![4i32, 8, 16])) {
        let provider = Arc::new(FnProvider::new(|x, z| 64 + (x.wrapping_mul(31) ^ z.wrapping_mul(17)).rem_euclid(40)));
        let cache = HeightmapCache::new(provider.clone(), spacing, DEFAULT_MAX_GRID_POINTS);
        let bx = gx * spacing;
        let bz = gz * spacing;
        prop_assert_eq!(cache.height(bx, bz), provider.surface_height(bx, bz).unwrap());
    }
}

#[test]
fn clear_all_recomputes_identically() {
    let provider = Arc::new(FnProvider::new(|x, z| 64 + (x ^ z).rem_euclid(13)));
    let cache = HeightmapCache::new(provider, 16, DEFAULT_MAX_GRID_POINTS);

    let before = cache.height(21, 34);
    cache.clear_all();
    assert_eq!(cache.stats().grid_points, 0);
    assert_eq!(cache.height(21, 34), before);
}
