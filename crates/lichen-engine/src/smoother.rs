use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use lichen_height::{DEFAULT_MAX_GRID_POINTS, HeightmapCache, HeightmapStats};
use lichen_region::{BiomeResult, FillResult, RegionCache, RegionCacheStats, WaitOutcome};
use lichen_world::loggate::LogGate;
use lichen_world::{
    BiomeCatalog, BiomeId, BiomePolicy, BiomeSampler, PerfSection, ReplacementEvent, SampleError,
    SmootherParams, SurfaceHeight, TelemetrySink,
};

use crate::flood;
use crate::perf::{PerfSnapshot, PerfTracker};
use crate::reentry;

/// Surface projection scans upward in 8-block steps to the build limit,
/// bounded to 20 samples.
const SURFACE_SCAN_MAX_Y: i32 = 320;
const SURFACE_SCAN_STEP: i32 = 8;
const SURFACE_SCAN_SAMPLES: i32 = 20;

/// How long a non-producing caller waits on someone else's fill.
const FILL_DEADLINE: Duration = Duration::from_secs(5);

const FAULT_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default)]
pub struct EngineStats {
    pub regions: RegionCacheStats,
    pub heightmap: HeightmapStats,
}

/// Diagnostic answer for one position, for host debug tooling.
#[derive(Clone, Copy, Debug)]
pub struct BiomeAnalysis {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub surface_y: i32,
    pub vanilla: BiomeId,
    pub surface: BiomeId,
    pub preserved: bool,
    pub matches_surface: bool,
    /// Component size in blocks, when a fill was run or cached.
    pub region_blocks: Option<i32>,
    pub is_micro: Option<bool>,
    pub replacement: Option<BiomeId>,
    pub from_cache: bool,
}

/// The biome-smoothing engine: one explicitly constructed instance per
/// world, shared across worker threads by the host hook.
pub struct Engine {
    params: RwLock<Arc<SmootherParams>>,
    policy: RwLock<Arc<BiomePolicy>>,
    pub(crate) catalog: Arc<dyn BiomeCatalog>,
    pub(crate) regions: RegionCache,
    pub(crate) heights: HeightmapCache,
    pub(crate) perf: PerfTracker,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    sampler_gate: LogGate,
    validity_gate: LogGate,
    timeout_gate: LogGate,
    pub(crate) degenerate_gate: LogGate,
}

impl Engine {
    pub fn new(
        params: SmootherParams,
        catalog: Arc<dyn BiomeCatalog>,
        height_source: Arc<dyn SurfaceHeight>,
    ) -> Self {
        Self::with_telemetry(params, catalog, height_source, None)
    }

    pub fn with_telemetry(
        params: SmootherParams,
        catalog: Arc<dyn BiomeCatalog>,
        height_source: Arc<dyn SurfaceHeight>,
        telemetry: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        let policy = BiomePolicy::resolve(&params, catalog.as_ref());
        let regions = RegionCache::new(Arc::clone(&catalog), params.max_cache_memory_bytes);
        let heights = HeightmapCache::new(height_source, params.grid_spacing, DEFAULT_MAX_GRID_POINTS);
        let perf = PerfTracker::new(params.performance_logging);
        Self {
            params: RwLock::new(Arc::new(params)),
            policy: RwLock::new(Arc::new(policy)),
            catalog,
            regions,
            heights,
            perf,
            telemetry,
            sampler_gate: LogGate::new(),
            validity_gate: LogGate::new(),
            timeout_gate: LogGate::new(),
            degenerate_gate: LogGate::new(),
        }
    }

    /// The primary operation: the biome the host should use at
    /// `(bx, by, bz)`. Total — never fails, never returns an unregistered
    /// id, and falls back to `vanilla` on any internal fault.
    pub fn modified_biome(
        &self,
        bx: i32,
        by: i32,
        bz: i32,
        vanilla: BiomeId,
        sampler: &dyn BiomeSampler,
    ) -> BiomeId {
        let params = self.params_snapshot();
        if !params.enabled {
            return vanilla;
        }
        if reentry::active() {
            // Nested host call issued by one of our own sampler probes.
            return vanilla;
        }
        let _guard = reentry::enter();

        self.perf.count_execution();
        let t0 = self.perf.should_sample(PerfSection::Total).then(Instant::now);

        if !self.catalog.is_valid(vanilla) {
            if self.validity_gate.allow(FAULT_LOG_INTERVAL) {
                log::warn!("unregistered vanilla biome at {},{},{}", bx, by, bz);
            }
            return vanilla;
        }

        let policy = self.policy_snapshot();
        if policy.is_preserved(vanilla, self.catalog.as_ref()) {
            return vanilla;
        }

        let result = self.regions.get_or_compute(bx, by, bz, vanilla, || {
            self.compute(&params, bx, by, bz, vanilla, sampler)
        });

        let answer = if self.catalog.is_valid(result.biome) {
            result.biome
        } else {
            if self.validity_gate.allow(FAULT_LOG_INTERVAL) {
                log::warn!("dropping unregistered result biome at {},{},{}", bx, by, bz);
            }
            vanilla
        };

        if let Some(t0) = t0 {
            self.record_section(PerfSection::Total, t0.elapsed());
        }
        answer
    }

    /// The per-column computation, serialized by the region cache's position
    /// stripe. Populates the memo layers it consults.
    fn compute(
        &self,
        params: &SmootherParams,
        bx: i32,
        by: i32,
        bz: i32,
        vanilla: BiomeId,
        sampler: &dyn BiomeSampler,
    ) -> BiomeResult {
        let keep = BiomeResult {
            biome: vanilla,
            was_micro: false,
        };

        // Known vanilla != surface at this column: nothing to smooth.
        if self.regions.get_mismatch(bx, bz, vanilla) == Some(true) {
            self.regions.record_hit();
            return keep;
        }

        let t0 = self
            .perf
            .should_sample(PerfSection::HeightCalc)
            .then(Instant::now);
        let surface_y = self.heights.height(bx, bz);
        if let Some(t0) = t0 {
            self.record_section(PerfSection::HeightCalc, t0.elapsed());
        }

        let surface = match self.surface_biome(bx, bz, surface_y, sampler) {
            Ok(biome) => biome,
            Err(err) => {
                self.warn_sampler_fault(&err);
                return keep;
            }
        };

        let matches = vanilla == surface;
        self.regions.put_mismatch(bx, bz, vanilla, !matches);
        if !matches {
            return keep;
        }

        let t0 = self
            .perf
            .should_sample(PerfSection::CacheCheck)
            .then(Instant::now);
        let cached = self.consult_reuse_layers(bx, bz, vanilla, surface);
        if let Some(t0) = t0 {
            self.record_section(PerfSection::CacheCheck, t0.elapsed());
        }
        if let Some(result) = cached {
            return result;
        }

        // Miss everywhere: dispatch or join the flood fill.
        let handle = self.regions.try_start_fill(bx, bz, surface);
        if let Some(existing) = handle.task.result() {
            self.regions.record_hit();
            let result = self.result_from_fill(&existing, bx, by, bz, vanilla, params);
            self.store_surface(bx, bz, result);
            return result;
        }

        if handle.producer {
            flood::run_fill(self, bx, bz, surface, sampler, params);
        }

        match handle.task.wait(FILL_DEADLINE) {
            WaitOutcome::Completed(fill) => {
                let result = self.result_from_fill(&fill, bx, by, bz, vanilla, params);
                self.store_surface(bx, bz, result);
                result
            }
            WaitOutcome::TimedOut | WaitOutcome::Cancelled => {
                if self.timeout_gate.allow(FAULT_LOG_INTERVAL) {
                    log::warn!("flood fill wait gave up at {},{}; answering with vanilla", bx, bz);
                }
                keep
            }
        }
    }

    /// Surface cache, spatial reuse, and large-area anchors, in that order.
    fn consult_reuse_layers(
        &self,
        bx: i32,
        bz: i32,
        vanilla: BiomeId,
        surface: BiomeId,
    ) -> Option<BiomeResult> {
        if let Some(result) = self.regions.get_surface(bx, bz) {
            // Results cached for a different biome stack at this column do
            // not apply.
            if result.biome == vanilla || result.biome == surface {
                self.regions.record_hit();
                return Some(result);
            }
        }

        if let Some(spatial) = self.regions.get_spatial(bx, bz, surface) {
            let result = match spatial.replacement {
                Some(replacement) if !spatial.is_large && self.catalog.is_valid(replacement) => {
                    BiomeResult {
                        biome: replacement,
                        was_micro: true,
                    }
                }
                _ => BiomeResult {
                    biome: vanilla,
                    was_micro: false,
                },
            };
            self.store_surface(bx, bz, result);
            return Some(result);
        }

        if self.regions.is_known_large_area(bx, bz, surface) {
            self.regions.record_hit();
            let result = BiomeResult {
                biome: vanilla,
                was_micro: false,
            };
            self.store_surface(bx, bz, result);
            return Some(result);
        }

        None
    }

    fn result_from_fill(
        &self,
        fill: &FillResult,
        bx: i32,
        by: i32,
        bz: i32,
        vanilla: BiomeId,
        params: &SmootherParams,
    ) -> BiomeResult {
        if fill.is_large {
            return BiomeResult {
                biome: vanilla,
                was_micro: false,
            };
        }
        let replacement = fill.replacement;
        if replacement == vanilla || !self.catalog.is_valid(replacement) {
            return BiomeResult {
                biome: vanilla,
                was_micro: false,
            };
        }
        if params.debug {
            if let Some(sink) = &self.telemetry {
                sink.biome_replaced(&ReplacementEvent {
                    x: bx,
                    y: by,
                    z: bz,
                    from: vanilla,
                    to: replacement,
                    region_cells: fill.positions.len(),
                });
            }
        }
        BiomeResult {
            biome: replacement,
            was_micro: true,
        }
    }

    fn store_surface(&self, bx: i32, bz: i32, result: BiomeResult) {
        let t0 = self
            .perf
            .should_sample(PerfSection::CacheStore)
            .then(Instant::now);
        self.regions.put_surface(bx, bz, result);
        if let Some(t0) = t0 {
            self.record_section(PerfSection::CacheStore, t0.elapsed());
        }
    }

    /// First non-cave biome sampling upward from the surface height.
    pub(crate) fn surface_biome(
        &self,
        bx: i32,
        bz: i32,
        start_y: i32,
        sampler: &dyn BiomeSampler,
    ) -> Result<BiomeId, SampleError> {
        let policy = self.policy_snapshot();
        let mut y = start_y;
        let mut samples = 0;
        while y <= SURFACE_SCAN_MAX_Y && samples < SURFACE_SCAN_SAMPLES {
            match self.sample_block(bx, y, bz, sampler) {
                Ok(biome) if !policy.is_cave(biome) => return Ok(biome),
                Ok(_) => {}
                Err(err) => self.warn_sampler_fault(&err),
            }
            y += SURFACE_SCAN_STEP;
            samples += 1;
        }
        // Everything above was cave (or failed); answer with the biome at
        // the original height.
        self.sample_block(bx, start_y, bz, sampler)
    }

    /// Sample the host source at block coordinates, clamped to the world's
    /// safe range, converted to biome-grid coordinates.
    fn sample_block(
        &self,
        bx: i32,
        by: i32,
        bz: i32,
        sampler: &dyn BiomeSampler,
    ) -> Result<BiomeId, SampleError> {
        let bx = bx.clamp(-30_000_000, 30_000_000);
        let by = by.clamp(-2_048, 2_048);
        let bz = bz.clamp(-30_000_000, 30_000_000);
        sampler.sample(bx >> 2, by >> 2, bz >> 2)
    }

    pub(crate) fn warn_sampler_fault(&self, err: &SampleError) {
        if self.sampler_gate.allow(FAULT_LOG_INTERVAL) {
            log::warn!("biome sampler fault: {}", err);
        }
    }

    pub(crate) fn record_section(&self, section: PerfSection, elapsed: Duration) {
        self.perf.record(section, elapsed);
        if let Some(sink) = &self.telemetry {
            sink.section_sample(section, elapsed.as_nanos() as u64);
        }
    }

    /// Diagnostic query: what would happen at this position, with the exact
    /// component size. Reads caches but never writes them.
    pub fn analyze(
        &self,
        bx: i32,
        by: i32,
        bz: i32,
        vanilla: BiomeId,
        sampler: &dyn BiomeSampler,
    ) -> BiomeAnalysis {
        let params = self.params_snapshot();
        let policy = self.policy_snapshot();
        let surface_y = self.heights.height(bx, bz);
        let surface = self
            .surface_biome(bx, bz, surface_y, sampler)
            .unwrap_or(vanilla);
        let preserved = policy.is_preserved(vanilla, self.catalog.as_ref());
        let matches_surface = vanilla == surface;

        let mut analysis = BiomeAnalysis {
            x: bx,
            y: by,
            z: bz,
            surface_y,
            vanilla,
            surface,
            preserved,
            matches_surface,
            region_blocks: None,
            is_micro: None,
            replacement: None,
            from_cache: false,
        };
        if preserved || !matches_surface {
            return analysis;
        }

        if let Some(task) = self.regions.existing_fill(bx, bz, surface) {
            if let Some(fill) = task.result() {
                analysis.from_cache = true;
                analysis.is_micro = Some(!fill.is_large);
                if fill.is_large {
                    analysis.replacement = None;
                } else {
                    analysis.replacement = Some(fill.replacement);
                    analysis.region_blocks = Some(fill.positions.len() as i32 * 16);
                }
                return analysis;
            }
        }

        let exact = flood::exact_fill(self, bx, bz, surface, sampler, &params);
        analysis.region_blocks = Some(exact.cells as i32 * 16);
        analysis.is_micro = Some(exact.is_micro);
        analysis.replacement = exact.replacement;
        analysis
    }

    /// Swap in a new config snapshot. Cache capacities and grid spacing
    /// apply to new entries only; call `clear_all` for a clean slate.
    pub fn update_params(&self, params: SmootherParams) {
        let policy = BiomePolicy::resolve(&params, self.catalog.as_ref());
        self.perf.set_enabled(params.performance_logging);
        if let Ok(mut guard) = self.policy.write() {
            *guard = Arc::new(policy);
        }
        if let Ok(mut guard) = self.params.write() {
            *guard = Arc::new(params);
        }
    }

    /// World-unload hook: drop every cache and cancel pending fills.
    pub fn clear_all(&self) {
        self.regions.clear_all();
        self.heights.clear_all();
        self.perf.reset();
        log::info!("engine caches cleared");
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            regions: self.regions.stats(),
            heightmap: self.heights.stats(),
        }
    }

    pub fn perf_snapshot(&self) -> PerfSnapshot {
        self.perf.snapshot()
    }

    pub(crate) fn params_snapshot(&self) -> Arc<SmootherParams> {
        match self.params.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub(crate) fn policy_snapshot(&self) -> Arc<BiomePolicy> {
        match self.policy.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}
