use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use lichen_world::contract::{PERF_SECTION_COUNT, PERF_SECTION_LABELS};
use lichen_world::PerfSection;

/// Sample 1 in N executions per section; flood fills are rare, so they get
/// a much higher rate.
const DEFAULT_SAMPLING: u64 = 100;
const FLOOD_FILL_SAMPLING: u64 = 5;

#[derive(Clone, Copy, Debug, Default)]
pub struct SectionStats {
    pub samples: u64,
    pub avg_nanos: u64,
    pub max_nanos: u64,
}

#[derive(Clone, Debug, Default)]
pub struct PerfSnapshot {
    pub sections: [SectionStats; PERF_SECTION_COUNT],
    pub total_executions: u64,
}

impl PerfSnapshot {
    pub fn label(section: usize) -> &'static str {
        PERF_SECTION_LABELS[section]
    }
}

struct SectionMetric {
    samples: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl SectionMetric {
    const fn new() -> Self {
        Self {
            samples: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            max_nanos: AtomicU64::new(0),
        }
    }

    fn record(&self, nanos: u64) {
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.samples.store(0, Ordering::Relaxed);
        self.total_nanos.store(0, Ordering::Relaxed);
        self.max_nanos.store(0, Ordering::Relaxed);
    }

    fn stats(&self) -> SectionStats {
        let samples = self.samples.load(Ordering::Relaxed);
        let total = self.total_nanos.load(Ordering::Relaxed);
        SectionStats {
            samples,
            avg_nanos: if samples == 0 { 0 } else { total / samples },
            max_nanos: self.max_nanos.load(Ordering::Relaxed),
        }
    }
}

/// Sampled per-section timing for the smoothing pipeline.
pub struct PerfTracker {
    enabled: AtomicBool,
    metrics: [SectionMetric; PERF_SECTION_COUNT],
    sample_counter: AtomicU64,
    fill_sample_counter: AtomicU64,
    total_executions: AtomicU64,
}

impl PerfTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            metrics: [
                SectionMetric::new(),
                SectionMetric::new(),
                SectionMetric::new(),
                SectionMetric::new(),
                SectionMetric::new(),
                SectionMetric::new(),
            ],
            sample_counter: AtomicU64::new(0),
            fill_sample_counter: AtomicU64::new(0),
            total_executions: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Decide whether this occurrence of a section should be timed.
    pub fn should_sample(&self, section: PerfSection) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return false;
        }
        match section {
            PerfSection::FloodFill => {
                self.fill_sample_counter.fetch_add(1, Ordering::Relaxed) % FLOOD_FILL_SAMPLING == 0
            }
            _ => self.sample_counter.fetch_add(1, Ordering::Relaxed) % DEFAULT_SAMPLING == 0,
        }
    }

    pub fn record(&self, section: PerfSection, elapsed: Duration) {
        self.metrics[section as usize].record(elapsed.as_nanos() as u64);
    }

    /// Count one top-level query, sampled or not.
    #[inline]
    pub fn count_execution(&self) {
        self.total_executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PerfSnapshot {
        let mut sections = [SectionStats::default(); PERF_SECTION_COUNT];
        for (idx, metric) in self.metrics.iter().enumerate() {
            sections[idx] = metric.stats();
        }
        PerfSnapshot {
            sections,
            total_executions: self.total_executions.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for metric in &self.metrics {
            metric.reset();
        }
        self.total_executions.store(0, Ordering::Relaxed);
    }
}
