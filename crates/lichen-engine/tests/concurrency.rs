use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use hashbrown::HashMap;

use lichen_engine::Engine;
use lichen_world::{
    BiomeCatalog, BiomeId, BiomeSampler, HeightError, SampleError, SmootherConfig, SmootherParams,
    SurfaceHeight,
};

const FOREST: BiomeId = BiomeId::new(1);
const PLAINS: BiomeId = BiomeId::new(2);

struct TableCatalog;

impl BiomeCatalog for TableCatalog {
    fn key(&self, biome: BiomeId) -> Option<String> {
        match biome {
            FOREST => Some("forest".into()),
            PLAINS => Some("meadow".into()),
            _ => None,
        }
    }

    fn lookup(&self, key: &str) -> Option<BiomeId> {
        match key {
            "forest" => Some(FOREST),
            "meadow" => Some(PLAINS),
            _ => None,
        }
    }
}

struct FlatHeight(i32);

impl SurfaceHeight for FlatHeight {
    fn surface_height(&self, _bx: i32, _bz: i32) -> Result<i32, HeightError> {
        Ok(self.0)
    }
}

/// Sampler counting how often each surface cell is sampled.
struct CountingSampler {
    per_cell: Mutex<HashMap<(i32, i32), u64>>,
    total: AtomicU64,
}

impl CountingSampler {
    fn new() -> Self {
        Self {
            per_cell: Mutex::new(HashMap::new()),
            total: AtomicU64::new(0),
        }
    }

    fn biome_at(nx: i32, nz: i32) -> BiomeId {
        // 5x5 forest component centred on the origin
        if (-2..=2).contains(&nx) && (-2..=2).contains(&nz) {
            FOREST
        } else {
            PLAINS
        }
    }
}

impl BiomeSampler for CountingSampler {
    fn sample(&self, nx: i32, _ny: i32, nz: i32) -> Result<BiomeId, SampleError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.per_cell.lock().unwrap().entry((nx, nz)).or_insert(0) += 1;
        Ok(Self::biome_at(nx, nz))
    }
}

fn params(threshold: i32) -> SmootherParams {
    let mut p = SmootherParams::from_config(&SmootherConfig::default());
    p.micro_biome_threshold = threshold;
    p
}

// Scenario: 32 concurrent queries for the same position coalesce onto one
// flood fill; the component is sampled a bounded number of times in total.
#[test]
fn concurrent_queries_coalesce_onto_one_fill() {
    // threshold 800 blocks -> 50 cells; the 25-cell component is micro
    let eng = Arc::new(Engine::new(
        params(800),
        Arc::new(TableCatalog),
        Arc::new(FlatHeight(64)),
    ));
    let sampler = Arc::new(CountingSampler::new());

    let mut handles = Vec::new();
    for _ in 0..32 {
        let eng = Arc::clone(&eng);
        let sampler = Arc::clone(&sampler);
        handles.push(thread::spawn(move || {
            eng.modified_biome(0, 64, 0, FOREST, sampler.as_ref())
        }));
    }
    let results: Vec<BiomeId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.iter().all(|r| *r == PLAINS), "all callers agree");
    assert_eq!(eng.stats().regions.fills_started, 1);

    let per_cell = sampler.per_cell.lock().unwrap();
    for nx in -2..=2 {
        for nz in -2..=2 {
            let samples = per_cell.get(&(nx, nz)).copied().unwrap_or(0);
            assert!(
                samples <= 8,
                "component cell {},{} sampled {} times",
                nx,
                nz,
                samples
            );
        }
    }
}

// Determinism: whatever the interleaving, concurrent and sequential runs
// produce the same map of answers.
#[test]
fn concurrent_answers_match_sequential_answers() {
    let make_engine = || {
        Arc::new(Engine::new(
            params(800),
            Arc::new(TableCatalog),
            Arc::new(FlatHeight(64)),
        ))
    };
    let sampler = Arc::new(CountingSampler::new());

    // sequential reference over one component and its surroundings
    let reference = make_engine();
    let mut expected = Vec::new();
    for bx in -16..16 {
        for bz in -16..16 {
            let vanilla = CountingSampler::biome_at(bx >> 2, bz >> 2);
            expected.push(reference.modified_biome(bx, 64, bz, vanilla, sampler.as_ref()));
        }
    }

    let concurrent = make_engine();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut handles = Vec::new();
    for worker in 0..8 {
        let eng = Arc::clone(&concurrent);
        let sampler = Arc::clone(&sampler);
        let tx = tx.clone();
        handles.push(thread::spawn(move || {
            let mut idx = 0usize;
            for bx in -16..16i32 {
                for bz in -16..16i32 {
                    if idx % 8 == worker {
                        let vanilla = CountingSampler::biome_at(bx >> 2, bz >> 2);
                        let answer = eng.modified_biome(bx, 64, bz, vanilla, sampler.as_ref());
                        tx.send((idx, answer)).unwrap();
                    }
                    idx += 1;
                }
            }
        }));
    }
    drop(tx);
    for handle in handles {
        handle.join().unwrap();
    }

    for (idx, answer) in rx.iter() {
        assert_eq!(answer, expected[idx], "query #{} diverged", idx);
    }
}
