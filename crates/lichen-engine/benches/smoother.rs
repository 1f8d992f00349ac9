use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use fastnoise_lite::{FastNoiseLite, NoiseType};

use lichen_engine::Engine;
use lichen_world::{
    BiomeCatalog, BiomeId, BiomeSampler, HeightError, SampleError, SmootherConfig, SmootherParams,
    SurfaceHeight,
};

const BIOMES: [(&str, BiomeId); 4] = [
    ("meadow", BiomeId::new(1)),
    ("forest", BiomeId::new(2)),
    ("tundra", BiomeId::new(3)),
    ("shrubland", BiomeId::new(4)),
];

struct TableCatalog;

impl BiomeCatalog for TableCatalog {
    fn key(&self, biome: BiomeId) -> Option<String> {
        BIOMES
            .iter()
            .find(|(_, id)| *id == biome)
            .map(|(key, _)| key.to_string())
    }

    fn lookup(&self, key: &str) -> Option<BiomeId> {
        BIOMES.iter().find(|(k, _)| *k == key).map(|(_, id)| *id)
    }
}

struct NoiseSampler {
    noise: FastNoiseLite,
}

impl NoiseSampler {
    fn new(seed: i32) -> Self {
        let mut noise = FastNoiseLite::with_seed(seed);
        noise.set_noise_type(Some(NoiseType::OpenSimplex2));
        noise.set_frequency(Some(0.05));
        Self { noise }
    }

    fn biome_at(&self, nx: i32, nz: i32) -> BiomeId {
        let v = self.noise.get_noise_2d(nx as f32, nz as f32);
        let idx = (((v + 1.0) * 0.5) * BIOMES.len() as f32) as usize;
        BIOMES[idx.min(BIOMES.len() - 1)].1
    }
}

impl BiomeSampler for NoiseSampler {
    fn sample(&self, nx: i32, _ny: i32, nz: i32) -> Result<BiomeId, SampleError> {
        Ok(self.biome_at(nx, nz))
    }
}

struct NoiseHeight {
    noise: FastNoiseLite,
}

impl NoiseHeight {
    fn new(seed: i32) -> Self {
        let mut noise = FastNoiseLite::with_seed(seed ^ 0x5157);
        noise.set_noise_type(Some(NoiseType::OpenSimplex2));
        noise.set_frequency(Some(0.008));
        Self { noise }
    }
}

impl SurfaceHeight for NoiseHeight {
    fn surface_height(&self, bx: i32, bz: i32) -> Result<i32, HeightError> {
        let v = self.noise.get_noise_2d(bx as f32, bz as f32);
        Ok(64 + (v * 24.0) as i32)
    }
}

fn make_engine() -> Engine {
    let mut params = SmootherParams::from_config(&SmootherConfig::default());
    params.preserve_village_biomes = false;
    Engine::new(params, Arc::new(TableCatalog), Arc::new(NoiseHeight::new(7)))
}

fn bench_cold_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("modified_biome_cold");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    group.bench_function("scan_128x128", |b| {
        b.iter(|| {
            let engine = make_engine();
            let sampler = NoiseSampler::new(7);
            let mut acc = 0u64;
            for bx in (0..128).step_by(4) {
                for bz in (0..128).step_by(4) {
                    let vanilla = sampler.biome_at(bx >> 2, bz >> 2);
                    acc = acc.wrapping_add(
                        engine.modified_biome(bx, 64, bz, vanilla, &sampler).raw() as u64,
                    );
                }
            }
            black_box(acc)
        });
    });
    group.finish();
}

fn bench_warm_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("modified_biome_warm");

    let engine = make_engine();
    let sampler = NoiseSampler::new(7);
    // populate every cache layer once
    for bx in (0..128).step_by(4) {
        for bz in (0..128).step_by(4) {
            let vanilla = sampler.biome_at(bx >> 2, bz >> 2);
            engine.modified_biome(bx, 64, bz, vanilla, &sampler);
        }
    }

    group.bench_function("requery_128x128", |b| {
        b.iter(|| {
            let mut acc = 0u64;
            for bx in (0..128).step_by(4) {
                for bz in (0..128).step_by(4) {
                    let vanilla = sampler.biome_at(bx >> 2, bz >> 2);
                    acc = acc.wrapping_add(
                        engine.modified_biome(bx, 64, bz, vanilla, &sampler).raw() as u64,
                    );
                }
            }
            black_box(acc)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_cold_scan, bench_warm_queries);
criterion_main!(benches);
