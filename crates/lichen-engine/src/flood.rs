use std::collections::VecDeque;
use std::time::{Duration, Instant};

use hashbrown::HashSet;

use lichen_world::{BiomeId, BiomeSampler, CellPos, PerfSection, SmootherParams};

use crate::smoother::Engine;

/// Fixed neighbor order; the fill partition must not depend on scheduling.
const CARDINALS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

const DEGENERATE_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Coarse spatial coverage stored for large components.
const LARGE_SPATIAL_RADIUS: i32 = 128;

/// Run the bounded BFS for `(start_x, start_z, target)` and complete the
/// dispatcher task. Always completes, whatever the samplers do.
pub(crate) fn run_fill(
    engine: &Engine,
    start_x: i32,
    start_z: i32,
    target: BiomeId,
    sampler: &dyn BiomeSampler,
    params: &SmootherParams,
) {
    let sampled = engine.perf.should_sample(PerfSection::FloodFill);
    let t0 = sampled.then(Instant::now);

    let threshold = params.cell_threshold();
    let start = CellPos::from_block(start_x, start_z);
    let mut member: HashSet<CellPos> = HashSet::new();
    let mut order: Vec<CellPos> = Vec::new();
    let mut queue: VecDeque<CellPos> = VecDeque::new();
    member.insert(start);
    order.push(start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        for (dx, dz) in CARDINALS {
            let neighbor = current.offset(dx, dz);
            if member.contains(&neighbor) {
                continue;
            }
            let nbx = neighbor.block_x();
            let nbz = neighbor.block_z();
            let ny = engine.heights.height(nbx, nbz);
            let biome = match engine.surface_biome(nbx, nbz, ny, sampler) {
                Ok(biome) => biome,
                Err(err) => {
                    engine.warn_sampler_fault(&err);
                    continue;
                }
            };
            if biome != target {
                continue;
            }
            member.insert(neighbor);
            order.push(neighbor);
            queue.push_back(neighbor);

            if exceeds_threshold(member.len(), queue.len(), threshold) {
                engine.regions.complete_fill(start_x, start_z, target, Vec::new(), true, target);
                engine.regions.mark_large_area(start_x, start_z, target);
                engine.regions.put_spatial(
                    start_x,
                    start_z,
                    target,
                    true,
                    None,
                    LARGE_SPATIAL_RADIUS,
                );
                if let Some(t0) = t0 {
                    engine.record_section(PerfSection::FloodFill, t0.elapsed());
                }
                return;
            }
        }
    }

    if let Some(t0) = t0 {
        engine.record_section(PerfSection::FloodFill, t0.elapsed());
    }

    let vote_sampled = engine.perf.should_sample(PerfSection::NeighborSearch);
    let vote_t0 = vote_sampled.then(Instant::now);
    let replacement = find_dominant_neighbor(engine, &order, &member, target, sampler);
    if let Some(t0) = vote_t0 {
        engine.record_section(PerfSection::NeighborSearch, t0.elapsed());
    }

    match replacement {
        Some(replacement) => {
            let radius = (order.len() as f64).sqrt() as i32;
            engine
                .regions
                .complete_fill(start_x, start_z, target, order, false, replacement);
            engine
                .regions
                .put_spatial(start_x, start_z, target, false, Some(replacement), radius);
        }
        None => {
            // Component has no usable different neighbor; this is fragmented
            // detection of a larger area, so answer "large" and leave the
            // reuse layers alone.
            if engine.degenerate_gate.allow(DEGENERATE_LOG_INTERVAL) {
                log::warn!(
                    "micro component at {},{} has no different neighbors, keeping original biome",
                    start_x,
                    start_z
                );
            }
            engine
                .regions
                .complete_fill(start_x, start_z, target, Vec::new(), true, target);
        }
    }
}

/// Bailout rules: deterministic functions of `(|V|, |Q|, T)`, checked after
/// every insertion.
#[inline]
fn exceeds_threshold(visited: usize, queued: usize, threshold: usize) -> bool {
    if visited > threshold {
        return true;
    }
    // expanding frontier: |V| > 0.8 T and |Q| > 0.5 T
    if 5 * visited > 4 * threshold && 2 * queued > threshold {
        return true;
    }
    // near-threshold overflow: |V| > 0.95 T and |Q| > |V|
    20 * visited > 19 * threshold && queued > visited
}

/// Pick the most common perimeter biome, preferring replacement-eligible
/// ones. `None` when every perimeter sample is the target itself (or fails).
fn find_dominant_neighbor(
    engine: &Engine,
    order: &[CellPos],
    member: &HashSet<CellPos>,
    target: BiomeId,
    sampler: &dyn BiomeSampler,
) -> Option<BiomeId> {
    let estimated_y = match order.first() {
        Some(first) => engine.heights.height(first.block_x(), first.block_z()),
        None => 64,
    };
    let policy = engine.policy_snapshot();

    // First-encounter order doubles as the tie break, so plain vectors
    // instead of hash maps.
    let mut all: Vec<(BiomeId, u32)> = Vec::new();
    let mut valid: Vec<(BiomeId, u32)> = Vec::new();

    for cell in order {
        for (dx, dz) in CARDINALS {
            let neighbor = cell.offset(dx, dz);
            if member.contains(&neighbor) {
                continue;
            }
            let nbx = neighbor.block_x();
            let nbz = neighbor.block_z();
            let height = approximate_height(nbx, nbz, estimated_y);
            let biome = match engine.surface_biome(nbx, nbz, height, sampler) {
                Ok(biome) => biome,
                Err(err) => {
                    engine.warn_sampler_fault(&err);
                    continue;
                }
            };
            if biome == target || !engine.catalog.is_valid(biome) {
                continue;
            }
            tally(&mut all, biome);
            if policy.can_replace_with(biome) {
                tally(&mut valid, biome);
            }
        }
    }

    dominant(&valid).or_else(|| dominant(&all))
}

fn tally(counts: &mut Vec<(BiomeId, u32)>, biome: BiomeId) {
    match counts.iter_mut().find(|(b, _)| *b == biome) {
        Some((_, count)) => *count += 1,
        None => counts.push((biome, 1)),
    }
}

fn dominant(counts: &[(BiomeId, u32)]) -> Option<BiomeId> {
    let mut best: Option<(BiomeId, u32)> = None;
    for &(biome, count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((biome, count)),
        }
    }
    best.map(|(biome, _)| biome)
}

/// Height estimate for perimeter sampling: the component's height plus a
/// small pure perturbation of `(x, z)`.
#[inline]
fn approximate_height(x: i32, z: i32, nearby: i32) -> i32 {
    let variation = (x.rem_euclid(8) - 4).abs() + (z.rem_euclid(8) - 4).abs();
    nearby + if variation > 6 { variation - 6 } else { 0 } - 1
}

/// Exact component measurement for the diagnostic query: no bailout
/// heuristics, no cache writes, capped just past the threshold.
pub(crate) struct ExactFill {
    pub cells: usize,
    pub is_micro: bool,
    pub replacement: Option<BiomeId>,
}

pub(crate) fn exact_fill(
    engine: &Engine,
    start_x: i32,
    start_z: i32,
    target: BiomeId,
    sampler: &dyn BiomeSampler,
    params: &SmootherParams,
) -> ExactFill {
    let threshold = params.cell_threshold();
    let start = CellPos::from_block(start_x, start_z);
    let mut member: HashSet<CellPos> = HashSet::new();
    let mut order: Vec<CellPos> = Vec::new();
    let mut queue: VecDeque<CellPos> = VecDeque::new();
    member.insert(start);
    order.push(start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        for (dx, dz) in CARDINALS {
            let neighbor = current.offset(dx, dz);
            if member.contains(&neighbor) {
                continue;
            }
            let nbx = neighbor.block_x();
            let nbz = neighbor.block_z();
            let ny = engine.heights.height(nbx, nbz);
            let Ok(biome) = engine.surface_biome(nbx, nbz, ny, sampler) else {
                continue;
            };
            if biome != target {
                continue;
            }
            member.insert(neighbor);
            order.push(neighbor);
            queue.push_back(neighbor);
            if member.len() > threshold {
                return ExactFill {
                    cells: member.len(),
                    is_micro: false,
                    replacement: None,
                };
            }
        }
    }

    let replacement = find_dominant_neighbor(engine, &order, &member, target, sampler);
    ExactFill {
        cells: member.len(),
        is_micro: replacement.is_some(),
        replacement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bailout_rules_trip_in_order() {
        // T = 3: a fourth cell always trips the hard rule.
        assert!(exceeds_threshold(4, 0, 3));
        assert!(!exceeds_threshold(3, 1, 3));
        // expanding frontier at 80%/50%: T = 20, |V| = 17, |Q| = 11
        assert!(exceeds_threshold(17, 11, 20));
        assert!(!exceeds_threshold(16, 11, 20));
        assert!(!exceeds_threshold(17, 10, 20));
        // at the threshold with a drained frontier the fill may still finish
        assert!(!exceeds_threshold(20, 10, 20));
        // near-threshold overflow: |V| = |Q| = T trips the frontier rules
        assert!(exceeds_threshold(20, 21, 20));
    }

    #[test]
    fn approximate_height_is_pure_and_bounded() {
        for x in -32..32 {
            for z in -32..32 {
                let h = approximate_height(x, z, 64);
                assert_eq!(h, approximate_height(x, z, 64));
                assert!((63..=65).contains(&h));
            }
        }
    }

    #[test]
    fn dominant_prefers_first_encountered_on_ties() {
        let a = BiomeId::new(1);
        let b = BiomeId::new(2);
        let mut counts = Vec::new();
        tally(&mut counts, a);
        tally(&mut counts, b);
        tally(&mut counts, b);
        tally(&mut counts, a);
        assert_eq!(dominant(&counts), Some(a));
    }
}
