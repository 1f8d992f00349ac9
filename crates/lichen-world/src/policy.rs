use std::sync::RwLock;

use hashbrown::{HashMap, HashSet};

use crate::biome::BiomeId;
use crate::config::SmootherParams;
use crate::contract::BiomeCatalog;

/// Biome families that commonly carry villages.
const VILLAGE_MARKERS: [&str; 5] = ["plains", "desert", "savanna", "taiga", "snowy"];

/// Resolved preservation / cave / replacement predicates.
///
/// Config identifier lists are resolved to `BiomeId` sets once, at engine
/// construction; the village-family rule needs the identifier string and is
/// memoized per biome.
pub struct BiomePolicy {
    preserved: HashSet<BiomeId>,
    excluded: HashSet<BiomeId>,
    caves: HashSet<BiomeId>,
    preserve_villages: bool,
    village_memo: RwLock<HashMap<BiomeId, bool>>,
}

impl BiomePolicy {
    pub fn resolve(params: &SmootherParams, catalog: &dyn BiomeCatalog) -> Self {
        Self {
            preserved: resolve_set(&params.preserved, catalog, "preserved"),
            excluded: resolve_set(&params.excluded_as_replacement, catalog, "excluded"),
            caves: resolve_set(&params.caves, catalog, "cave"),
            preserve_villages: params.preserve_village_biomes,
            village_memo: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the biome must never be removed.
    pub fn is_preserved(&self, biome: BiomeId, catalog: &dyn BiomeCatalog) -> bool {
        if self.preserved.contains(&biome) {
            return true;
        }
        if !self.preserve_villages {
            return false;
        }
        if let Ok(memo) = self.village_memo.read() {
            if let Some(hit) = memo.get(&biome) {
                return *hit;
            }
        }
        let village = catalog
            .key(biome)
            .map(|key| VILLAGE_MARKERS.iter().any(|m| key.contains(m)))
            .unwrap_or(false);
        if let Ok(mut memo) = self.village_memo.write() {
            memo.entry(biome).or_insert(village);
        }
        village
    }

    #[inline]
    pub fn is_cave(&self, biome: BiomeId) -> bool {
        self.caves.contains(&biome)
    }

    /// Whether the biome may stand in as a replacement.
    #[inline]
    pub fn can_replace_with(&self, biome: BiomeId) -> bool {
        !self.excluded.contains(&biome)
    }
}

fn resolve_set(keys: &[String], catalog: &dyn BiomeCatalog, what: &str) -> HashSet<BiomeId> {
    let mut set = HashSet::with_capacity(keys.len());
    for key in keys {
        match catalog.lookup(key) {
            Some(id) => {
                set.insert(id);
            }
            None => log::error!("unknown {} biome identifier: {}", what, key),
        }
    }
    set
}
