//! Domain primitives, collaborator contracts, and configuration for the
//! lichen biome-smoothing engine.
#![forbid(unsafe_code)]

pub mod biome;
pub mod config;
pub mod contract;
pub mod loggate;
pub mod policy;
pub mod pos;
pub mod stripes;

pub use biome::BiomeId;
pub use config::{SmootherConfig, SmootherParams, load_params_from_path};
pub use contract::{
    BiomeCatalog, BiomeSampler, HeightError, PerfSection, ReplacementEvent, SampleError,
    SurfaceHeight, TelemetrySink,
};
pub use policy::BiomePolicy;
pub use pos::{CellPos, ColumnKey, RegionKey, pack_center, unpack_center};
pub use stripes::Striped;
