//! Frame cache for fluid and particle solvers: path layout, the native
//! compressed container, grid/particle/mesh codecs and the per-stage state
//! tracker that decides whether a frame can be restored from disk.

pub mod config;
pub mod container;
pub mod error;
pub mod grid;
pub mod mesh;
pub mod particles;
pub mod paths;
pub mod registry;
pub mod settings;
#[cfg(feature = "sparse")]
pub mod sparse;
pub mod tracker;

pub use error::{CacheError, CacheResult, FormatError};
pub use grid::{GridDescriptor, GridKind, GridView};
pub use mesh::{MeshNode, MeshSnapshot, MeshTriangle};
pub use particles::{ParticleRecord, ParticleSystem, Population, VelocityRecord};
pub use paths::CacheStage;
pub use registry::{SolverId, SolverRegistry};
pub use settings::CacheSettings;
pub use tracker::{CacheStageFlags, FluidCache};
