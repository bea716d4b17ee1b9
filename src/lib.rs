//!
//! Library for extracting implicit surfaces from distributed lattice corner data.
//!
//! A scalar field sampled on the corners of a uniform lattice is turned into
//! line segments (2D, marching squares) or triangles (3D, extended marching
//! cubes with topological disambiguation) bound to the grid cells they
//! intersect, so that a particle simulation can treat them as local geometry.
//! The field is distributed: each rank owns an arbitrary subset of cells and
//! ingests the corner file by chunked broadcast; triangle pairs on faces
//! shared between cells of different ranks are reconciled through a single
//! bulk exchange.
//!
//! The entry point is [`build_implicit_surfaces`]. The surrounding simulation
//! provides the grid decomposition through the [`grid::GridIndex`] trait and
//! the message-passing runtime through the [`comm::Communicator`] and
//! [`comm::IrregularExchange`] traits; [`comm::SerialComm`] covers
//! single-process runs.
//!

use std::hash::Hash;
use std::path::PathBuf;

use thiserror::Error as ThisError;

pub use crate::aabb::{Aabb3d, AxisAlignedBoundingBox};
pub use crate::corners::CornerField;
pub use crate::grid::{CellId, Dimension, GridIndex, UniformBlock, UniformBlockIndex};
pub use crate::surface::{GroupMask, Line, SurfacePool, Tri};
pub use crate::traits::{Index, Real, ThreadSafe};

use crate::cleanup::CleanupError;
use crate::comm::{Communicator, IrregularExchange};
use crate::corners::IngestError;
use crate::marching_cubes::MarchingCubesError;

pub mod aabb;
pub mod cleanup;
pub mod comm;
pub mod corners;
mod extraction;
pub mod grid;
pub mod interpolation;
pub mod marching_cubes;
pub mod marching_squares;
pub mod surface;
pub mod topology;
mod traits;

pub(crate) type HashState = fxhash::FxBuildHasher;
pub(crate) type MapType<K, V> = std::collections::HashMap<K, V, HashState>;
pub(crate) fn new_map<K: Eq + Hash, V>() -> MapType<K, V> {
    MapType::with_hasher(HashState::default())
}

/// Simulation-level preconditions the caller attests to before extraction
#[derive(Clone, Debug)]
pub struct Preconditions {
    /// Global surfaces are declared implicit
    pub surfaces_implicit: bool,
    /// Surfaces already exist in the simulation
    pub surfaces_exist: bool,
    /// Live particles exist in the simulation
    pub particles_exist: bool,
}

impl Default for Preconditions {
    fn default() -> Self {
        Self {
            surfaces_implicit: true,
            surfaces_exist: false,
            particles_exist: false,
        }
    }
}

/// Parameters for an implicit surface build
#[derive(Clone, Debug)]
pub struct ExtractOptions<R: Real> {
    /// Number of cells of the extraction block along each axis (nz = 1 in 2D)
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Binary corner-value file, one unsigned byte per lattice point
    pub corner_file: PathBuf,
    /// Iso threshold, strictly between 0 and 255 and not integer valued
    pub threshold: R,
    /// Optional binary type file, one `i32` material label per cell
    pub type_file: Option<PathBuf>,
    /// Optional group bits OR-ed into every emitted primitive
    pub group: Option<GroupMask>,
    /// Keep the ingested corner field in the result for the ablation collaborator
    pub retain_corners: bool,
    pub preconditions: Preconditions,
}

impl<R: Real> ExtractOptions<R> {
    /// Options with the required arguments set and everything else defaulted
    pub fn new(
        nx: usize,
        ny: usize,
        nz: usize,
        corner_file: impl Into<PathBuf>,
        threshold: R,
    ) -> Self {
        Self {
            nx,
            ny,
            nz,
            corner_file: corner_file.into(),
            threshold,
            type_file: None,
            group: None,
            retain_corners: false,
            preconditions: Preconditions::default(),
        }
    }
}

/// Result of a successful implicit surface build
#[derive(Clone, Debug)]
pub struct ImplicitSurfaces<R: Real> {
    /// The primitives owned by this rank
    pub pool: SurfacePool<R>,
    /// Per owned cell, the handles of the primitives bound to it
    pub cell_surfs: Vec<Vec<usize>>,
    /// The ingested corner field, when retention was requested
    pub corners: Option<CornerField>,
    /// Global primitive count over all ranks
    pub num_global: u64,
}

/// Error type returned when the implicit surface build fails
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum ExtractionError {
    /// A simulation-level prerequisite does not hold
    #[error("bad prerequisite: {0}")]
    BadPrerequisite(&'static str),
    /// An argument is out of range or inconsistent with the grid
    #[error("bad arguments: {0}")]
    BadArguments(String),
    /// Error that occurred while ingesting the corner or type file
    #[error("corner value ingestion")]
    Ingest(
        #[source]
        #[from]
        IngestError,
    ),
    /// Error that occurred during the marching cubes stage
    #[error("marching cubes")]
    MarchingCubes(
        #[source]
        #[from]
        MarchingCubesError,
    ),
    /// Error that occurred while reconciling shared cell faces
    #[error("face cleanup")]
    Cleanup(
        #[source]
        #[from]
        CleanupError,
    ),
    /// Any error that is not represented by some other explicit variant
    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

/// Builds the implicit surfaces for the owned cells of the extraction block
///
/// Collective: every rank participating in `comm` must call this with the
/// same options. Returns the rank-local primitives bound to their cells; in
/// 3D, shared-face triangle pairs are already reconciled across ranks.
pub fn build_implicit_surfaces<
    I: Index,
    R: Real,
    G: GridIndex<I, R>,
    C: Communicator,
    X: IrregularExchange,
>(
    grid: &G,
    comm: &C,
    exchange: &X,
    options: &ExtractOptions<R>,
) -> Result<ImplicitSurfaces<R>, ExtractionError> {
    extraction::build_implicit_surfaces_impl(grid, comm, exchange, options)
}
