//! Cell indexing and face-neighbour queries for the extraction block
//!
//! The grid itself (construction, decomposition, ghost layers) is owned by the
//! surrounding simulation; the extraction only needs the read-only view
//! provided by the [`GridIndex`] trait. [`UniformBlockIndex`] is a
//! self-contained implementation of that view for a uniform block with a
//! static cell-to-rank assignment, used by the tests and by single-process
//! callers.

use std::fmt;

use nalgebra::Vector3;
use thiserror::Error as ThisError;

use crate::aabb::Aabb3d;
use crate::topology::CellFace;
use crate::{new_map, Index, MapType, Real};

/// Globally unique 64-bit identifier of a grid cell
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct CellId(pub u64);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Spatial dimension of the lattice
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Dimension {
    Two,
    Three,
}

impl Dimension {
    /// Number of corner samples stored per cell (4 in 2D, 8 in 3D)
    #[inline(always)]
    pub const fn corners_per_cell(self) -> usize {
        match self {
            Dimension::Two => 4,
            Dimension::Three => 8,
        }
    }

    /// Number of 32-bit extent values in a corner/type file header
    #[inline(always)]
    pub const fn header_len(self) -> usize {
        match self {
            Dimension::Two => 2,
            Dimension::Three => 3,
        }
    }

    #[inline(always)]
    pub const fn is_three(self) -> bool {
        matches!(self, Dimension::Three)
    }
}

/// Face-neighbour of an owned cell
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NeighborRef {
    /// The face lies on the outer boundary of the extraction block
    Boundary,
    /// The neighbour is owned by this rank, at the given local cell index
    Local(usize),
    /// The neighbour is owned by another rank, at the given local cell index on that rank
    Remote { rank: usize, cell: usize },
}

/// Error type for the construction of a [`UniformBlock`] or [`UniformBlockIndex`]
#[derive(Debug, ThisError)]
pub enum GridConstructionError {
    /// The number of cells per dimension must be at least one
    #[error("invalid number of cells per dimension: {0:?}")]
    InvalidCellCount([u64; 3]),
    /// The cell size must be positive along every axis
    #[error("cell size must be positive along every axis")]
    InvalidCellSize,
    /// The cell-to-rank assignment does not cover the whole block
    #[error("cell owner list has {found} entries, block has {expected} cells")]
    OwnerCountMismatch { expected: usize, found: usize },
}

/// Geometry of the uniform `nx * ny * nz` block of cells the extraction runs on
///
/// Cells and corner samples are enumerated x-fastest, then y, then z.
#[derive(Clone, Debug)]
pub struct UniformBlock<I: Index, R: Real> {
    origin: Vector3<R>,
    cell_size: Vector3<R>,
    cells_per_dim: [I; 3],
}

impl<I: Index, R: Real> UniformBlock<I, R> {
    /// Constructs a block from its lower corner, per-cell edge lengths and cell counts
    pub fn new(
        origin: Vector3<R>,
        cell_size: Vector3<R>,
        cells_per_dim: [I; 3],
    ) -> Result<Self, GridConstructionError> {
        if cells_per_dim.iter().any(|&n| n < I::one()) {
            return Err(GridConstructionError::InvalidCellCount([
                cells_per_dim[0].to_u64().unwrap_or(0),
                cells_per_dim[1].to_u64().unwrap_or(0),
                cells_per_dim[2].to_u64().unwrap_or(0),
            ]));
        }
        if (0..3).any(|i| cell_size[i] <= R::zero()) {
            return Err(GridConstructionError::InvalidCellSize);
        }
        Ok(Self {
            origin,
            cell_size,
            cells_per_dim,
        })
    }

    /// Returns the lower corner of the block
    #[inline(always)]
    pub fn origin(&self) -> &Vector3<R> {
        &self.origin
    }

    /// Returns the edge lengths of a single cell
    #[inline(always)]
    pub fn cell_size(&self) -> &Vector3<R> {
        &self.cell_size
    }

    /// Returns the number of cells along each axis
    #[inline(always)]
    pub fn cells_per_dim(&self) -> &[I; 3] {
        &self.cells_per_dim
    }

    /// Returns the number of cells along each axis as `usize`
    pub fn dims(&self) -> [usize; 3] {
        [
            self.cells_per_dim[0].to_usize_unchecked(),
            self.cells_per_dim[1].to_usize_unchecked(),
            self.cells_per_dim[2].to_usize_unchecked(),
        ]
    }

    /// Total number of cells in the block
    pub fn num_cells(&self) -> u64 {
        let [nx, ny, nz] = self.dims();
        nx as u64 * ny as u64 * nz as u64
    }

    /// Linear index of the cell at the given per-axis indices, x fastest
    #[inline(always)]
    pub fn flatten_cell_index(&self, ix: usize, iy: usize, iz: usize) -> u64 {
        let [nx, ny, _] = self.dims();
        (iz as u64 * ny as u64 + iy as u64) * nx as u64 + ix as u64
    }

    /// Per-axis indices of the cell whose lower corner is at the given coordinates
    ///
    /// Rounds to the nearest lattice position to absorb floating point noise
    /// in externally supplied cell bounds.
    pub fn cell_index_of(&self, lo: &Vector3<R>) -> [usize; 3] {
        let mut ijk = [0usize; 3];
        for d in 0..3 {
            let t = (lo[d] - self.origin[d]) / self.cell_size[d] + R::from_float(0.5);
            ijk[d] = t.to_usize().unwrap_or(0);
        }
        ijk
    }

    /// Bounds of the cell at the given per-axis indices
    pub fn cell_bounds(&self, ix: usize, iy: usize, iz: usize) -> Aabb3d<R> {
        let ijk = [ix, iy, iz];
        let mut lo = Vector3::zeros();
        let mut hi = Vector3::zeros();
        for d in 0..3 {
            lo[d] = self.origin[d] + self.cell_size[d].times(ijk[d] as i32);
            hi[d] = lo[d] + self.cell_size[d];
        }
        Aabb3d::new(lo, hi)
    }
}

/// Read-only view of the grid decomposition required by the extraction
///
/// The grid service resolves cell IDs and face neighbours; the extraction
/// never mutates it.
pub trait GridIndex<I: Index, R: Real> {
    /// Spatial dimension of the lattice
    fn dimension(&self) -> Dimension;

    /// Whether the domain is axisymmetric (extraction refuses such domains)
    fn axisymmetric(&self) -> bool;

    /// Geometry of the uniform extraction block
    fn block(&self) -> &UniformBlock<I, R>;

    /// Number of cells owned by this rank
    fn num_cells(&self) -> usize;

    /// Globally unique ID of a locally owned cell
    fn cell_id(&self, cell: usize) -> CellId;

    /// Bounds of a locally owned cell
    fn cell_bounds(&self, cell: usize) -> &Aabb3d<R>;

    /// Local index of the cell with the given ID, `None` if not owned by this rank
    fn local_cell(&self, id: CellId) -> Option<usize>;

    /// Face-neighbour of a locally owned cell
    fn face_neighbor(&self, cell: usize, face: CellFace) -> NeighborRef;
}

struct BlockCell<R: Real> {
    id: CellId,
    linear: u64,
    bounds: Aabb3d<R>,
}

/// [`GridIndex`] implementation for a uniform block with a static cell-to-rank assignment
///
/// Cell IDs are the 1-based linear block indices. Per rank, owned cells are
/// enumerated in ascending linear order, which makes the local index of any
/// cell computable on every rank.
pub struct UniformBlockIndex<I: Index, R: Real> {
    block: UniformBlock<I, R>,
    dimension: Dimension,
    rank: usize,
    /// Owning rank of every cell in the block, linear order
    owners: Vec<usize>,
    /// Local index of every cell within its owner, linear order
    local_indices: Vec<usize>,
    cells: Vec<BlockCell<R>>,
    id_to_local: MapType<CellId, usize>,
}

impl<I: Index, R: Real> UniformBlockIndex<I, R> {
    /// Constructs an index where a single rank owns every cell of the block
    pub fn new_serial(
        dimension: Dimension,
        origin: Vector3<R>,
        cell_size: Vector3<R>,
        cells_per_dim: [I; 3],
    ) -> Result<Self, GridConstructionError> {
        let block = UniformBlock::new(origin, cell_size, cells_per_dim)?;
        let owners = vec![0; block.num_cells() as usize];
        Self::partitioned(dimension, block, owners, 0)
    }

    /// Constructs the rank-local index for a block with the given cell-to-rank assignment
    ///
    /// `owners` assigns an owning rank to every cell of the block in linear
    /// (x-fastest) order and must be identical on all ranks.
    pub fn partitioned(
        dimension: Dimension,
        block: UniformBlock<I, R>,
        owners: Vec<usize>,
        rank: usize,
    ) -> Result<Self, GridConstructionError> {
        let ncells_total = block.num_cells() as usize;
        if owners.len() != ncells_total {
            return Err(GridConstructionError::OwnerCountMismatch {
                expected: ncells_total,
                found: owners.len(),
            });
        }

        let [nx, ny, nz] = block.dims();

        let mut local_indices = vec![0usize; ncells_total];
        let mut per_rank_counts: MapType<usize, usize> = new_map();
        let mut cells = Vec::new();
        let mut id_to_local = new_map();

        let mut linear = 0u64;
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    let owner = owners[linear as usize];
                    let count = per_rank_counts.entry(owner).or_insert(0);
                    local_indices[linear as usize] = *count;
                    *count += 1;

                    if owner == rank {
                        let id = CellId(linear + 1);
                        id_to_local.insert(id, cells.len());
                        cells.push(BlockCell {
                            id,
                            linear,
                            bounds: block.cell_bounds(ix, iy, iz),
                        });
                    }
                    linear += 1;
                }
            }
        }

        Ok(Self {
            block,
            dimension,
            rank,
            owners,
            local_indices,
            cells,
            id_to_local,
        })
    }

    /// The rank this index was constructed for
    pub fn rank(&self) -> usize {
        self.rank
    }
}

impl<I: Index, R: Real> GridIndex<I, R> for UniformBlockIndex<I, R> {
    fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn axisymmetric(&self) -> bool {
        false
    }

    fn block(&self) -> &UniformBlock<I, R> {
        &self.block
    }

    fn num_cells(&self) -> usize {
        self.cells.len()
    }

    fn cell_id(&self, cell: usize) -> CellId {
        self.cells[cell].id
    }

    fn cell_bounds(&self, cell: usize) -> &Aabb3d<R> {
        &self.cells[cell].bounds
    }

    fn local_cell(&self, id: CellId) -> Option<usize> {
        self.id_to_local.get(&id).copied()
    }

    fn face_neighbor(&self, cell: usize, face: CellFace) -> NeighborRef {
        let [nx, ny, nz] = self.block.dims();
        let linear = self.cells[cell].linear;

        let nx = nx as u64;
        let ny = ny as u64;
        let nz = nz as u64;

        let ix = linear % nx;
        let iy = (linear / nx) % ny;
        let iz = linear / (nx * ny);

        let step: i64 = if face.direction().is_positive() { 1 } else { -1 };
        let (mut jx, mut jy, mut jz) = (ix as i64, iy as i64, iz as i64);
        match face.axis().dim() {
            0 => jx += step,
            1 => jy += step,
            _ => jz += step,
        }

        if jx < 0
            || jx >= nx as i64
            || jy < 0
            || jy >= ny as i64
            || jz < 0
            || jz >= nz as i64
        {
            return NeighborRef::Boundary;
        }

        let neighbor_linear = ((jz as u64 * ny) + jy as u64) * nx + jx as u64;
        let owner = self.owners[neighbor_linear as usize];
        let local = self.local_indices[neighbor_linear as usize];
        if owner == self.rank {
            NeighborRef::Local(local)
        } else {
            NeighborRef::Remote {
                rank: owner,
                cell: local,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Axis, Direction};

    fn unit_block_index(cells_per_dim: [i32; 3]) -> UniformBlockIndex<i32, f64> {
        UniformBlockIndex::new_serial(
            Dimension::Three,
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
            cells_per_dim,
        )
        .unwrap()
    }

    #[test]
    fn test_block_linearization() {
        let index = unit_block_index([3, 2, 2]);
        let block = index.block();
        assert_eq!(block.num_cells(), 12);
        assert_eq!(block.flatten_cell_index(0, 0, 0), 0);
        assert_eq!(block.flatten_cell_index(2, 0, 0), 2);
        assert_eq!(block.flatten_cell_index(0, 1, 0), 3);
        assert_eq!(block.flatten_cell_index(0, 0, 1), 6);
        assert_eq!(block.cell_index_of(&Vector3::new(2.0, 1.0, 1.0)), [2, 1, 1]);
    }

    #[test]
    fn test_face_neighbors_serial() {
        let index = unit_block_index([2, 1, 1]);
        let xlo = Axis::X.with_direction(Direction::Negative);
        let xhi = Axis::X.with_direction(Direction::Positive);

        assert_eq!(index.face_neighbor(0, xlo), NeighborRef::Boundary);
        assert_eq!(index.face_neighbor(0, xhi), NeighborRef::Local(1));
        assert_eq!(index.face_neighbor(1, xlo), NeighborRef::Local(0));
        assert_eq!(index.face_neighbor(1, xhi), NeighborRef::Boundary);
    }

    #[test]
    fn test_partitioned_remote_neighbor() {
        let block = UniformBlock::new(
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
            [2, 1, 1],
        )
        .unwrap();
        let index =
            UniformBlockIndex::<i32, f64>::partitioned(Dimension::Three, block, vec![0, 1], 0)
                .unwrap();

        assert_eq!(index.num_cells(), 1);
        assert_eq!(index.cell_id(0), CellId(1));
        assert_eq!(
            index.face_neighbor(0, Axis::X.with_direction(Direction::Positive)),
            NeighborRef::Remote { rank: 1, cell: 0 }
        );
    }
}
